use std::rc::Rc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::descriptor::{
    DescriptorStore, EntityFields, LangData, RowData, SeedDocument, SourceKind,
};
use super::hooks::{CreateHook, HookTable, PopulateHook};
use super::ids::IdRegistry;
use super::images::ImageImporter;
use super::models::{
    add_tags, collect_product_tags, create_configuration, split_by_language, ModelRegistry, Saved,
};
use super::order::DependencyGraph;
use crate::config::{Language, LoaderConfig};
use crate::db::Database;
use crate::error::{ErrorSink, LoaderError, LoaderResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub entity: String,
    pub rows: usize,
    /// Messages added to the error sink while this entity was populated.
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateReport {
    pub source: SourceKind,
    pub order: Vec<String>,
    pub entities: Vec<EntitySummary>,
    pub errors: Vec<String>,
    /// Identifiers held by the registry at the end of the run.
    pub ids: usize,
}

/// Owns everything a population run touches: the store, the descriptor
/// cache, the identifier registry and the error sink.
pub struct FixtureLoader {
    config: LoaderConfig,
    db: Database,
    descriptors: DescriptorStore,
    ids: IdRegistry,
    errors: ErrorSink,
    hooks: HookTable,
    models: ModelRegistry,
}

impl FixtureLoader {
    pub fn new(config: LoaderConfig, db: Database) -> Self {
        let descriptors = DescriptorStore::from_config(&config);
        Self {
            config,
            db,
            descriptors,
            ids: IdRegistry::new(),
            errors: ErrorSink::new(),
            hooks: HookTable::standard(),
            models: ModelRegistry::new(),
        }
    }

    /// Open the database named by the config.
    pub fn from_config(config: LoaderConfig) -> LoaderResult<Self> {
        let db = Database::open(&config.database, config.table_prefix.clone())?;
        Ok(Self::new(config, db))
    }

    pub fn with_hooks(mut self, hooks: HookTable) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    pub fn use_common_source(&mut self) {
        self.descriptors.use_source(SourceKind::Common);
    }

    pub fn use_fixture_source(&mut self) {
        self.descriptors.use_source(SourceKind::Fixture);
    }

    pub fn set_languages(&mut self, languages: Vec<Language>) {
        self.config.languages = languages;
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn errors(&self) -> &[String] {
        self.errors.messages()
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message);
    }

    pub fn ids(&self) -> &IdRegistry {
        &self.ids
    }

    pub fn set_ids(&mut self, ids: IdRegistry) {
        self.ids = ids;
    }

    pub fn store_id(&mut self, entity: &str, identifier: &str, id: i64) {
        self.ids.store(entity, identifier, id);
    }

    pub fn retrieve_id(&self, entity: &str, identifier: &str) -> Option<i64> {
        self.ids.retrieve(entity, identifier)
    }

    /// Every entity of the active source, ordered so referenced entities
    /// come first.
    pub fn entity_order(&mut self) -> LoaderResult<Vec<String>> {
        let names = self.descriptors.entity_names()?;
        let mut docs: Vec<(String, Rc<SeedDocument>)> = Vec::with_capacity(names.len());
        for entity in names {
            let doc = self.descriptors.load(&entity, None)?;
            docs.push((entity, doc));
        }
        let graph = DependencyGraph::from_fields(
            docs.iter()
                .map(|(entity, doc)| (entity.as_str(), doc.fields.as_ref())),
        );
        Ok(graph.sort())
    }

    /// Populate every entity of the active source in dependency order.
    pub fn populate_from_xml_files(&mut self) -> LoaderResult<PopulateReport> {
        let started = Instant::now();
        let order = self.entity_order()?;
        tracing::info!(
            target: "seedloader",
            event = "populate_start",
            source = ?self.descriptors.source(),
            entities = order.len()
        );

        let mut entities = Vec::with_capacity(order.len());
        for entity in &order {
            let summary = match self.hooks.hooks_for(entity).populate {
                PopulateHook::Rows => self.populate_entity(entity)?,
                PopulateHook::Tags => self.populate_tags()?,
            };
            entities.push(summary);
        }

        tracing::info!(
            target: "seedloader",
            event = "populate_done",
            entities = entities.len(),
            errors = self.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64
        );
        Ok(PopulateReport {
            source: self.descriptors.source(),
            order,
            entities,
            errors: self.errors.messages().to_vec(),
            ids: self.ids.len(),
        })
    }

    /// Insert every seed row of one entity, with translations and images.
    pub fn populate_entity(&mut self, entity: &str) -> LoaderResult<EntitySummary> {
        let errors_before = self.errors.len();
        let doc = self.descriptors.load(entity, None)?;
        let fields = doc
            .fields
            .as_ref()
            .ok_or_else(|| LoaderError::FieldsMissing(entity.to_string()))?;

        let translations = if self.db.is_multilang(entity)? {
            Some(self.load_translations(entity)?)
        } else {
            None
        };
        let class = fields.config.class.as_deref();
        let image_hook = self.hooks.hooks_for(entity).images;

        for row in &doc.rows {
            let data_lang = translations
                .as_ref()
                .map(|t| t.row_values(&row.id))
                .unwrap_or_default();
            let data = self.rewrite_relations(fields, &row.values);
            let id = self.create_entity(entity, &row.id, class, &data, &data_lang)?;

            if let Some(dirs) = fields.config.image.as_deref() {
                let importer = ImageImporter::new(
                    &self.descriptors.paths().img_dir,
                    &self.config.image_dir,
                    &self.config.image_types,
                );
                importer.import(image_hook, entity, &row.id, id, dirs, &data, &mut self.errors);
            }
        }

        let summary = EntitySummary {
            entity: entity.to_string(),
            rows: doc.rows.len(),
            errors: self.errors.len() - errors_before,
        };
        tracing::info!(
            target: "seedloader",
            event = "entity_populated",
            entity,
            rows = summary.rows,
            errors = summary.errors
        );
        Ok(summary)
    }

    /// Tags come only from per-language files: each row names a tag and the
    /// products carrying it.
    pub fn populate_tags(&mut self) -> LoaderResult<EntitySummary> {
        let errors_before = self.errors.len();
        let mut rows = 0;
        for language in self.config.languages.clone() {
            if !self.descriptors.translation_exists("tag", &language.iso) {
                continue;
            }
            let doc = self.descriptors.load("tag", Some(&language.iso))?;
            rows += doc.rows.len();
            for (product, tags) in collect_product_tags(&doc.rows, &self.ids) {
                if let Err(err) = add_tags(&mut self.db, language.id, product, &tags) {
                    self.row_failed("tag", err)?;
                }
            }
        }

        tracing::info!(target: "seedloader", event = "entity_populated", entity = "tag", rows);
        Ok(EntitySummary {
            entity: "tag".to_string(),
            rows,
            errors: self.errors.len() - errors_before,
        })
    }

    /// Persist one row through the entity's create handler, its backing
    /// class, or a raw insert, then register its id whatever happened.
    pub fn create_entity(
        &mut self,
        entity: &str,
        identifier: &str,
        class: Option<&str>,
        data: &RowData,
        data_lang: &LangData,
    ) -> LoaderResult<i64> {
        let created = match (self.hooks.hooks_for(entity).create, class) {
            (CreateHook::Configuration, _) => {
                create_configuration(&mut self.db, data, data_lang).map(Saved::new)
            }
            (CreateHook::Default, Some(class)) => {
                self.models.add(class, &mut self.db, data, data_lang)
            }
            (CreateHook::Default, None) => Ok(Saved::new(self.insert_raw(entity, data, data_lang))),
        };
        let id = match created {
            Ok(saved) => {
                for err in &saved.lang_errors {
                    self.sql_error(entity, err);
                }
                saved.id
            }
            Err(err) => self.row_failed(entity, err)?,
        };
        self.ids.store(entity, identifier, id);
        Ok(id)
    }

    fn insert_raw(&mut self, entity: &str, data: &RowData, data_lang: &LangData) -> i64 {
        let id = match self.db.insert_ignore(entity, data) {
            Ok(id) => id,
            Err(err) => {
                self.sql_error(entity, &err);
                0
            }
        };

        let lang_table = format!("{entity}_lang");
        for (id_lang, mut values) in split_by_language(data_lang) {
            values.insert(format!("id_{entity}"), id.to_string());
            values.insert("id_lang".to_string(), id_lang.to_string());
            if let Err(err) = self.db.insert_ignore(&lang_table, &values) {
                self.sql_error(entity, &err);
            }
        }
        id
    }

    /// Database failures are row-level and recorded; anything else aborts.
    fn row_failed(&mut self, entity: &str, err: LoaderError) -> LoaderResult<i64> {
        match err {
            LoaderError::Database(err) => {
                self.sql_error(entity, &err);
                Ok(0)
            }
            other => Err(other),
        }
    }

    fn sql_error(&mut self, entity: &str, err: &rusqlite::Error) {
        tracing::debug!(target: "seedloader", event = "row_failed", entity, error = %err);
        self.errors
            .push(format!("An SQL error occured for entity {entity}: {err}"));
    }

    fn rewrite_relations(&self, fields: &EntityFields, values: &RowData) -> RowData {
        let mut data = values.clone();
        for (column, target) in fields.relations() {
            let resolved = self
                .ids
                .resolve_relation(target, values.get(column).map(String::as_str));
            data.insert(column.to_string(), resolved);
        }
        data
    }

    fn load_translations(&mut self, entity: &str) -> LoaderResult<Translations> {
        let columns = self
            .db
            .multilang_columns(entity)?
            .into_iter()
            .map(|column| column.name)
            .collect();
        let mut documents = Vec::with_capacity(self.config.languages.len());
        let mut base = None;
        for language in self.config.languages.clone() {
            // an unreadable language file falls back to the base language
            let doc = self.descriptors.load(entity, Some(&language.iso)).ok();
            if language.iso == self.config.base_language {
                base = doc.clone();
            }
            documents.push((language.id, doc));
        }
        Ok(Translations {
            columns,
            documents,
            base,
        })
    }
}

struct Translations {
    columns: Vec<String>,
    documents: Vec<(i64, Option<Rc<SeedDocument>>)>,
    base: Option<Rc<SeedDocument>>,
}

impl Translations {
    /// `column -> language -> value` for one seed row. A language without
    /// that row uses the base language's row; a column the row does not
    /// carry is empty.
    fn row_values(&self, identifier: &str) -> LangData {
        let mut data = LangData::new();
        for (id_lang, doc) in &self.documents {
            let node = doc
                .as_ref()
                .and_then(|doc| doc.row(identifier))
                .or_else(|| self.base.as_ref().and_then(|base| base.row(identifier)));
            let Some(node) = node else {
                continue;
            };
            for column in &self.columns {
                data.entry(column.clone())
                    .or_default()
                    .insert(*id_lang, node.get(column).unwrap_or_default().to_string());
            }
        }
        data
    }
}

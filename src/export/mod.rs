//! Development helper: dump the live store back into seed descriptors.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::config::LoaderConfig;
use crate::db::{quote_ident, Database, RowMap};
use crate::error::{ErrorSink, LoaderError, LoaderResult};
use crate::import::descriptor::{
    DescriptorConfig, DescriptorStore, EntityFields, FieldDescriptor, SourceKind,
};
use crate::import::hooks::{BackupHook, ExportHook, HookTable};
use crate::import::order::DependencyGraph;
use crate::import::xml::{parse_document, Element};

pub mod images;
pub mod writer;

pub use writer::NodeMap;

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[^a-z0-9_-]").expect("valid slug regex"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("valid underscore regex"));

/// Stable symbolic identifiers for exported rows, cached per entity by
/// primary key value.
#[derive(Debug, Clone, Default)]
pub struct SymbolicIds {
    ids: HashMap<String, IndexMap<String, String>>,
}

impl SymbolicIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slug of `row[id_format]` when that column holds a value, otherwise
    /// `<entity>_<primary>`. Colliding slugs get `_1`, `_2`, ... appended.
    /// An empty or zero primary key has no identifier.
    pub fn generate(
        &mut self,
        entity: &str,
        primary: &str,
        row: Option<&RowMap>,
        id_format: Option<&str>,
    ) -> String {
        let known = self.ids.entry(entity.to_string()).or_default();
        if let Some(id) = known.get(primary) {
            return id.clone();
        }
        if primary.is_empty() || primary == "0" {
            return String::new();
        }

        let source = id_format
            .zip(row)
            .and_then(|(column, row)| row.get(column))
            .filter(|value| !value.is_empty());
        let slug = source.map(|value| slugify(value)).unwrap_or_default();

        let id = if slug.is_empty() {
            format!("{entity}_{primary}")
        } else {
            let mut candidate = slug.clone();
            let mut suffix = 1;
            while known.values().any(|existing| *existing == candidate) {
                candidate = format!("{slug}_{suffix}");
                suffix += 1;
            }
            candidate
        };
        known.insert(primary.to_string(), id.clone());
        id
    }
}

pub fn slugify(value: &str) -> String {
    let replaced = NON_SLUG.replace_all(value, "_");
    let collapsed = UNDERSCORES.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

/// Nodes of the base file plus, per language id, nodes of the language files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityContents {
    pub nodes: NodeMap,
    pub nodes_lang: BTreeMap<i64, NodeMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub entity: String,
    pub nodes: usize,
    pub languages: usize,
}

/// Rewrites seed descriptors from the rows currently in the store.
pub struct Exporter {
    config: LoaderConfig,
    db: Database,
    descriptors: DescriptorStore,
    ids: SymbolicIds,
    errors: ErrorSink,
    hooks: HookTable,
    with_images: bool,
}

impl Exporter {
    pub fn new(config: LoaderConfig, db: Database) -> Self {
        let descriptors = DescriptorStore::from_config(&config);
        Self {
            config,
            db,
            descriptors,
            ids: SymbolicIds::new(),
            errors: ErrorSink::new(),
            hooks: HookTable::standard(),
            with_images: false,
        }
    }

    pub fn with_image_backup(mut self, enabled: bool) -> Self {
        self.with_images = enabled;
        self
    }

    pub fn use_source(&mut self, kind: SourceKind) {
        self.descriptors.use_source(kind);
    }

    pub fn errors(&self) -> &[String] {
        self.errors.messages()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn entity_names(&self) -> LoaderResult<Vec<String>> {
        self.descriptors.entity_names()
    }

    pub fn entity_exists(&self, entity: &str) -> bool {
        self.descriptors.entity_exists(entity)
    }

    /// Schema as written on disk, empty when the descriptor is unusable.
    pub fn entity_info(&self, entity: &str) -> EntityFields {
        self.descriptors.entity_info(entity)
    }

    /// Relation graph across every descriptor of the active source.
    pub fn dependencies(&self) -> LoaderResult<DependencyGraph> {
        let names = self.entity_names()?;
        let infos: Vec<(String, EntityFields)> = names
            .into_iter()
            .map(|entity| {
                let info = self.entity_info(&entity);
                (entity, info)
            })
            .collect();
        Ok(DependencyGraph::from_fields(
            infos.iter().map(|(entity, info)| (entity.as_str(), Some(info))),
        ))
    }

    /// Replace the `fields` block of a descriptor, creating the file when it
    /// does not exist yet. Rows already in the file are kept.
    pub fn generate_entity_schema(
        &mut self,
        entity: &str,
        fields: &[FieldDescriptor],
        config: &DescriptorConfig,
    ) -> LoaderResult<()> {
        let mut root = if self.entity_exists(entity) {
            self.load_tree(entity)?
        } else {
            Element::new(format!("entity_{entity}"))
        };
        root.children.retain(|child| child.name != "fields");

        let mut block = Element::new("fields");
        for (key, value) in config.attributes() {
            block.attributes.push((key.to_string(), value.to_string()));
        }
        for field in fields {
            let mut element = Element::new("field");
            element.attributes.push(("name".to_string(), field.name.clone()));
            if let Some(relation) = &field.relation {
                element
                    .attributes
                    .push(("relation".to_string(), relation.clone()));
            }
            block.children.push(element);
        }
        root.children.insert(0, block);

        writer::write_file(&root, &self.descriptors.paths().descriptor_path(entity))?;
        self.descriptors.forget(entity);
        tracing::info!(target: "seedloader", event = "schema_generated", entity, fields = fields.len());
        Ok(())
    }

    pub fn generate_all_entity_files(&mut self) -> LoaderResult<Vec<ExportSummary>> {
        let names = self.entity_names()?;
        self.generate_entity_files(&names)
    }

    /// Export the given entities, ordered by the relations declared across
    /// the whole source.
    pub fn generate_entity_files(&mut self, entities: &[String]) -> LoaderResult<Vec<ExportSummary>> {
        let all = self.dependencies()?;
        let mut graph = DependencyGraph::new();
        for entity in entities {
            graph.add_entity(entity);
        }
        for entity in all.entities() {
            for target in all.dependencies_of(entity) {
                graph.add_relation(entity, target);
            }
        }

        let mut summaries = Vec::with_capacity(entities.len());
        for entity in graph.sort() {
            summaries.push(self.generate_entity_content(&entity)?);
        }
        Ok(summaries)
    }

    /// Rewrite the rows of one descriptor and its language files.
    pub fn generate_entity_content(&mut self, entity: &str) -> LoaderResult<ExportSummary> {
        let mut root = self.load_tree(entity)?;
        let hooks = self.hooks.hooks_for(entity);
        let contents = match hooks.export {
            ExportHook::Rows => self.entity_contents(entity)?,
            ExportHook::Tags => self.tag_contents()?,
        };
        let text_columns = self.text_columns(entity)?;

        root.children.retain(|child| child.name != "entities");
        let mut block = Element::new("entities");
        block.children = writer::entity_nodes(entity, &contents.nodes, &text_columns);
        root.children.push(block);
        let paths = self.descriptors.paths().clone();
        writer::write_file(&root, &paths.descriptor_path(entity))?;

        let mut languages = 0;
        for (id_lang, nodes) in &contents.nodes_lang {
            let Some(iso) = self.config.language_iso(*id_lang) else {
                continue;
            };
            let mut lang_root = Element::new(format!("entity_{entity}"));
            lang_root.children = writer::entity_nodes(entity, nodes, &text_columns);
            writer::write_file(&lang_root, &paths.translation_path(entity, iso))?;
            languages += 1;
        }

        let image_dirs = root
            .child("fields")
            .and_then(|fields| fields.non_empty_attr("image"))
            .map(str::to_string);
        if let Some(dirs) = image_dirs.filter(|_| self.with_images) {
            match hooks.backup {
                BackupHook::Default => self.backup_images(entity, &dirs),
                BackupHook::Tab => self.backup_tab_images()?,
                BackupHook::ProductImage => self.backup_product_images()?,
            }
        }

        self.descriptors.forget(entity);
        let summary = ExportSummary {
            entity: entity.to_string(),
            nodes: contents.nodes.len(),
            languages,
        };
        tracing::info!(
            target: "seedloader",
            event = "entity_exported",
            entity,
            nodes = summary.nodes,
            languages
        );
        Ok(summary)
    }

    /// Query the live rows of an entity and shape them into nodes.
    pub fn entity_contents(&mut self, entity: &str) -> LoaderResult<EntityContents> {
        let doc = self.descriptors.load(entity, None)?;
        let fields = doc
            .fields
            .as_ref()
            .ok_or_else(|| LoaderError::FieldsMissing(entity.to_string()))?;
        let config = &fields.config;
        let primary_spec = config
            .primary
            .clone()
            .unwrap_or_else(|| format!("id_{entity}"));
        let primary_keys: Vec<String> = primary_spec
            .split(',')
            .map(|key| key.trim().to_string())
            .collect();
        let is_association = primary_keys.len() > 1;
        let is_multilang = self.db.is_multilang(entity)?;

        let mut select = vec!["a.*".to_string()];
        let mut from = format!("{} a", quote_ident(&self.db.table_name(entity)));
        let mut order_by = Vec::new();
        let mut aliases: HashMap<String, String> = HashMap::new();
        let mut lang_columns = Vec::new();

        if is_multilang {
            select.push("b.*".to_string());
            let join = primary_keys
                .iter()
                .map(|key| format!("a.{key} = b.{key}"))
                .collect::<Vec<_>>()
                .join(" AND ");
            from.push_str(&format!(
                " LEFT JOIN {} b ON {join}",
                quote_ident(&self.db.table_name(&format!("{entity}_lang")))
            ));
        }
        if !is_association {
            select.push(format!("a.{primary_spec}"));
            if config.ordersql.is_none() {
                order_by.push(format!("a.{primary_spec}"));
            }
        }
        if is_multilang {
            if config.ordersql.is_none() {
                order_by.push("b.id_lang".to_string());
            }
            let base_columns = self.db.columns(entity, &[])?;
            lang_columns = self.db.multilang_columns(entity)?;
            // same-named columns in both tables (configuration.value)
            for column in &lang_columns {
                if base_columns.iter().any(|c| c.name == column.name) {
                    let alias = format!("{}_alias", column.name);
                    select.push(format!("a.{0} AS {0}, b.{0} AS {alias}", column.name));
                    aliases.insert(column.name.clone(), alias);
                }
            }
        }
        if let Some(ordersql) = &config.ordersql {
            order_by.push(ordersql.clone());
        }

        let mut sql = format!("SELECT {} FROM {from}", select.join(", "));
        if let Some(filter) = &config.sql {
            sql.push_str(&format!(" WHERE {filter}"));
        }
        if !order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order_by.join(", ")));
        }

        let rows = match self.db.query_rows(&sql, &[]) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::debug!(target: "seedloader", event = "export_query_failed", entity, error = %err);
                self.errors.push(format!("SQL error on query {sql}"));
                return Ok(EntityContents::default());
            }
        };

        let mut contents = EntityContents::default();
        for row in &rows {
            let id = if is_association {
                primary_keys.iter().fold(entity.to_string(), |id, key| {
                    format!("{id}_{}", row.get(key).map(String::as_str).unwrap_or_default())
                })
            } else {
                let primary = row.get(&primary_spec).cloned().unwrap_or_default();
                self.ids
                    .generate(entity, &primary, Some(row), config.id.as_deref())
            };

            if !contents.nodes.contains_key(&id) {
                let mut node = IndexMap::new();
                for field in &fields.fields {
                    let raw = row.get(&field.name).cloned().unwrap_or_default();
                    let value = match &field.relation {
                        Some(target) => self.relation_value(target, &raw),
                        None => raw,
                    };
                    node.insert(field.name.clone(), value);
                }
                contents.nodes.insert(id.clone(), node);
            }

            let id_lang = row.get("id_lang").map(String::as_str).unwrap_or_default();
            if is_multilang && !id_lang.is_empty() && id_lang != "0" {
                let Ok(id_lang) = id_lang.parse::<i64>() else {
                    continue;
                };
                let mut node = IndexMap::new();
                for column in &lang_columns {
                    let key = aliases.get(&column.name).unwrap_or(&column.name);
                    node.insert(
                        column.name.clone(),
                        row.get(key).cloned().unwrap_or_default(),
                    );
                }
                contents
                    .nodes_lang
                    .entry(id_lang)
                    .or_default()
                    .insert(id, node);
            }
        }
        Ok(contents)
    }

    /// Symbolic identifier of a referenced row. A reference to a row that
    /// does not exist keeps its raw non-zero value (e.g. `-1` parents).
    fn relation_value(&mut self, target: &str, raw: &str) -> String {
        let key = raw.trim().parse::<i64>().unwrap_or(0);
        let sql = format!(
            "SELECT {col} FROM {table} WHERE {col} = ?1",
            col = quote_ident(&format!("id_{target}")),
            table = quote_ident(&self.db.table_name(target)),
        );
        let found = self
            .db
            .query_value(&sql, params![key])
            .ok()
            .flatten()
            .unwrap_or_default();
        let id = self.ids.generate(target, &found, None, None);
        if id.is_empty() && !raw.is_empty() && raw != "0" {
            raw.to_string()
        } else {
            id
        }
    }

    /// Tags exist only in language files: one node per tag with the
    /// symbolic ids of its products.
    pub fn tag_contents(&mut self) -> LoaderResult<EntityContents> {
        let sql = format!(
            "SELECT t.id_tag, t.id_lang, t.name, pt.id_product FROM {} t LEFT JOIN {} pt ON t.id_tag = pt.id_tag ORDER BY t.id_lang, t.id_tag, pt.id_product",
            quote_ident(&self.db.table_name("tag")),
            quote_ident(&self.db.table_name("product_tag")),
        );
        let rows = self.db.query_rows(&sql, &[])?;

        let mut contents = EntityContents::default();
        for row in &rows {
            let field = |name: &str| row.get(name).cloned().unwrap_or_default();
            let Ok(id_lang) = field("id_lang").parse::<i64>() else {
                continue;
            };
            let identifier = self.ids.generate("tag", &field("id_tag"), None, None);
            let product = self.ids.generate("product", &field("id_product"), None, None);

            let node = contents
                .nodes_lang
                .entry(id_lang)
                .or_default()
                .entry(identifier)
                .or_insert_with(|| {
                    IndexMap::from([
                        ("name".to_string(), field("name")),
                        ("products".to_string(), String::new()),
                    ])
                });
            if !product.is_empty() {
                if let Some(products) = node.get_mut("products") {
                    if !products.is_empty() {
                        products.push(',');
                    }
                    products.push_str(&product);
                }
            }
        }
        Ok(contents)
    }

    fn text_columns(&mut self, entity: &str) -> LoaderResult<HashMap<String, bool>> {
        let mut columns: HashMap<String, bool> = HashMap::new();
        if self.db.tables()?.contains_key(entity) {
            for column in self.db.columns(entity, &[])? {
                columns.insert(column.name, column.is_text);
            }
            for column in self.db.multilang_columns(entity)? {
                columns.insert(column.name, column.is_text);
            }
        }
        Ok(columns)
    }

    fn load_tree(&self, entity: &str) -> LoaderResult<Element> {
        let path = self.descriptors.paths().descriptor_path(entity);
        if !path.is_file() {
            return Err(LoaderError::DescriptorMissing {
                entity: entity.to_string(),
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(&path).map_err(|err| LoaderError::io(&path, err))?;
        parse_document(&text).map_err(|err| LoaderError::DescriptorInvalid {
            entity: entity.to_string(),
            reason: err.to_string(),
        })
    }

    fn live_image_dir(&self) -> &Path {
        &self.config.image_dir
    }
}

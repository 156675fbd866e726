use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::xml::{parse_document, Element};
use crate::config::{LoaderConfig, SourcePaths};
use crate::error::{LoaderError, LoaderResult};

/// Column name to raw seed value.
pub type RowData = BTreeMap<String, String>;
/// Column name to language id to translated value.
pub type LangData = BTreeMap<String, BTreeMap<i64, String>>;

/// Which seed tree descriptors are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Common,
    Fixture,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub relation: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: None,
        }
    }

    pub fn relation(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: Some(target.into()),
        }
    }
}

/// Attributes of the `<fields>` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorConfig {
    /// Column whose value names rows when exporting.
    pub id: Option<String>,
    /// Primary key override; a comma separated list marks an association table.
    pub primary: Option<String>,
    /// Backing model class.
    pub class: Option<String>,
    pub sql: Option<String>,
    pub ordersql: Option<String>,
    /// Comma separated image subdirectories.
    pub image: Option<String>,
}

impl DescriptorConfig {
    fn from_element(fields: &Element) -> Self {
        let get = |key: &str| fields.non_empty_attr(key).map(str::to_string);
        Self {
            id: get("id"),
            primary: get("primary"),
            class: get("class"),
            sql: get("sql"),
            ordersql: get("ordersql"),
            image: get("image"),
        }
    }

    /// Set attributes in their canonical order.
    pub fn attributes(&self) -> Vec<(&'static str, &str)> {
        [
            ("id", &self.id),
            ("primary", &self.primary),
            ("class", &self.class),
            ("sql", &self.sql),
            ("ordersql", &self.ordersql),
            ("image", &self.image),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }
}

/// Schema part of a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFields {
    pub config: DescriptorConfig,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityFields {
    fn from_element(fields: &Element) -> Self {
        Self {
            config: DescriptorConfig::from_element(fields),
            fields: fields
                .children_named("field")
                .map(|field| FieldDescriptor {
                    name: field.attr("name").unwrap_or_default().to_string(),
                    relation: field.non_empty_attr("relation").map(str::to_string),
                })
                .collect(),
        }
    }

    /// `(column, target entity)` for every relation field.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation.as_deref().map(|target| (f.name.as_str(), target)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRow {
    pub id: String,
    pub values: RowData,
}

impl SeedRow {
    /// Attributes other than `id`, then child elements; a child wins over an
    /// attribute of the same name.
    fn from_element(node: &Element) -> Self {
        let mut values = RowData::new();
        for (key, value) in &node.attributes {
            if key != "id" {
                values.insert(key.clone(), value.clone());
            }
        }
        for child in &node.children {
            values.insert(child.name.clone(), child.text.clone());
        }
        Self {
            id: node.attr("id").unwrap_or_default().to_string(),
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

/// One parsed seed file. Base files carry `<fields>` and nest rows under
/// `<entities>`; per-language files list rows directly under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedDocument {
    pub entity: String,
    pub fields: Option<EntityFields>,
    pub rows: Vec<SeedRow>,
}

impl SeedDocument {
    pub fn parse(entity: &str, text: &str) -> LoaderResult<Self> {
        let root = parse_document(text).map_err(|err| LoaderError::DescriptorInvalid {
            entity: entity.to_string(),
            reason: err.to_string(),
        })?;
        let fields = root.child("fields").map(EntityFields::from_element);
        let container = root.child("entities").unwrap_or(&root);
        let rows = container
            .children_named(entity)
            .map(SeedRow::from_element)
            .collect();
        Ok(Self {
            entity: entity.to_string(),
            fields,
            rows,
        })
    }

    pub fn row(&self, id: &str) -> Option<&SeedRow> {
        self.rows.iter().find(|row| row.id == id)
    }

    pub fn image_dirs(&self) -> Option<&str> {
        self.fields.as_ref().and_then(|f| f.config.image.as_deref())
    }
}

type CacheKey = (SourceKind, String, Option<String>);

/// Reads descriptors from the active seed tree and memoises them per
/// (source, entity, language).
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    kind: SourceKind,
    common: SourcePaths,
    fixtures: SourcePaths,
    cache: HashMap<CacheKey, Rc<SeedDocument>>,
}

impl DescriptorStore {
    pub fn new(common: SourcePaths, fixtures: SourcePaths) -> Self {
        Self {
            kind: SourceKind::Common,
            common,
            fixtures,
            cache: HashMap::new(),
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(config.common.clone(), config.fixtures.clone())
    }

    pub fn use_source(&mut self, kind: SourceKind) {
        self.kind = kind;
    }

    pub fn source(&self) -> SourceKind {
        self.kind
    }

    pub fn paths(&self) -> &SourcePaths {
        match self.kind {
            SourceKind::Common => &self.common,
            SourceKind::Fixture => &self.fixtures,
        }
    }

    fn path_for(&self, entity: &str, iso: Option<&str>) -> PathBuf {
        match iso {
            Some(iso) => self.paths().translation_path(entity, iso),
            None => self.paths().descriptor_path(entity),
        }
    }

    /// Base descriptor when `iso` is `None`, otherwise that language's file.
    pub fn load(&mut self, entity: &str, iso: Option<&str>) -> LoaderResult<Rc<SeedDocument>> {
        let key = (self.kind, entity.to_string(), iso.map(str::to_string));
        if let Some(doc) = self.cache.get(&key) {
            return Ok(Rc::clone(doc));
        }

        let path = self.path_for(entity, iso);
        if !path.is_file() {
            return Err(LoaderError::DescriptorMissing {
                entity: entity.to_string(),
                path: path.display().to_string(),
            });
        }
        let text = fs::read_to_string(&path).map_err(|err| LoaderError::DescriptorInvalid {
            entity: entity.to_string(),
            reason: err.to_string(),
        })?;
        let doc = Rc::new(SeedDocument::parse(entity, &text)?);
        tracing::debug!(
            target: "seedloader",
            event = "descriptor_loaded",
            entity,
            language = iso.unwrap_or("-"),
            rows = doc.rows.len()
        );
        self.cache.insert(key, Rc::clone(&doc));
        Ok(doc)
    }

    pub fn translation_exists(&self, entity: &str, iso: &str) -> bool {
        self.paths().translation_path(entity, iso).is_file()
    }

    pub fn entity_exists(&self, entity: &str) -> bool {
        self.paths().descriptor_path(entity).is_file()
    }

    /// Drop cached documents of an entity in the active source.
    pub fn forget(&mut self, entity: &str) {
        let kind = self.kind;
        self.cache
            .retain(|(source, name, _), _| !(*source == kind && name == entity));
    }

    /// Entity names of every `*.xml` file in the data directory, sorted.
    pub fn entity_names(&self) -> LoaderResult<Vec<String>> {
        let dir = &self.paths().data_dir;
        let mut names = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                LoaderError::io(dir, source)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(entity) = file_name.strip_suffix(".xml") {
                names.push(entity.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Schema of an entity read straight from disk; an absent or unreadable
    /// descriptor yields an empty schema.
    pub fn entity_info(&self, entity: &str) -> EntityFields {
        let path = self.paths().descriptor_path(entity);
        fs::read_to_string(&path)
            .ok()
            .and_then(|text| SeedDocument::parse(entity, &text).ok())
            .and_then(|doc| doc.fields)
            .unwrap_or_default()
    }
}

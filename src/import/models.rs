use std::collections::{BTreeMap, HashMap};

use chrono::Local;
use convert_case::{Case, Casing};
use indexmap::IndexMap;
use rusqlite::params;

use super::descriptor::{LangData, RowData, SeedRow};
use super::ids::IdRegistry;
use crate::db::{quote_ident, Database};
use crate::error::{LoaderError, LoaderResult};

/// Result of saving one row. Once the base row is stored its id stands;
/// translation rows that could not be written are reported alongside.
#[derive(Debug, Default)]
pub struct Saved {
    pub id: i64,
    pub lang_errors: Vec<rusqlite::Error>,
}

impl Saved {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            lang_errors: Vec::new(),
        }
    }
}

/// Backing class of an entity: fills itself from a seed row and its
/// translations, then saves.
pub trait ObjectModel {
    fn class_name(&self) -> &str;

    fn add(&self, db: &mut Database, data: &RowData, data_lang: &LangData) -> LoaderResult<Saved>;
}

/// Model backed by the table named after the snake cased class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableModel {
    class: String,
    table: String,
}

impl TableModel {
    pub fn for_class(class: &str) -> Self {
        Self {
            class: class.to_string(),
            table: class.to_case(Case::Snake),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Keep values for real columns only; the primary key is generated.
    fn hydrate(&self, db: &mut Database, table: &str, data: &RowData) -> LoaderResult<BTreeMap<String, String>> {
        let primary = format!("id_{}", self.table);
        let columns = db.table_columns(table)?;
        let now = timestamp();
        let mut row = BTreeMap::new();
        for column in columns {
            if column.name == primary && table == self.table {
                continue;
            }
            if let Some(value) = data.get(&column.name) {
                row.insert(column.name, value.clone());
            } else if column.name == "date_add" || column.name == "date_upd" {
                row.insert(column.name, now.clone());
            }
        }
        Ok(row)
    }
}

impl ObjectModel for TableModel {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn add(&self, db: &mut Database, data: &RowData, data_lang: &LangData) -> LoaderResult<Saved> {
        let row = self.hydrate(db, &self.table, data)?;
        let mut saved = Saved::new(db.insert(&self.table, &row)?);
        if data_lang.is_empty() {
            return Ok(saved);
        }

        for (id_lang, values) in split_by_language(data_lang) {
            if let Err(err) = self.add_translation(db, saved.id, id_lang, &values) {
                match err {
                    LoaderError::Database(err) => saved.lang_errors.push(err),
                    other => return Err(other),
                }
            }
        }
        Ok(saved)
    }
}

impl TableModel {
    fn add_translation(&self, db: &mut Database, id: i64, id_lang: i64, values: &RowData) -> LoaderResult<()> {
        if !db.is_multilang(&self.table)? {
            return Ok(());
        }
        let lang_table = format!("{}_lang", self.table);
        let mut lang_row = self.hydrate(db, &lang_table, values)?;
        lang_row.insert(format!("id_{}", self.table), id.to_string());
        lang_row.insert("id_lang".to_string(), id_lang.to_string());
        db.insert(&lang_table, &lang_row)?;
        Ok(())
    }
}

/// Class name to model. Classes nobody registered resolve to a
/// [`TableModel`].
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Box<dyn ObjectModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: ObjectModel + 'static>(&mut self, model: M) {
        self.models
            .insert(model.class_name().to_string(), Box::new(model));
    }

    pub fn is_registered(&self, class: &str) -> bool {
        self.models.contains_key(class)
    }

    pub fn add(
        &self,
        class: &str,
        db: &mut Database,
        data: &RowData,
        data_lang: &LangData,
    ) -> LoaderResult<Saved> {
        match self.models.get(class) {
            Some(model) => model.add(db, data, data_lang),
            None => TableModel::for_class(class).add(db, data, data_lang),
        }
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<&String> = self.models.keys().collect();
        classes.sort();
        f.debug_struct("ModelRegistry").field("classes", &classes).finish()
    }
}

/// Turn `column -> lang -> value` into `lang -> column -> value`.
pub fn split_by_language(data_lang: &LangData) -> BTreeMap<i64, RowData> {
    let mut rows: BTreeMap<i64, RowData> = BTreeMap::new();
    for (column, values) in data_lang {
        for (id_lang, value) in values {
            rows.entry(*id_lang)
                .or_default()
                .insert(column.clone(), value.clone());
        }
    }
    rows
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Store a configuration key unless it already holds a truthy value.
/// Translations, when present, go to `configuration_lang`. Returns the id of
/// the key, or 0 when it could not be found.
pub fn create_configuration(db: &mut Database, data: &RowData, data_lang: &LangData) -> LoaderResult<i64> {
    let name = data.get("name").cloned().unwrap_or_default();
    let table = quote_ident(&db.table_name("configuration"));

    let current = db.query_value(
        &format!("SELECT value FROM {table} WHERE name = ?1"),
        params![name],
    )?;
    let is_set = current
        .as_deref()
        .map(|value| !value.is_empty() && value != "0")
        .unwrap_or(false);

    if !is_set {
        let translated = data_lang.get("value").filter(|values| !values.is_empty());
        let existing = configuration_id(db, &name)?;
        let now = timestamp();
        let value = if translated.is_some() {
            None
        } else {
            data.get("value").cloned()
        };

        let id = match existing {
            Some(id) => {
                db.connection().execute(
                    &format!("UPDATE {table} SET value = ?1, date_upd = ?2 WHERE id_configuration = ?3"),
                    params![value, now, id],
                )?;
                id
            }
            None => {
                let mut row = BTreeMap::new();
                row.insert("name".to_string(), name.clone());
                row.insert("date_add".to_string(), now.clone());
                row.insert("date_upd".to_string(), now);
                if let Some(value) = value {
                    row.insert("value".to_string(), value);
                }
                db.insert("configuration", &row)?
            }
        };

        if let Some(values) = translated {
            let lang_table = quote_ident(&db.table_name("configuration_lang"));
            for (id_lang, value) in values {
                db.connection().execute(
                    &format!(
                        "INSERT OR REPLACE INTO {lang_table} (id_configuration, id_lang, value, date_upd) VALUES (?1, ?2, ?3, ?4)"
                    ),
                    params![id, id_lang, value, timestamp()],
                )?;
            }
        }
    }

    Ok(configuration_id(db, &name)?.unwrap_or(0))
}

fn configuration_id(db: &Database, name: &str) -> LoaderResult<Option<i64>> {
    let table = quote_ident(&db.table_name("configuration"));
    let id = db.query_value(
        &format!("SELECT id_configuration FROM {table} WHERE name = ?1"),
        params![name],
    )?;
    Ok(id.and_then(|id| id.parse().ok()))
}

/// Group the tag names of per-language tag rows by resolved product id,
/// keeping first-seen product order. Unknown products are skipped.
pub fn collect_product_tags(rows: &[SeedRow], ids: &IdRegistry) -> IndexMap<i64, Vec<String>> {
    let mut tags: IndexMap<i64, Vec<String>> = IndexMap::new();
    for row in rows {
        let products = row.get("products").unwrap_or_default().trim();
        if products.is_empty() {
            continue;
        }
        let name = row.get("name").unwrap_or_default().trim().to_string();
        for product in products.split(',').map(str::trim) {
            match ids.retrieve("product", product) {
                Some(product_id) if product_id != 0 => {
                    tags.entry(product_id).or_default().push(name.clone());
                }
                _ => {
                    tracing::debug!(
                        target: "seedloader",
                        event = "tag_product_unknown",
                        product,
                        tag = %name
                    );
                }
            }
        }
    }
    tags
}

/// Attach tags to a product in one language, creating missing tags.
pub fn add_tags(db: &mut Database, id_lang: i64, id_product: i64, tags: &[String]) -> LoaderResult<()> {
    let tag_table = quote_ident(&db.table_name("tag"));
    let link_has_lang = db
        .table_columns("product_tag")?
        .iter()
        .any(|column| column.name == "id_lang");

    let mut seen = Vec::new();
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if seen.contains(&tag) {
            continue;
        }
        seen.push(tag);

        let existing = db.query_value(
            &format!("SELECT id_tag FROM {tag_table} WHERE id_lang = ?1 AND name = ?2"),
            params![id_lang, tag],
        )?;
        let id_tag = match existing.and_then(|id| id.parse::<i64>().ok()) {
            Some(id) => id,
            None => {
                let mut row = BTreeMap::new();
                row.insert("id_lang".to_string(), id_lang.to_string());
                row.insert("name".to_string(), tag.to_string());
                db.insert("tag", &row)?
            }
        };

        let mut link = BTreeMap::new();
        link.insert("id_product".to_string(), id_product.to_string());
        link.insert("id_tag".to_string(), id_tag.to_string());
        if link_has_lang {
            link.insert("id_lang".to_string(), id_lang.to_string());
        }
        db.insert_ignore("product_tag", &link)?;
    }
    Ok(())
}

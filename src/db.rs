use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};

use crate::error::LoaderResult;

/// Columns never carried by seed files: maintained by the store itself.
const MANAGED_COLUMNS: [&str; 5] = ["date_add", "date_upd", "position", "deleted", "id_lang"];

static TEXT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(longtext|text|tinytext)").expect("valid text type regex"));
static VARCHAR_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^varchar\(([0-9]+)\)$").expect("valid varchar regex"));

/// One result row, keyed by column name. A later column with the same name
/// replaces the earlier value, so `SELECT a.*, b.*, a.id` keeps `a.id`.
pub type RowMap = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub is_text: bool,
}

/// SQLite store holding the entity tables, plus the schema caches the loader
/// consults on every row.
pub struct Database {
    conn: Connection,
    prefix: String,
    tables: Option<BTreeMap<String, bool>>,
    columns: HashMap<String, Vec<Column>>,
}

impl Database {
    pub fn open(path: &Path, prefix: impl Into<String>) -> LoaderResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        tracing::info!(
            target: "seedloader",
            event = "db_open",
            path = %path.display()
        );
        Ok(Self::from_connection(conn, prefix))
    }

    pub fn open_in_memory(prefix: impl Into<String>) -> LoaderResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?, prefix))
    }

    pub fn from_connection(conn: Connection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            tables: None,
            columns: HashMap::new(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Physical table name for an entity.
    pub fn table_name(&self, entity: &str) -> String {
        format!("{}{}", self.prefix, entity)
    }

    /// Drop cached schema information after DDL.
    pub fn refresh_schema(&mut self) {
        self.tables = None;
        self.columns.clear();
    }

    /// Entities with a table in the store, mapped to whether a companion
    /// `_lang` table exists.
    pub fn tables(&mut self) -> LoaderResult<&BTreeMap<String, bool>> {
        if self.tables.is_none() {
            let mut stmt = self.conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut tables = BTreeMap::new();
            for name in names {
                let Some(rest) = name.strip_prefix(self.prefix.as_str()) else {
                    continue;
                };
                if rest.is_empty() || name.ends_with("_shop") {
                    continue;
                }
                match rest.strip_suffix("_lang") {
                    Some(base) if !base.is_empty() => {
                        tables.insert(base.to_string(), true);
                    }
                    _ => {
                        tables.entry(rest.to_string()).or_insert(false);
                    }
                }
            }
            self.tables = Some(tables);
        }
        Ok(self.tables.get_or_insert_with(BTreeMap::new))
    }

    pub fn is_multilang(&mut self, entity: &str) -> LoaderResult<bool> {
        Ok(self.tables()?.get(entity).copied().unwrap_or(false))
    }

    /// Every column of a table, in declaration order.
    pub fn table_columns(&mut self, table: &str) -> LoaderResult<Vec<Column>> {
        if let Some(cached) = self.columns.get(table) {
            return Ok(cached.clone());
        }
        let physical = self.table_name(table);
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(&physical)))?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let decl: Option<String> = row.get(2)?;
                Ok(Column {
                    name,
                    is_text: is_text_type(decl.as_deref().unwrap_or("")),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        self.columns.insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    /// Seedable columns of a table: the primary key and store-managed
    /// columns are left out, as is anything listed in `exclude`.
    pub fn columns(&mut self, table: &str, exclude: &[String]) -> LoaderResult<Vec<Column>> {
        let primary = format!("id_{table}");
        Ok(self
            .table_columns(table)?
            .into_iter()
            .filter(|column| {
                column.name != primary
                    && !MANAGED_COLUMNS.contains(&column.name.as_str())
                    && !exclude.contains(&column.name)
            })
            .collect())
    }

    /// Seedable columns of an entity's translation table, empty when the
    /// entity is not translatable.
    pub fn multilang_columns(&mut self, entity: &str) -> LoaderResult<Vec<Column>> {
        if !self.is_multilang(entity)? {
            return Ok(Vec::new());
        }
        self.columns(&format!("{entity}_lang"), &[format!("id_{entity}")])
    }

    /// `INSERT OR IGNORE` a row. Returns the new rowid, or 0 when the row was
    /// ignored.
    pub fn insert_ignore(&self, table: &str, row: &BTreeMap<String, String>) -> rusqlite::Result<i64> {
        self.insert_with("INSERT OR IGNORE", table, row)
    }

    /// Plain `INSERT`; constraint violations surface as errors.
    pub fn insert(&self, table: &str, row: &BTreeMap<String, String>) -> rusqlite::Result<i64> {
        self.insert_with("INSERT", table, row)
    }

    fn insert_with(
        &self,
        verb: &str,
        table: &str,
        row: &BTreeMap<String, String>,
    ) -> rusqlite::Result<i64> {
        let physical = quote_ident(&self.table_name(table));
        let sql = if row.is_empty() {
            format!("{verb} INTO {physical} DEFAULT VALUES")
        } else {
            let columns: Vec<String> = row.keys().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<String> = (1..=row.len()).map(|idx| format!("?{idx}")).collect();
            format!(
                "{verb} INTO {physical} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        let changed = self
            .conn
            .execute(&sql, params_from_iter(row.values()))?;
        if changed == 0 {
            return Ok(0);
        }
        Ok(self.conn.last_insert_rowid())
    }

    /// Run a query and stringify every cell. NULL becomes the empty string.
    pub fn query_rows(&self, sql: &str, params: &[&dyn ToSql]) -> rusqlite::Result<Vec<RowMap>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let rows = stmt.query_map(params, |row| {
            let mut map = RowMap::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                map.insert(name.clone(), value_to_string(row.get_ref(idx)?));
            }
            Ok(map)
        })?;
        rows.collect()
    }

    /// First column of the first row, if any.
    pub fn query_value(&self, sql: &str, params: &[&dyn ToSql]) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(sql, params, |row| Ok(value_to_string(row.get_ref(0)?)))
            .optional()
    }

    pub fn has_elements(&self, table: &str) -> rusqlite::Result<bool> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table_name(table)));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count > 0)
    }
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(v) => v.to_string(),
        ValueRef::Real(v) => v.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Long free-form columns are written as child elements rather than
/// attributes when exporting.
pub fn is_text_type(decl: &str) -> bool {
    let decl = decl.trim();
    if TEXT_TYPE.is_match(decl) {
        return true;
    }
    VARCHAR_TYPE
        .captures(decl)
        .and_then(|caps| caps.get(1))
        .and_then(|len| len.as_str().parse::<u32>().ok())
        .map(|len| len >= 64)
        .unwrap_or(false)
}

pub fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

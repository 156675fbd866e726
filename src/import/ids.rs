use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, LoaderResult};

/// Symbolic identifier to generated primary key, per entity.
///
/// Lives for one run; persisted to JSON when a run is split in steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdRegistry {
    ids: BTreeMap<String, BTreeMap<String, i64>>,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any previous id for the key.
    pub fn store(&mut self, entity: &str, identifier: &str, id: i64) {
        self.ids
            .entry(entity.to_string())
            .or_default()
            .insert(identifier.to_string(), id);
    }

    pub fn retrieve(&self, entity: &str, identifier: &str) -> Option<i64> {
        self.ids.get(entity)?.get(identifier).copied()
    }

    /// Column value for a relation field. A registered non-zero id wins;
    /// otherwise a numeric raw value is kept verbatim; otherwise "0".
    pub fn resolve_relation(&self, target: &str, raw: Option<&str>) -> String {
        let raw = raw.unwrap_or_default();
        match self.retrieve(target, raw) {
            Some(id) if id != 0 => id.to_string(),
            _ if is_numeric(raw) && raw != "0" => raw.to_string(),
            _ => "0".to_string(),
        }
    }

    pub fn entity(&self, entity: &str) -> Option<&BTreeMap<String, i64>> {
        self.ids.get(entity)
    }

    pub fn len(&self) -> usize {
        self.ids.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn load(path: &Path) -> LoaderResult<Self> {
        let text = fs::read_to_string(path).map_err(|err| LoaderError::io(path, err))?;
        serde_json::from_str(&text).map_err(|source| LoaderError::Json {
            what: format!("id registry {}", path.display()),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> LoaderResult<()> {
        let text = serde_json::to_string_pretty(self).map_err(|source| LoaderError::Json {
            what: "id registry".to_string(),
            source,
        })?;
        fs::write(path, text).map_err(|err| LoaderError::io(path, err))
    }
}

/// Decimal integer or float literal, optionally signed.
fn is_numeric(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

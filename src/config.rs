use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TABLE_PREFIX: &str = "ps_";
pub const DEFAULT_BASE_LANGUAGE: &str = "en";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An installed language: numeric id as stored in `id_lang` plus its iso code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub id: i64,
    pub iso: String,
}

impl Language {
    pub fn new(id: i64, iso: impl Into<String>) -> Self {
        Self {
            id,
            iso: iso.into(),
        }
    }
}

/// Where descriptors, per-language files and seed images are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePaths {
    pub data_dir: PathBuf,
    pub langs_dir: PathBuf,
    pub img_dir: PathBuf,
}

impl SourcePaths {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        langs_dir: impl Into<PathBuf>,
        img_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            langs_dir: langs_dir.into(),
            img_dir: img_dir.into(),
        }
    }

    pub fn descriptor_path(&self, entity: &str) -> PathBuf {
        self.data_dir.join(format!("{entity}.xml"))
    }

    pub fn translation_dir(&self, iso: &str) -> PathBuf {
        self.langs_dir.join(iso).join("data")
    }

    pub fn translation_path(&self, entity: &str, iso: &str) -> PathBuf {
        self.translation_dir(iso).join(format!("{entity}.xml"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageType {
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderConfig {
    pub database: PathBuf,
    pub table_prefix: String,
    pub languages: Vec<Language>,
    pub base_language: String,
    pub common: SourcePaths,
    pub fixtures: SourcePaths,
    pub image_dir: PathBuf,
    pub image_types: Vec<ImageType>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("store.sqlite3"),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            languages: vec![Language::new(1, DEFAULT_BASE_LANGUAGE)],
            base_language: DEFAULT_BASE_LANGUAGE.to_string(),
            common: SourcePaths::new("install/data/xml", "install/langs", "install/data/img"),
            fixtures: SourcePaths::new(
                "install/fixtures/apple/data",
                "install/fixtures/apple/langs",
                "install/fixtures/apple/img",
            ),
            image_dir: PathBuf::from("img"),
            image_types: Vec::new(),
        }
    }
}

impl LoaderConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            tracing::debug!(
                target: "seedloader",
                event = "config_default",
                path = %path.display()
            );
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn image_types_for(&self, scope: &str) -> Vec<ImageType> {
        self.image_types
            .iter()
            .filter(|t| t.scopes.iter().any(|s| s == scope))
            .cloned()
            .collect()
    }

    /// Id of the fallback language, when it is installed.
    pub fn base_language_id(&self) -> Option<i64> {
        self.languages
            .iter()
            .find(|lang| lang.iso == self.base_language)
            .map(|lang| lang.id)
    }

    pub fn language_iso(&self, id: i64) -> Option<&str> {
        self.languages
            .iter()
            .find(|lang| lang.id == id)
            .map(|lang| lang.iso.as_str())
    }
}

use serde::Serialize;
use thiserror::Error;

/// Failures that abort the current run.
///
/// Row level persistence problems and image problems are not represented
/// here; they are collected in an [`ErrorSink`] and the run carries on.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("XML data file {entity}.xml not found ({path})")]
    DescriptorMissing { entity: String, path: String },
    #[error("XML data file {entity}.xml invalid: {reason}")]
    DescriptorInvalid { entity: String, reason: String },
    #[error("list of fields not found for entity {0}")]
    FieldsMissing(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        LoaderError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Ordered list of human readable messages produced during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorSink {
    messages: Vec<String>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "seedloader", event = "loader_error", message = %message);
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }
}

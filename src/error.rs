use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while constructing the knowledge layer.
///
/// Lookups never fail: a miss is an empty result or the `[none]` type. These
/// errors only surface when an index or the ontology cannot be brought up.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("neither index {index} nor its source dump {source_path} exists")]
    MissingSource { index: PathBuf, source_path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("persisted index {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("index exceeds the limit of {limit} {what}")]
    Capacity { what: &'static str, limit: u64 },

    #[error("ontology contains a cycle through type \"{node}\"")]
    OntologyCycle { node: String },
}

impl KnowledgeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;

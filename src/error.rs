use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Whole-file failures. Per-record problems never end up here: they are
/// collected as issues on the ledger, measurement set or resolution outcome.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode TOON table in {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: toon_format::ToonError,
    },

    #[error("failed to encode {what} as TOON")]
    Encode {
        what: &'static str,
        #[source]
        source: toon_format::ToonError,
    },

    #[error("failed to serialize run report")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Persistence for cached engine-creation arguments.
//!
//! The cache is a single strict-JSON file. Reads distinguish "the file could
//! not be accessed" from "the file held data the schema rejects" so callers
//! can report the two differently.

use prewarm_core::EngineCreationArguments;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised by the argument cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The cache file could not be read or written.
    #[error("cannot access argument cache {path}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The cache file exists but its contents do not match the schema.
    #[error("argument cache {path} holds malformed data")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Write `args` to `path`, replacing any previous cache atomically enough
/// for a single-writer host (plain truncate-and-write).
pub fn write_arguments(path: &Path, args: &EngineCreationArguments) -> Result<(), StoreError> {
    // Serializing a plain struct cannot fail here, but the error still maps
    // cleanly onto Malformed if a future field breaks that assumption.
    let json = serde_json::to_string_pretty(args).map_err(|source| StoreError::Malformed {
        path: path.display().to_string(),
        source,
    })?;
    fs::write(path, json).map_err(|source| StoreError::Storage {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

/// Read a previously cached `EngineCreationArguments` from `path`.
pub fn read_arguments(path: &Path) -> Result<EngineCreationArguments, StoreError> {
    let json = fs::read_to_string(path).map_err(|source| StoreError::Storage {
        path: path.display().to_string(),
        source,
    })?;
    let args = serde_json::from_str(&json).map_err(|source| StoreError::Malformed {
        path: path.display().to_string(),
        source,
    })?;
    Ok(args)
}

//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::{ForgeError, StorageError};

/// Map domain errors to a one-line message with a hint where one helps.
pub fn map_error(e: &ForgeError) -> String {
    match e {
        ForgeError::StorageError(StorageError::ConcurrentWriter(path)) => format!(
            "{} is being written by another operation; retry when it finishes",
            path.display()
        ),
        ForgeError::ProviderError(msg) => format!("Provider not available: {}", msg),
        other => other.to_string(),
    }
}

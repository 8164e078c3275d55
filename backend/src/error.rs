use std::path::PathBuf;

use common::validation::ValidationError;
use thiserror::Error;

/// Configuration problems. Fatal at startup; on hot reload the previous
/// configuration stays active.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

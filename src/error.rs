use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the scanner
///
/// Network conditions met while probing a target are never represented
/// here; they are folded into `ProbeOutcome` and `ScanResult` instead.
#[derive(Error, Debug)]
pub enum ScoutError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corrupt blocklist {path}:{line}: {reason}")]
    Blocklist {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Failed to read blocklist {path}: {source}")]
    BlocklistIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Target errors
    #[error("Invalid scan target: {0}")]
    InvalidTarget(String),
}

/// Result type alias for scanner operations
pub type Result<T> = std::result::Result<T, ScoutError>;

impl ScoutError {
    /// Whether this error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScoutError::InvalidConfig(_)
                | ScoutError::Blocklist { .. }
                | ScoutError::BlocklistIo { .. }
        )
    }
}

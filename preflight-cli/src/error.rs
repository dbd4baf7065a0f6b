//! CLI error types.

use thiserror::Error;

/// Errors surfaced to the terminal with an exit code of 1.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid command-line input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A module load failed during simulation.
    #[error("load failed: {0}")]
    Load(#[from] preflight::LoadError),

    /// Report serialization failed.
    #[error("could not serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

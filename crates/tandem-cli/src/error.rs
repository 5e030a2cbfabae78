use std::io;

use tandem_core::config::ConfigError;
use tandem_core::ResourceKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tandem_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("No operation provided. Pass it as an argument, with --file, or on stdin")]
    EmptyOperation,
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Operation rejected: resource is at version {current_version}; fetch the new state and resubmit")]
    Rejected { current_version: u64 },
    #[error("Replaying the operation log of {0} does not reproduce the stored document")]
    VerifyFailed(ResourceKey),
}

impl CliError {
    /// Process exit status for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Rejected { .. } => 2,
            _ => 1,
        }
    }
}

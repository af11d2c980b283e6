//! Error types for mdchain-core

use std::path::PathBuf;

use thiserror::Error;

use crate::stage::Step;

/// Process exit status used for every fatal error.
pub const FAILURE_EXIT_CODE: u8 = 1;

/// Errors that abort a chain. None of them are retried.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Manifest file does not exist
    #[error("Manifest not found: {}", .path.display())]
    ConfigurationMissing { path: PathBuf },

    /// Data directory, initial coordinates or topology does not exist
    #[error("Missing {what}: {}", .path.display())]
    PrerequisiteMissing { what: &'static str, path: PathBuf },

    /// Mutually exclusive options were requested together
    #[error("Conflicting options: {0}")]
    ConfigurationConflict(String),

    /// Multi-process mode requested without a usable host list
    #[error("Environment variable {variable} {reason}; multi-process mode needs a host list")]
    EnvironmentMissing { variable: String, reason: String },

    /// An external collaborator reported failure
    #[error("Stage '{stage}' failed during the {step} step: {}", describe_exit(.exit_code))]
    StageFailed {
        stage: String,
        step: Step,
        exit_code: Option<i32>,
    },

    /// An external collaborator could not be started
    #[error("Stage '{stage}' could not launch {program} for the {step} step: {source}")]
    Launch {
        stage: String,
        step: Step,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error while resolving stages
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stage name that cannot be used to derive file names
    #[error("Invalid stage name: {0:?}")]
    InvalidStage(String),
}

impl ChainError {
    /// Exit status the binary reports for this error.
    pub fn exit_code(&self) -> u8 {
        FAILURE_EXIT_CODE
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChainError::Io {
            path: path.into(),
            source,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Result type for chain operations
pub type ChainResult<T> = std::result::Result<T, ChainError>;

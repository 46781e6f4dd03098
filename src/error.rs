// src/error.rs

//! Error types for the cellar build pipeline
//!
//! Every variant is terminal for the pipeline run that produced it. The
//! orchestrator wraps them in a [`CookFailure`](crate::recipe::CookFailure)
//! together with the stage that failed.

use crate::recipe::kitchen::taste::TestFailure;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Patch {index} ({id}) failed to apply: {reason}")]
    PatchFailed {
        index: usize,
        id: String,
        reason: String,
    },

    #[error("Build step {step} failed ({}):\n{output}", describe_exit(*exit_code))]
    BuildFailed {
        step: usize,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("{0}")]
    TestFailed(Box<TestFailure>),

    #[error("Dependency not found: {name} ({phase})")]
    DependencyNotFound { name: String, phase: String },

    #[error("Invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("Missing variable: %({0})s")]
    MissingVariable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid pipeline transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, Error>;

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated or timed out".to_string(),
    }
}

impl From<crate::hash::VerifyError> for Error {
    fn from(e: crate::hash::VerifyError) -> Self {
        Error::ChecksumMismatch {
            expected: format!("{}:{}", e.algorithm, e.expected),
            actual: format!("{}:{}", e.algorithm, e.actual),
        }
    }
}

impl From<TestFailure> for Error {
    fn from(failure: TestFailure) -> Self {
        Error::TestFailed(Box::new(failure))
    }
}

//! Crate-wide error type
//!
//! Each subsystem owns a typed error (`ResolutionError`, `ParseError`,
//! `ValidationErrors`, `GraphError`, `LogError`, `BackendError`). They all
//! convert into [`Error`], which carries a numeric code that is rendered as
//! `[E####]` in user-facing messages.

use std::path::PathBuf;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

use crate::compiler::GraphError;
use crate::imports::ResolutionError;
use crate::model::ValidationErrors;
use crate::parser::ParseError;
use crate::safe_outputs::{BackendError, LogError};

/// The unified error type for compilation and the safe-outputs runtime
#[derive(Error, Debug)]
pub enum Error {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("[E{code:04}] Compile error: {message}")]
    Compile { code: u16, message: String },

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a configuration error with a specific code and file path
    pub fn config_at(code: u16, message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            path: Some(path.into()),
            source: None,
        }
    }

    /// Create a compile error with a specific code
    pub fn compile(code: u16, message: impl Into<String>) -> Self {
        Self::Compile {
            code,
            message: message.into(),
        }
    }

    /// Attach an underlying error as the source
    pub fn with_source(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        if let Self::Config { source, .. } = &mut self {
            *source = Some(Box::new(err));
        }
        self
    }

    /// Numeric code of this error
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. } | Self::Compile { code, .. } => *code,
            Self::Resolution(err) => err.code(),
            Self::Parse(err) => err.code(),
            Self::Validation(_) => ErrorCode::VALIDATION_FAILED,
            Self::Graph(err) => err.code(),
            Self::Log(err) => err.code(),
            Self::Backend(_) => ErrorCode::BACKEND_FAILED,
            Self::Io(_) => ErrorCode::RUNTIME_GENERIC,
        }
    }

    /// True for errors that block pipeline emission
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            Self::Resolution(_)
                | Self::Parse(_)
                | Self::Validation(_)
                | Self::Graph(_)
                | Self::Compile { .. }
        )
    }
}

//! Error types for tilestore-core

use crate::location::Backend;
use thiserror::Error;

/// Boxed error kept as the source of a backend failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by every storage operation
#[derive(Error, Debug)]
pub enum Error {
    /// The address string could not be parsed into a location
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The file or object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An explicit cluster host was requested but is not configured
    #[error("Unknown S3 cluster: {0}")]
    UnknownCluster(String),

    /// The backend (or backend pair) cannot perform this operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Connectivity, permission or malformed-response failure from a backend
    #[error("{backend} storage error: {message}")]
    Storage {
        /// Backend that failed
        backend: Backend,
        /// What was being done
        message: String,
        /// Native error, when there is one
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn storage(backend: Backend, message: impl Into<String>) -> Self {
        Self::Storage {
            backend,
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        backend: Backend,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Storage {
            backend,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Wrap an I/O failure on a local path, keeping absence distinct
    pub(crate) fn from_io(err: std::io::Error, what: impl std::fmt::Display) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(what.to_string())
        } else {
            Self::storage_with_source(Backend::File, what.to_string(), err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::NotFound(_) => std::io::ErrorKind::NotFound,
            Error::InvalidAddress(_) => std::io::ErrorKind::InvalidInput,
            Error::UnsupportedOperation(_) => std::io::ErrorKind::Unsupported,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

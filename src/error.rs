//! Common error types used throughout metascribe.
//!
//! The taxonomy separates transport failures (network / upstream status),
//! resolution failures (unknown library, series, provider), the distinct
//! malformed-embedded-metadata class raised when writing metadata back into a
//! backend's content format, and reconfiguration failures.

use crate::ids::{LibraryId, SeriesId};

/// Common error type for metascribe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A network or upstream call failed. Carries the HTTP status when the
    /// upstream responded at all.
    #[error("Transport error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// No configured backend owns the given library.
    #[error("Unknown library: {0}")]
    UnknownLibrary(LibraryId),

    /// The backend does not know the given series.
    #[error("Unknown series: {0}")]
    UnknownSeries(SeriesId),

    /// No provider with the given name is configured.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// No media-server backend is configured at all.
    #[error("No media server backend is configured")]
    NoBackendConfigured,

    /// No configured provider produced a usable match.
    #[error("No provider match: {0}")]
    NoMatch(String),

    /// Writing metadata into the backend's embedded format failed because the
    /// existing embedded metadata is malformed. Distinct from transport
    /// errors so the boundary layer can map it separately.
    #[error("Malformed embedded metadata: {0}")]
    MalformedEmbeddedMetadata(String),

    /// Building a new service generation from updated configuration failed.
    /// The previous generation remains active.
    #[error("Reconfiguration failed: {0}")]
    Reconfiguration(String),

    /// The operation was dispatched against a generation that has been
    /// retired by a completed reconfiguration.
    #[error("Service generation has been retired")]
    GenerationRetired,

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid configuration was provided or could not be parsed.
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Create a Transport error without an upstream status.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport {
            status: None,
            message: msg.into(),
        }
    }

    /// Create a Transport error carrying the upstream HTTP status and body.
    pub fn upstream<S: Into<String>>(status: u16, body: S) -> Self {
        Self::Transport {
            status: Some(status),
            message: body.into(),
        }
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Reconfiguration error.
    pub fn reconfiguration<S: Into<String>>(msg: S) -> Self {
        Self::Reconfiguration(msg.into())
    }

    /// Create a new MalformedEmbeddedMetadata error.
    pub fn malformed_embedded<S: Into<String>>(msg: S) -> Self {
        Self::MalformedEmbeddedMetadata(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

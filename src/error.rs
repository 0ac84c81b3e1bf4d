use std::sync::Arc;

use thiserror::Error;

/// Represents a result type for operations in the Skylab client.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Skylab client.
///
/// Variant lookups never fail, so these errors only surface from the building blocks (fetcher,
/// storage, identity store) and in log messages.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid server URL configuration.
    #[error("invalid server_url configuration")]
    InvalidServerUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// Server responded with a non-success status code.
    #[error("unexpected response status: {0}")]
    UnexpectedStatus(u16),

    /// Transport failure, no response was received.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Response body is not a JSON object of flag variants.
    #[error("error parsing variants response")]
    ResponseParse(#[source] Arc<serde_json::Error>),

    /// User context could not be serialized.
    #[error("error serializing user context")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// Encoded user context is not valid base64url JSON.
    #[error("invalid encoded user context")]
    InvalidEncodedContext,

    /// Persisted data could not be decoded.
    #[error("corrupt data in storage")]
    Storage(#[source] Arc<serde_json::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

//! Error types for the netcache client.
//!
//! # Design
//! `ApiError` is the only error a caller ever sees, and one value of it is
//! fanned out to every waiter registered under a fingerprint, so it is
//! `Clone` and carries owned strings instead of source errors.
//!
//! Cache and cipher failures have their own types (`CacheError`,
//! `CipherError`). The coordinator logs them and carries on; they never reach
//! a waiter.

use thiserror::Error;

/// Errors delivered to callers through `Pending` futures or callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The gate reports no connectivity and no cached payload was usable.
    #[error("no network connection and no cached data")]
    NoConnection,

    /// The exchange failed at the transport level or returned a non-2xx status.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The payload did not match the expected shape.
    #[error("deserialization failed: {0}")]
    Decode(String),

    /// The request parameters could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Root URL and path do not form a valid absolute URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The exchange was cancelled before it produced an outcome.
    #[error("request cancelled")]
    Cancelled,

    /// The coordinator could not be assembled.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A downloaded body could not be stored as a file.
    #[error("storing download failed: {0}")]
    Download(String),
}

impl ApiError {
    /// HTTP status code, when the failure came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Transport(TransportError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Failures of a single HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request or resource timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Connection, TLS or protocol failure below HTTP.
    #[error("network error: {0}")]
    Network(String),
}

/// Failures of the cache store. Logged, never surfaced to waiters.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache document is malformed: {0}")]
    Format(String),

    #[error("record for {0} is encrypted but no cipher is configured")]
    MissingCipher(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("cache writer thread is unavailable")]
    WriterGone,
}

/// Failures of the at-rest cipher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("ciphertext too short")]
    Truncated,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,
}

/// Failures while loading `ClientConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_exposed_for_http_failures() {
        let err = ApiError::from(TransportError::Status {
            status: 503,
            body: "busy".to_string(),
        });
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "HTTP 503: busy");
    }

    #[test]
    fn status_is_absent_for_other_failures() {
        assert_eq!(ApiError::NoConnection.status(), None);
        assert_eq!(ApiError::from(TransportError::Timeout).status(), None);
    }
}

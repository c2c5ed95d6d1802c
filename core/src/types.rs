//! Payloads and response models.
//!
//! # Design
//! The coordinator moves raw bytes. A `Payload` is what one exchange (or one
//! cache read) produced, shared by every waiter of a fan-out through a
//! reference-counted `Bytes`. Decoding into a caller's type happens per waiter.

use std::path::PathBuf;

use bytes::Bytes;
use serde::de::DeserializeOwned;

/// Suffix appended to a model's storage identifier to form its cache identity.
pub const STORAGE_SUFFIX: &str = ".client.store";

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    Network,
    Cache,
}

/// Raw response bytes plus their origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: Bytes,
    pub source: PayloadSource,
    /// Where the body was stored, for download calls.
    pub file: Option<PathBuf>,
}

impl Payload {
    pub fn network(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            source: PayloadSource::Network,
            file: None,
        }
    }

    pub fn cached(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            source: PayloadSource::Cache,
            file: None,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.source == PayloadSource::Cache
    }
}

/// Whether a successful response is kept as last-known-good data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Persistence {
    /// Never written to the cache. Offline calls still read whatever is
    /// stored under the identity.
    #[default]
    None,
    /// Written to the cache after a 2xx response.
    Cache,
}

/// A response model that can be cached.
///
/// `STORAGE_IDENTIFIER` names the default cache slot for the model, shared by
/// single-object and collection responses.
pub trait Resource: DeserializeOwned + Send + 'static {
    const STORAGE_IDENTIFIER: &'static str;

    /// Cache identity: the override if any, otherwise
    /// `"<STORAGE_IDENTIFIER>.client.store"`.
    fn storage_identity(cache_key: Option<&str>) -> String {
        match cache_key {
            Some(key) => key.to_string(),
            None => format!("{}{STORAGE_SUFFIX}", Self::STORAGE_IDENTIFIER),
        }
    }
}

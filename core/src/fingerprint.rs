//! Logical request identity.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::params::Params;
use crate::transfer::FileUpload;

/// Deterministic identity of a logical request: the full path followed by the
/// SHA-256 of the canonical parameter JSON.
///
/// The HTTP method is deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(path: &str, params: &Params) -> Self {
        let digest = Sha256::digest(params.canonical_json().as_bytes());
        Fingerprint(format!("{path}#{}", hex::encode(digest)))
    }

    /// Like `new`, with the upload's metadata and bytes hashed after the
    /// parameters, so different files sent to the same endpoint never
    /// coalesce.
    pub fn with_upload(path: &str, params: &Params, upload: &FileUpload) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(params.canonical_json().as_bytes());
        hasher.update([0u8]);
        upload.digest_into(&mut hasher);
        Fingerprint(format!("{path}#{}", hex::encode(hasher.finalize())))
    }

    /// Rebuild a fingerprint from its string form, e.g. one handed out over FFI.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Fingerprint(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path part, everything before the last `#`.
    pub fn path(&self) -> &str {
        self.0.rsplit_once('#').map_or(self.0.as_str(), |(path, _)| path)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

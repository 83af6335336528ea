//! Deterministic cache keys for render requests

use crate::error::RepoServeResult;
use crate::source::{ManifestRequest, RepoRef, SourceDescriptor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 over the canonical JSON form of a normalized request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

/// Fields that identify a render; struct order fixes the encoding
#[derive(Serialize)]
struct CanonicalRequest<'a> {
    repo: &'a RepoRef,
    source: &'a SourceDescriptor,
    revision: &'a str,
    namespace: &'a str,
    app_name: &'a str,
    app_label_key: &'a str,
    schemes: Vec<String>,
}

impl Fingerprint {
    /// Compute the fingerprint of `request` at the resolved `revision`.
    ///
    /// `no_cache` and `verify_signature` do not contribute. Schemes are
    /// lower-cased, sorted and deduplicated first.
    pub fn compute(
        request: &ManifestRequest,
        revision: &str,
        allowed_schemes: &[String],
    ) -> RepoServeResult<Self> {
        let mut schemes: Vec<String> = allowed_schemes
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .collect();
        schemes.sort();
        schemes.dedup();

        let canonical = CanonicalRequest {
            repo: &request.repo,
            source: &request.source,
            revision,
            namespace: &request.namespace,
            app_name: &request.app_name,
            app_label_key: &request.app_label_key,
            schemes,
        };
        let bytes = serde_json::to_vec(&canonical)?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

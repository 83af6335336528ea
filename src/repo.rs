//! Repository checkout boundary
//!
//! Fetching, checkout and locking of repositories live behind [`RepoCheckout`].
//! [`LocalCheckout`] serves an existing working directory.

use crate::error::{RepoServeError, RepoServeResult};
use crate::source::RepoRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Commit metadata attached to generated manifest sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionMetadata {
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    pub message: String,
}

/// A repository checked out at a resolved revision
#[derive(Debug, Clone)]
pub struct Checkout {
    /// Working directory root
    pub root: PathBuf,

    /// Resolved revision (commit SHA for git)
    pub revision: String,
    pub metadata: RevisionMetadata,
}

/// Repository checkout seam
#[async_trait]
pub trait RepoCheckout: Send + Sync {
    /// Check out `repo` at `revision` and resolve the revision
    async fn checkout(&self, repo: &RepoRef, revision: &str) -> RepoServeResult<Checkout>;

    /// Signature verification output for the checked-out commit
    async fn verify_signature(&self, checkout: &Checkout) -> RepoServeResult<String>;
}

/// Serves a working directory that is already on disk
#[derive(Debug, Clone)]
pub struct LocalCheckout {
    root: PathBuf,
    metadata: RevisionMetadata,
}

impl LocalCheckout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            metadata: RevisionMetadata::default(),
        }
    }

    /// Attach commit metadata reported for every checkout
    pub fn with_metadata(mut self, metadata: RevisionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl RepoCheckout for LocalCheckout {
    async fn checkout(&self, repo: &RepoRef, revision: &str) -> RepoServeResult<Checkout> {
        let is_dir = tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(RepoServeError::PathNotFound(self.root.clone()));
        }

        let revision = if revision.is_empty() { "HEAD" } else { revision };
        debug!(repo = %repo.url, revision = %revision, "Serving local checkout");

        Ok(Checkout {
            root: self.root.clone(),
            revision: revision.to_string(),
            metadata: self.metadata.clone(),
        })
    }

    async fn verify_signature(&self, _checkout: &Checkout) -> RepoServeResult<String> {
        Ok("local working directory has no commit signatures".to_string())
    }
}

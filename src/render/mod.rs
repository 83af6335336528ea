//! Renderer dispatch and manifest normalization
//!
//! Every file a backend will read is validated through the sandbox before the
//! backend runs. Backend execution goes through a [`ToolAdapter`], and output
//! is normalized into a [`ManifestSet`] with per-manifest provenance.

mod dispatch;
pub mod env;
pub mod parse;
pub mod tool;

pub use dispatch::{RenderContext, Renderer};
pub use tool::{
    ChartLocation, CommandTool, Destination, HelmInvocation, JsonnetInvocation,
    KsonnetInvocation, KustomizeInvocation, PluginInvocation, ToolAdapter, ToolInvocation,
    ToolOutput,
};

use crate::source::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One rendered resource with provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Compact JSON with sorted keys
    pub content: String,

    /// Path relative to the application directory (or template path)
    pub source_path: String,

    /// 1-based line where the document starts
    pub source_line: usize,
}

/// Ordered result of one successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSet {
    pub manifests: Vec<Manifest>,
    pub namespace: String,
    pub server: String,
    pub revision: String,
    pub commit_author: String,
    pub commit_date: Option<DateTime<Utc>>,
    pub commit_message: String,
    pub source_type: BackendKind,

    /// Signature verification text; attached per request, never cached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_result: Option<String>,
}

impl ManifestSet {
    /// Number of manifests
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

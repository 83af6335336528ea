//! Backend selection for a source descriptor

use super::SourceDescriptor;
use crate::error::{RepoServeError, RepoServeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Configuration-management backend used to render a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BackendKind {
    Helm,
    Kustomize,
    Ksonnet,
    Plugin,
    Directory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Helm => "Helm",
            Self::Kustomize => "Kustomize",
            Self::Ksonnet => "Ksonnet",
            Self::Plugin => "Plugin",
            Self::Directory => "Directory",
        };
        f.write_str(name)
    }
}

/// Pick the backend for `source` given the file names at its path.
///
/// Explicit blocks win over marker files, and plain directories are the
/// fallback.
pub fn detect(source: &SourceDescriptor, listing: &[String]) -> BackendKind {
    if let Some(kind) = explicit_kind(source) {
        return kind;
    }

    let has = |markers: &[&str]| {
        listing
            .iter()
            .any(|name| markers.iter().any(|m| name.eq_ignore_ascii_case(m)))
    };

    let kind = if has(&["app.yaml"]) {
        BackendKind::Ksonnet
    } else if has(&["Chart.yaml"]) {
        BackendKind::Helm
    } else if has(&["kustomization.yaml", "kustomization.yml", "Kustomization"]) {
        BackendKind::Kustomize
    } else {
        BackendKind::Directory
    };

    debug!(backend = %kind, "Detected backend from marker files");
    kind
}

fn explicit_kind(source: &SourceDescriptor) -> Option<BackendKind> {
    if source.plugin.is_some() {
        Some(BackendKind::Plugin)
    } else if source.chart.as_deref().is_some_and(|c| !c.is_empty()) || source.helm.is_some() {
        Some(BackendKind::Helm)
    } else if source.kustomize.is_some() {
        Some(BackendKind::Kustomize)
    } else if source.ksonnet.is_some() {
        Some(BackendKind::Ksonnet)
    } else if source.directory.is_some() {
        Some(BackendKind::Directory)
    } else {
        None
    }
}

/// File names directly inside `dir`, sorted
pub async fn list_dir(dir: &Path) -> RepoServeResult<Vec<String>> {
    let listing_error = |e: std::io::Error| RepoServeError::io(format!("listing {}", dir.display()), e);
    let mut entries = tokio::fs::read_dir(dir).await.map_err(listing_error)?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(listing_error)? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

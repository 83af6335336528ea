//! Application source descriptors and render requests

pub mod detect;

pub use detect::{detect, list_dir, BackendKind};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of repository a source points at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    /// Git repository checked out to a working directory
    #[default]
    Git,
    /// Helm chart repository serving packaged charts
    Helm,
}

/// Repository reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub url: String,
    #[serde(default)]
    pub kind: RepoKind,
}

impl RepoRef {
    pub fn git(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: RepoKind::Git,
        }
    }

    pub fn helm(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: RepoKind::Helm,
        }
    }
}

/// Declarative description of where an application's manifests come from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDescriptor {
    pub repo_url: String,

    /// Application directory relative to the repository root
    pub path: String,

    /// Branch, tag, commit or chart version constraint
    pub target_revision: String,

    /// Chart name for charts served from a Helm repository
    pub chart: Option<String>,

    pub helm: Option<HelmSource>,
    pub kustomize: Option<KustomizeSource>,
    pub directory: Option<DirectorySource>,
    pub ksonnet: Option<KsonnetSource>,
    pub plugin: Option<PluginSource>,
}

/// Helm rendering options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmSource {
    /// Value files, relative to the app directory or remote URLs
    pub value_files: Vec<String>,

    /// Inline values document
    pub values: String,

    /// `--set name=value` parameters
    pub parameters: Vec<HelmParameter>,

    /// `--set-file name=path` parameters
    pub file_parameters: Vec<HelmFileParameter>,

    /// Release name (defaults to the application name)
    pub release_name: String,

    /// Skip value files that do not exist instead of failing
    pub ignore_missing_value_files: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmParameter {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub force_string: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmFileParameter {
    pub name: String,
    pub path: String,
}

/// Kustomize rendering options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KustomizeSource {
    pub name_prefix: String,
    pub name_suffix: String,

    /// Image overrides such as `nginx=nginx:1.25`
    pub images: Vec<String>,

    pub common_labels: BTreeMap<String, String>,
}

/// Plain directory rendering options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySource {
    pub recurse: bool,
    pub include: String,
    pub exclude: String,
    pub jsonnet: JsonnetSource,
}

/// Jsonnet evaluation options for `.jsonnet` files in a directory source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonnetSource {
    pub ext_vars: Vec<JsonnetVar>,
    pub tlas: Vec<JsonnetVar>,

    /// Library search directories, relative to the repository root
    pub libs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonnetVar {
    pub name: String,
    pub value: String,
    /// Pass the value as jsonnet code rather than a string
    #[serde(default)]
    pub code: bool,
}

/// Legacy environment-based rendering options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KsonnetSource {
    pub environment: String,
}

/// External plugin rendering options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSource {
    pub name: String,
    pub env: Vec<EnvEntry>,
}

/// Environment variable passed to a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

/// One manifest generation request
#[derive(Debug, Clone, Default)]
pub struct ManifestRequest {
    pub repo: RepoRef,
    pub source: SourceDescriptor,

    /// Revision to check out; falls back to the source's target revision
    pub revision: String,

    pub app_name: String,
    pub namespace: String,

    /// Label key used to track application resources
    pub app_label_key: String,

    /// Skip the cache read (the result is still written)
    pub no_cache: bool,

    /// Attach commit signature verification output to the result
    pub verify_signature: bool,

    /// Remote value-file schemes; `None` uses the configured default
    pub values_file_schemes: Option<Vec<String>>,
}

impl ManifestRequest {
    /// Revision to resolve, preferring the explicit request revision
    pub fn effective_revision(&self) -> &str {
        if self.revision.is_empty() {
            &self.source.target_revision
        } else {
            &self.revision
        }
    }

    /// Source repository URL, falling back to the request's repository
    pub fn repo_url(&self) -> &str {
        if self.source.repo_url.is_empty() {
            &self.repo.url
        } else {
            &self.source.repo_url
        }
    }

    /// Chart name when the source is a packaged chart in a Helm repository
    pub fn remote_chart(&self) -> Option<&str> {
        match (&self.repo.kind, self.source.chart.as_deref()) {
            (RepoKind::Helm, Some(chart)) if !chart.is_empty() => Some(chart),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_revision_prefers_request() {
        let mut request = ManifestRequest {
            source: SourceDescriptor {
                target_revision: "main".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(request.effective_revision(), "main");

        request.revision = "abc123".to_string();
        assert_eq!(request.effective_revision(), "abc123");
    }

    #[test]
    fn remote_chart_requires_helm_repo() {
        let mut request = ManifestRequest {
            repo: RepoRef::git("https://example.com/repo.git"),
            source: SourceDescriptor {
                chart: Some("redis".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(request.remote_chart(), None);

        request.repo = RepoRef::helm("https://charts.example.com");
        assert_eq!(request.remote_chart(), Some("redis"));
        assert_eq!(request.repo_url(), "https://charts.example.com");
    }

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let source: SourceDescriptor = serde_json::from_str(
            r#"{"path":"app","helm":{"value_files":["values.yaml"]}}"#,
        )
        .unwrap();
        assert_eq!(source.path, "app");
        let helm = source.helm.unwrap();
        assert_eq!(helm.value_files, vec!["values.yaml"]);
        assert!(!helm.ignore_missing_value_files);
    }
}

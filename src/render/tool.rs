//! Backend tool execution
//!
//! `ToolAdapter` is the seam between dispatch and the configuration management
//! binaries. Everything passed through it has already been sandbox-checked.

use crate::error::{RepoServeError, RepoServeResult};
use crate::source::{HelmParameter, JsonnetVar};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Max number of error output lines surfaced from a failed tool
const ERROR_TAIL_LINES: usize = 50;

/// Where a Helm chart comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartLocation {
    /// Chart directory inside the checkout
    Local(PathBuf),

    /// Packaged chart in a Helm repository
    Remote {
        repo_url: String,
        chart: String,
        version: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmInvocation {
    pub chart: ChartLocation,
    pub release_name: String,
    pub namespace: String,

    /// Validated local paths or allowed remote URLs, in order
    pub value_files: Vec<String>,

    /// Inline values document
    pub values: String,
    pub parameters: Vec<HelmParameter>,

    /// `name` and validated path pairs
    pub file_parameters: Vec<(String, PathBuf)>,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KustomizeInvocation {
    pub app_dir: PathBuf,
    pub name_prefix: String,
    pub name_suffix: String,
    pub images: Vec<String>,
    pub common_labels: BTreeMap<String, String>,
}

impl KustomizeInvocation {
    /// Whether any override has to be layered over the app's kustomization
    pub fn has_overrides(&self) -> bool {
        !self.name_prefix.is_empty()
            || !self.name_suffix.is_empty()
            || !self.images.is_empty()
            || !self.common_labels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonnetInvocation {
    pub file: PathBuf,
    pub ext_vars: Vec<JsonnetVar>,
    pub tlas: Vec<JsonnetVar>,

    /// Validated library directories
    pub libs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KsonnetInvocation {
    pub app_dir: PathBuf,

    /// Validated `app.yaml` inside the checkout
    pub app_file: PathBuf,
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInvocation {
    pub name: String,
    pub app_dir: PathBuf,
    pub init: Option<Vec<String>>,
    pub generate: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// One backend execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    Helm(HelmInvocation),
    Kustomize(KustomizeInvocation),
    Jsonnet(JsonnetInvocation),
    Ksonnet(KsonnetInvocation),
    Plugin(PluginInvocation),
}

impl ToolInvocation {
    /// Tool name used in errors and logs
    pub fn tool_name(&self) -> &str {
        match self {
            Self::Helm(_) => "helm",
            Self::Kustomize(_) => "kustomize",
            Self::Jsonnet(_) => "jsonnet",
            Self::Ksonnet(_) => "ks",
            Self::Plugin(p) => &p.name,
        }
    }
}

/// Deployment target reported by environment-based backends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destination {
    pub namespace: String,
    pub server: String,
}

/// Raw backend output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Rendered YAML or JSON stream
    pub text: String,

    /// Provenance for documents without a `# Source:` comment
    pub default_path: Option<String>,

    pub destination: Option<Destination>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Backend execution seam
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Adapter name for logs
    fn name(&self) -> &str;

    /// Execute a backend invocation
    async fn run(&self, invocation: &ToolInvocation) -> RepoServeResult<ToolOutput>;

    /// Versions of `chart` published in the Helm repository at `repo_url`
    async fn chart_versions(&self, repo_url: &str, chart: &str) -> RepoServeResult<Vec<String>>;
}

/// Runs the backend binaries as subprocesses
#[derive(Debug, Clone)]
pub struct CommandTool {
    timeout: Duration,
    helm: String,
    kustomize: String,
    jsonnet: String,
    ks: String,
}

impl CommandTool {
    /// Create a command tool with the default binary names
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            helm: "helm".to_string(),
            kustomize: "kustomize".to_string(),
            jsonnet: "jsonnet".to_string(),
            ks: "ks".to_string(),
        }
    }

    /// Override the helm binary
    pub fn with_helm(mut self, helm: impl Into<String>) -> Self {
        self.helm = helm.into();
        self
    }

    /// Override the kustomize binary
    pub fn with_kustomize(mut self, kustomize: impl Into<String>) -> Self {
        self.kustomize = kustomize.into();
        self
    }

    /// Execute a command under the exec timeout, returning stdout
    async fn exec(
        &self,
        tool: &str,
        argv: &[String],
        cwd: &Path,
        env: Option<&[(String, String)]>,
    ) -> RepoServeResult<String> {
        let Some((program, args)) = argv.split_first() else {
            return Err(RepoServeError::tool(tool, "empty command"));
        };
        debug!("Executing: {} {:?}", program, args);

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = env {
            command.env_clear();
            if let Some(path) = std::env::var_os("PATH") {
                command.env("PATH", path);
            }
            command.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                RepoServeError::Transient(format!(
                    "{} timed out after {}s",
                    tool,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| RepoServeError::command_failed(program.clone(), e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RepoServeError::tool(tool, error_output(&stdout, &stderr)))
        }
    }

    async fn helm_template(&self, helm: &HelmInvocation) -> RepoServeResult<ToolOutput> {
        let mut argv = vec![self.helm.clone(), "template".to_string(), helm.release_name.clone()];

        match &helm.chart {
            ChartLocation::Local(dir) => argv.push(dir.display().to_string()),
            ChartLocation::Remote {
                repo_url,
                chart,
                version,
            } => {
                argv.push(chart.clone());
                argv.extend(["--repo".to_string(), repo_url.clone()]);
                if !version.is_empty() {
                    argv.extend(["--version".to_string(), version.clone()]);
                }
            }
        }

        if !helm.namespace.is_empty() {
            argv.extend(["--namespace".to_string(), helm.namespace.clone()]);
        }
        for file in &helm.value_files {
            argv.extend(["--values".to_string(), file.clone()]);
        }

        // Held until the command finishes
        let inline_values = if helm.values.trim().is_empty() {
            None
        } else {
            let mut file = tempfile::Builder::new()
                .prefix("values-")
                .suffix(".yaml")
                .tempfile()
                .map_err(|e| RepoServeError::io("creating inline values file", e))?;
            file.write_all(helm.values.as_bytes())
                .map_err(|e| RepoServeError::io("writing inline values file", e))?;
            argv.extend(["--values".to_string(), file.path().display().to_string()]);
            Some(file)
        };

        for param in &helm.parameters {
            let flag = if param.force_string { "--set-string" } else { "--set" };
            argv.extend([flag.to_string(), format!("{}={}", param.name, param.value)]);
        }
        for (name, path) in &helm.file_parameters {
            argv.extend(["--set-file".to_string(), format!("{}={}", name, path.display())]);
        }

        let text = self.exec("helm", &argv, &helm.work_dir, None).await?;
        drop(inline_values);
        Ok(ToolOutput::text(text))
    }

    /// Build the app's kustomization.
    ///
    /// Overrides are applied to a temporary overlay that lists the app dir as
    /// its only resource, so the checkout is never edited.
    async fn kustomize_build(&self, kustomize: &KustomizeInvocation) -> RepoServeResult<ToolOutput> {
        let app_dir = &kustomize.app_dir;
        if !kustomize.has_overrides() {
            let argv = vec![
                self.kustomize.clone(),
                "build".to_string(),
                app_dir.display().to_string(),
            ];
            let text = self.exec("kustomize", &argv, app_dir, None).await?;
            return Ok(ToolOutput::text(text));
        }

        let overlay = tempfile::Builder::new()
            .prefix("kustomize-")
            .tempdir()
            .map_err(|e| RepoServeError::io("creating kustomize overlay", e))?;
        let dir = overlay.path();
        write_overlay(dir, app_dir).await?;

        let edit = |args: Vec<String>| {
            let mut argv = vec![self.kustomize.clone(), "edit".to_string()];
            argv.extend(args);
            argv
        };

        if !kustomize.name_prefix.is_empty() {
            let argv = edit(vec![
                "set".into(),
                "nameprefix".into(),
                "--".into(),
                kustomize.name_prefix.clone(),
            ]);
            self.exec("kustomize", &argv, dir, None).await?;
        }
        if !kustomize.name_suffix.is_empty() {
            let argv = edit(vec![
                "set".into(),
                "namesuffix".into(),
                "--".into(),
                kustomize.name_suffix.clone(),
            ]);
            self.exec("kustomize", &argv, dir, None).await?;
        }
        if !kustomize.images.is_empty() {
            let mut args = vec!["set".to_string(), "image".to_string()];
            args.extend(kustomize.images.iter().cloned());
            self.exec("kustomize", &edit(args), dir, None).await?;
        }
        if !kustomize.common_labels.is_empty() {
            let labels = kustomize
                .common_labels
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            let argv = edit(vec!["add".into(), "label".into(), "--force".into(), labels]);
            self.exec("kustomize", &argv, dir, None).await?;
        }

        // The overlay lives outside the app dir it pulls in
        let argv = vec![
            self.kustomize.clone(),
            "build".to_string(),
            dir.display().to_string(),
            "--load-restrictor".to_string(),
            "LoadRestrictionsNone".to_string(),
        ];
        let text = self.exec("kustomize", &argv, dir, None).await?;
        drop(overlay);
        Ok(ToolOutput::text(text))
    }

    async fn jsonnet_eval(&self, jsonnet: &JsonnetInvocation) -> RepoServeResult<ToolOutput> {
        let mut argv = vec![self.jsonnet.clone()];
        for lib in &jsonnet.libs {
            argv.extend(["--jpath".to_string(), lib.display().to_string()]);
        }
        for var in &jsonnet.ext_vars {
            let flag = if var.code { "--ext-code" } else { "--ext-str" };
            argv.extend([flag.to_string(), format!("{}={}", var.name, var.value)]);
        }
        for var in &jsonnet.tlas {
            let flag = if var.code { "--tla-code" } else { "--tla-str" };
            argv.extend([flag.to_string(), format!("{}={}", var.name, var.value)]);
        }
        argv.push(jsonnet.file.display().to_string());

        let cwd = jsonnet.file.parent().unwrap_or(Path::new("/"));
        let text = self.exec("jsonnet", &argv, cwd, None).await?;
        Ok(ToolOutput::text(text))
    }

    async fn ksonnet_show(&self, ksonnet: &KsonnetInvocation) -> RepoServeResult<ToolOutput> {
        let dir = &ksonnet.app_dir;
        let argv = vec![self.ks.clone(), "show".to_string(), ksonnet.environment.clone()];
        let text = self.exec("ks", &argv, dir, None).await?;

        let destination = ksonnet_destination(&ksonnet.app_file, &ksonnet.environment).await?;
        Ok(ToolOutput {
            text,
            default_path: None,
            destination: Some(destination),
        })
    }

    async fn plugin_generate(&self, plugin: &PluginInvocation) -> RepoServeResult<ToolOutput> {
        if let Some(init) = &plugin.init {
            self.exec(&plugin.name, init, &plugin.app_dir, Some(&plugin.env))
                .await?;
        }
        let text = self
            .exec(&plugin.name, &plugin.generate, &plugin.app_dir, Some(&plugin.env))
            .await?;
        Ok(ToolOutput::text(text))
    }

    /// Fetch `index.yaml` from a Helm repository
    async fn fetch_index(&self, repo_url: &str) -> RepoServeResult<String> {
        let url = format!("{}/index.yaml", repo_url.trim_end_matches('/'));
        debug!("Fetching chart index {}", url);

        let fetch = tokio::task::spawn_blocking({
            let url = url.clone();
            move || -> Result<String, ureq::Error> {
                ureq::get(&url).call()?.body_mut().read_to_string()
            }
        });

        tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| RepoServeError::Transient(format!("fetching {} timed out", url)))?
            .map_err(|e| RepoServeError::Internal(format!("index fetch task failed: {}", e)))?
            .map_err(|e| RepoServeError::tool("helm", format!("failed to fetch {}: {}", url, e)))
    }
}

#[async_trait]
impl ToolAdapter for CommandTool {
    fn name(&self) -> &str {
        "command"
    }

    async fn run(&self, invocation: &ToolInvocation) -> RepoServeResult<ToolOutput> {
        match invocation {
            ToolInvocation::Helm(helm) => self.helm_template(helm).await,
            ToolInvocation::Kustomize(kustomize) => self.kustomize_build(kustomize).await,
            ToolInvocation::Jsonnet(jsonnet) => self.jsonnet_eval(jsonnet).await,
            ToolInvocation::Ksonnet(ksonnet) => self.ksonnet_show(ksonnet).await,
            ToolInvocation::Plugin(plugin) => self.plugin_generate(plugin).await,
        }
    }

    async fn chart_versions(&self, repo_url: &str, chart: &str) -> RepoServeResult<Vec<String>> {
        let index = self.fetch_index(repo_url).await?;
        chart_versions_from_index(&index, chart)
    }
}

/// Versions listed for `chart` in a Helm repository index
pub fn chart_versions_from_index(index: &str, chart: &str) -> RepoServeResult<Vec<String>> {
    let index: serde_yaml::Value = serde_yaml::from_str(index)?;
    let versions = index
        .get("entries")
        .and_then(|entries| entries.get(chart))
        .and_then(serde_yaml::Value::as_sequence)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("version").and_then(serde_yaml::Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(versions)
}

/// Overlay kustomization pulling in the app directory
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Overlay {
    api_version: &'static str,
    kind: &'static str,
    resources: Vec<String>,
}

async fn write_overlay(dir: &Path, app_dir: &Path) -> RepoServeResult<()> {
    let overlay = Overlay {
        api_version: "kustomize.config.k8s.io/v1beta1",
        kind: "Kustomization",
        resources: vec![app_dir.display().to_string()],
    };
    tokio::fs::write(dir.join("kustomization.yaml"), serde_yaml::to_string(&overlay)?)
        .await
        .map_err(|e| RepoServeError::io("writing kustomize overlay", e))
}

/// Read an environment's destination from a validated ksonnet `app.yaml`
async fn ksonnet_destination(app_file: &Path, environment: &str) -> RepoServeResult<Destination> {
    let content = tokio::fs::read_to_string(app_file)
        .await
        .map_err(|e| RepoServeError::io("reading app.yaml", e))?;
    let app: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|_| RepoServeError::malformed("app.yaml", "invalid YAML"))?;

    let destination = app
        .get("environments")
        .and_then(|envs| envs.get(environment))
        .and_then(|env| env.get("destination"));
    let field = |name: &str| {
        destination
            .and_then(|d| d.get(name))
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(Destination {
        namespace: field("namespace"),
        server: field("server"),
    })
}

/// Tail of combined tool output for error messages
fn error_output(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = source.lines().collect();
    let total = lines.len();
    let tail = if total > ERROR_TAIL_LINES {
        &lines[total - ERROR_TAIL_LINES..]
    } else {
        &lines[..]
    };
    tail.join("\n")
}

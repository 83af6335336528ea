//! Backend dispatch with up-front reference validation

use super::env::plugin_env;
use super::parse::{decode_text, parse_json, parse_yaml_stream, ParseMode};
use super::tool::{
    ChartLocation, Destination, HelmInvocation, JsonnetInvocation, KsonnetInvocation,
    KustomizeInvocation, PluginInvocation, ToolAdapter, ToolInvocation,
};
use super::{Manifest, ManifestSet};
use crate::config::PluginConfig;
use crate::error::{RepoServeError, RepoServeResult};
use crate::repo::Checkout;
use crate::sandbox::{find_manifest_files, ResolvedRef, Sandbox, ScanOptions};
use crate::source::{detect, list_dir, BackendKind, ManifestRequest};
use semver::{Version, VersionReq};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Placeholder for the checkout root in surfaced tool errors
const REDACTED_ROOT: &str = "<repo>";

/// Inputs for rendering one request
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub checkout: &'a Checkout,
    pub request: &'a ManifestRequest,

    /// Resolved revision (chart version for Helm repositories)
    pub revision: &'a str,

    /// URL schemes allowed for remote value files
    pub allowed_schemes: &'a [String],
}

/// Validates references and runs the selected backend
pub struct Renderer {
    tool: Arc<dyn ToolAdapter>,
    plugins: Vec<PluginConfig>,
}

impl Renderer {
    pub fn new(tool: Arc<dyn ToolAdapter>, plugins: Vec<PluginConfig>) -> Self {
        Self { tool, plugins }
    }

    /// Pick the backend from the descriptor and the files at the app path
    pub async fn detect(&self, ctx: &RenderContext<'_>) -> RepoServeResult<BackendKind> {
        let source = &ctx.request.source;
        if ctx.request.remote_chart().is_some() {
            return Ok(detect(source, &[]));
        }

        let local = Sandbox::new(&ctx.checkout.root, &[]);
        let app_dir = app_dir(&local, ctx)?;
        let listing = if is_dir(&app_dir).await {
            list_dir(&app_dir).await?
        } else {
            Vec::new()
        };
        Ok(detect(source, &listing))
    }

    /// Resolve a chart version constraint to the highest published match.
    ///
    /// Exact versions are returned unchanged without consulting the repository.
    pub async fn resolve_chart_version(
        &self,
        repo_url: &str,
        chart: &str,
        constraint: &str,
    ) -> RepoServeResult<String> {
        let constraint = constraint.trim();
        if let Ok(exact) = Version::parse(constraint.trim_start_matches('v')) {
            return Ok(exact.to_string());
        }

        let req = if constraint.is_empty() {
            VersionReq::STAR
        } else {
            VersionReq::parse(constraint).map_err(|e| {
                RepoServeError::User(format!(
                    "invalid chart version constraint '{}': {}",
                    constraint, e
                ))
            })?
        };

        let versions = self.tool.chart_versions(repo_url, chart).await?;
        let resolved = versions
            .iter()
            .filter_map(|v| {
                Version::parse(v.trim_start_matches('v'))
                    .ok()
                    .map(|parsed| (parsed, v))
            })
            .filter(|(parsed, _)| req.matches(parsed))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| RepoServeError::ChartVersionNotFound {
                chart: chart.to_string(),
                constraint: constraint.to_string(),
            })?;

        debug!(chart = %chart, constraint = %constraint, version = %resolved, "Resolved chart version");
        Ok(resolved)
    }

    /// Render `kind` for the request in `ctx`.
    ///
    /// All references are validated before the backend runs, so a rejected
    /// reference never reaches a tool.
    pub async fn render(
        &self,
        kind: BackendKind,
        ctx: &RenderContext<'_>,
    ) -> RepoServeResult<ManifestSet> {
        let values = Sandbox::new(&ctx.checkout.root, ctx.allowed_schemes);
        let local = Sandbox::new(&ctx.checkout.root, &[]);
        let app_dir = app_dir(&local, ctx)?;

        if ctx.request.remote_chart().is_none() && !is_dir(&app_dir).await {
            return Err(RepoServeError::MissingReference {
                path: display_path(&ctx.request.source.path),
            });
        }

        info!(backend = %kind, path = %display_path(&ctx.request.source.path), "Rendering manifests");

        let rendered = match kind {
            BackendKind::Directory => self
                .render_directory(&local, &app_dir, ctx)
                .await
                .map(|m| (m, None)),
            BackendKind::Helm => self.render_helm(&values, &local, &app_dir, ctx).await,
            BackendKind::Kustomize => self.render_kustomize(&app_dir, ctx).await,
            BackendKind::Ksonnet => self.render_ksonnet(&local, &app_dir, ctx).await,
            BackendKind::Plugin => self.render_plugin(&app_dir, ctx).await,
        };

        let roots = [
            local.root().display().to_string(),
            ctx.checkout.root.display().to_string(),
        ];
        let (manifests, destination) = rendered.map_err(|e| redact(e, &roots))?;
        let destination = destination.unwrap_or_default();

        let namespace = if destination.namespace.is_empty() {
            ctx.request.namespace.clone()
        } else {
            destination.namespace
        };

        debug!("Rendered {} manifests", manifests.len());
        Ok(ManifestSet {
            manifests,
            namespace,
            server: destination.server,
            revision: ctx.revision.to_string(),
            commit_author: ctx.checkout.metadata.author.clone(),
            commit_date: ctx.checkout.metadata.date,
            commit_message: ctx.checkout.metadata.message.clone(),
            source_type: kind,
            verify_result: None,
        })
    }

    async fn render_directory(
        &self,
        local: &Sandbox,
        app_dir: &Path,
        ctx: &RenderContext<'_>,
    ) -> RepoServeResult<Vec<Manifest>> {
        let directory = ctx.request.source.directory.clone().unwrap_or_default();

        let mut libs = Vec::new();
        for lib in &directory.jsonnet.libs {
            libs.push(local_path(local, local.root(), lib, "library")?);
        }

        let options = ScanOptions {
            recurse: directory.recurse,
            include: directory.include.clone(),
            exclude: directory.exclude.clone(),
        };
        let files = {
            let (local, app_dir) = (local.clone(), app_dir.to_path_buf());
            tokio::task::spawn_blocking(move || find_manifest_files(&local, &app_dir, &options))
                .await
                .map_err(|e| RepoServeError::Internal(format!("manifest scan failed: {}", e)))??
        };

        let mut manifests = Vec::new();
        for file in files {
            let parsed = match file.extension().as_str() {
                "jsonnet" => {
                    let invocation = ToolInvocation::Jsonnet(JsonnetInvocation {
                        file: file.path.clone(),
                        ext_vars: directory.jsonnet.ext_vars.clone(),
                        tlas: directory.jsonnet.tlas.clone(),
                        libs: libs.clone(),
                    });
                    let output = self.tool.run(&invocation).await?;
                    parse_json(&output.text, &file.relative)?
                }
                extension => {
                    let bytes = tokio::fs::read(&file.path)
                        .await
                        .map_err(|e| RepoServeError::io(format!("reading {}", file.relative), e))?;
                    let text = decode_text(&bytes, &file.relative)?;
                    if extension == "json" {
                        parse_json(&text, &file.relative)?
                    } else {
                        parse_yaml_stream(&text, &file.relative, ParseMode::Lenient)?
                    }
                }
            };
            manifests.extend(parsed);
        }

        Ok(manifests)
    }

    async fn render_helm(
        &self,
        values: &Sandbox,
        local: &Sandbox,
        app_dir: &Path,
        ctx: &RenderContext<'_>,
    ) -> RepoServeResult<(Vec<Manifest>, Option<Destination>)> {
        let helm = ctx.request.source.helm.clone().unwrap_or_default();
        let remote_chart = ctx.request.remote_chart();

        // Remote charts resolve value files against the repository root
        let base_dir = if remote_chart.is_some() {
            local.root()
        } else {
            app_dir
        };

        let mut value_files = Vec::new();
        for file in &helm.value_files {
            match values.resolve_from(base_dir, file) {
                Err(rejection) => {
                    return Err(RepoServeError::path_escape(
                        format!("value file '{}'", file),
                        rejection,
                    ))
                }
                Ok(ResolvedRef::Remote(url)) => value_files.push(url),
                Ok(ResolvedRef::Local(path)) => {
                    if exists(&path).await {
                        value_files.push(path.display().to_string());
                    } else if helm.ignore_missing_value_files {
                        debug!("Skipping missing value file {}", file);
                    } else {
                        return Err(RepoServeError::MissingReference { path: file.clone() });
                    }
                }
            }
        }

        let mut file_parameters = Vec::new();
        for param in &helm.file_parameters {
            let path = local_path(local, base_dir, &param.path, "file parameter")?;
            if !exists(&path).await {
                return Err(RepoServeError::MissingReference {
                    path: param.path.clone(),
                });
            }
            file_parameters.push((param.name.clone(), path));
        }

        let chart = match remote_chart {
            Some(chart) => ChartLocation::Remote {
                repo_url: ctx.request.repo_url().to_string(),
                chart: chart.to_string(),
                version: ctx.revision.to_string(),
            },
            None => ChartLocation::Local(app_dir.to_path_buf()),
        };

        let release_name = [helm.release_name.as_str(), ctx.request.app_name.as_str()]
            .into_iter()
            .find(|name| !name.is_empty())
            .unwrap_or("release")
            .to_string();

        let invocation = ToolInvocation::Helm(HelmInvocation {
            chart,
            release_name,
            namespace: ctx.request.namespace.clone(),
            value_files,
            values: helm.values.clone(),
            parameters: helm.parameters.clone(),
            file_parameters,
            work_dir: if remote_chart.is_some() {
                local.root().to_path_buf()
            } else {
                app_dir.to_path_buf()
            },
        });

        let default_path = remote_chart
            .map(str::to_string)
            .unwrap_or_else(|| display_path(&ctx.request.source.path));
        self.run_and_parse(&invocation, &default_path).await
    }

    async fn render_kustomize(
        &self,
        app_dir: &Path,
        ctx: &RenderContext<'_>,
    ) -> RepoServeResult<(Vec<Manifest>, Option<Destination>)> {
        let kustomize = ctx.request.source.kustomize.clone().unwrap_or_default();
        let invocation = ToolInvocation::Kustomize(KustomizeInvocation {
            app_dir: app_dir.to_path_buf(),
            name_prefix: kustomize.name_prefix,
            name_suffix: kustomize.name_suffix,
            images: kustomize.images,
            common_labels: kustomize.common_labels,
        });
        self.run_and_parse(&invocation, &display_path(&ctx.request.source.path))
            .await
    }

    async fn render_ksonnet(
        &self,
        local: &Sandbox,
        app_dir: &Path,
        ctx: &RenderContext<'_>,
    ) -> RepoServeResult<(Vec<Manifest>, Option<Destination>)> {
        let app_file = local_path(local, app_dir, "app.yaml", "ksonnet app")?;

        let environment = ctx
            .request
            .source
            .ksonnet
            .as_ref()
            .map(|k| k.environment.clone())
            .filter(|env| !env.is_empty())
            .unwrap_or_else(|| "default".to_string());

        let invocation = ToolInvocation::Ksonnet(KsonnetInvocation {
            app_dir: app_dir.to_path_buf(),
            app_file,
            environment,
        });
        self.run_and_parse(&invocation, &display_path(&ctx.request.source.path))
            .await
    }

    async fn render_plugin(
        &self,
        app_dir: &Path,
        ctx: &RenderContext<'_>,
    ) -> RepoServeResult<(Vec<Manifest>, Option<Destination>)> {
        let name = ctx
            .request
            .source
            .plugin
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let plugin = self
            .plugins
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| RepoServeError::PluginNotFound(name.clone()))?;

        let invocation = ToolInvocation::Plugin(PluginInvocation {
            name: plugin.name.clone(),
            app_dir: app_dir.to_path_buf(),
            init: plugin.init.as_ref().map(|init| init.argv()),
            generate: plugin.generate.argv(),
            env: plugin_env(ctx.request, ctx.revision),
        });
        self.run_and_parse(&invocation, &display_path(&ctx.request.source.path))
            .await
    }

    async fn run_and_parse(
        &self,
        invocation: &ToolInvocation,
        default_path: &str,
    ) -> RepoServeResult<(Vec<Manifest>, Option<Destination>)> {
        let output = self.tool.run(invocation).await?;
        let default_path = output.default_path.as_deref().unwrap_or(default_path);
        let manifests = parse_yaml_stream(&output.text, default_path, ParseMode::Strict)?;
        Ok((manifests, output.destination))
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Resolve the application directory inside the checkout
fn app_dir(local: &Sandbox, ctx: &RenderContext<'_>) -> RepoServeResult<PathBuf> {
    let path = display_path(&ctx.request.source.path);
    local_path(local, local.root(), &path, "app path")
}

/// Resolve a reference that must be a local path inside the root
fn local_path(
    local: &Sandbox,
    base_dir: &Path,
    reference: &str,
    label: &str,
) -> RepoServeResult<PathBuf> {
    match local.resolve_from(base_dir, reference) {
        Ok(ResolvedRef::Local(path)) => Ok(path),
        Ok(ResolvedRef::Remote(url)) => Err(RepoServeError::path_escape(
            format!("{} '{}'", label, url),
            "is not a local path",
        )),
        Err(rejection) => Err(RepoServeError::path_escape(
            format!("{} '{}'", label, reference),
            rejection,
        )),
    }
}

fn display_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Replace checkout root paths in tool-provided text
fn redact(err: RepoServeError, roots: &[String]) -> RepoServeError {
    let scrub = |text: String| {
        roots
            .iter()
            .filter(|root| root.len() > 1)
            .fold(text, |text, root| text.replace(root.as_str(), REDACTED_ROOT))
    };

    match err {
        RepoServeError::Tool { tool, message } => RepoServeError::Tool {
            tool,
            message: scrub(message),
        },
        RepoServeError::MalformedOutput {
            source_path,
            reason,
        } => RepoServeError::MalformedOutput {
            source_path,
            reason: scrub(reason),
        },
        other => other,
    }
}

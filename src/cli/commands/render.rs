//! Render command - generate manifests from a local checkout

use crate::cli::args::{OutputFormat, RenderArgs};
use crate::config::Config;
use crate::error::{RepoServeError, RepoServeResult};
use crate::render::{CommandTool, ManifestSet};
use crate::repo::LocalCheckout;
use crate::service::ManifestService;
use crate::source::{
    DirectorySource, EnvEntry, HelmParameter, HelmSource, ManifestRequest, PluginSource, RepoRef,
    SourceDescriptor,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Execute the render command
pub async fn execute(args: RenderArgs, config: &Config) -> RepoServeResult<()> {
    let root = std::path::absolute(&args.root)
        .map_err(|e| RepoServeError::io(format!("resolving {}", args.root.display()), e))?;
    let repo_url = format!("file://{}", root.display());

    let checkout = Arc::new(LocalCheckout::new(&root));
    let tool = Arc::new(CommandTool::new(config.generation.exec_timeout()));
    let service = ManifestService::new(checkout, tool, config);

    let request = build_request(&args, repo_url)?;
    debug!(path = %args.path, "Rendering local application");

    let set = service.generate_manifest(request).await?;
    info!(
        "Rendered {} manifests with {}",
        set.len(),
        set.source_type
    );

    print!("{}", format_output(&set, args.format)?);
    Ok(())
}

/// Translate command line flags into a generation request
fn build_request(args: &RenderArgs, repo_url: String) -> RepoServeResult<ManifestRequest> {
    let helm = if args.values.is_empty() && args.set.is_empty() && !args.ignore_missing_values {
        None
    } else {
        let parameters = args
            .set
            .iter()
            .map(|pair| {
                let (name, value) = split_pair(pair, "--set")?;
                Ok(HelmParameter {
                    name,
                    value,
                    force_string: false,
                })
            })
            .collect::<RepoServeResult<Vec<_>>>()?;
        Some(HelmSource {
            value_files: args.values.clone(),
            parameters,
            release_name: args.app_name.clone(),
            ignore_missing_value_files: args.ignore_missing_values,
            ..Default::default()
        })
    };

    let plugin = match &args.plugin {
        Some(name) => {
            let env = args
                .env
                .iter()
                .map(|pair| {
                    let (name, value) = split_pair(pair, "--env")?;
                    Ok(EnvEntry { name, value })
                })
                .collect::<RepoServeResult<Vec<_>>>()?;
            Some(PluginSource {
                name: name.clone(),
                env,
            })
        }
        None => None,
    };

    let directory = if args.recurse || !args.include.is_empty() || !args.exclude.is_empty() {
        Some(DirectorySource {
            recurse: args.recurse,
            include: args.include.clone(),
            exclude: args.exclude.clone(),
            ..Default::default()
        })
    } else {
        None
    };

    Ok(ManifestRequest {
        repo: RepoRef::git(repo_url.clone()),
        source: SourceDescriptor {
            repo_url,
            path: args.path.clone(),
            target_revision: args.revision.clone(),
            helm,
            directory,
            plugin,
            ..Default::default()
        },
        revision: args.revision.clone(),
        app_name: args.app_name.clone(),
        namespace: args.namespace.clone(),
        ..Default::default()
    })
}

fn split_pair(pair: &str, flag: &str) -> RepoServeResult<(String, String)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(RepoServeError::User(format!(
            "{} expects NAME=VALUE, got '{}'",
            flag, pair
        ))),
    }
}

/// Serialize the manifest set for stdout
fn format_output(set: &ManifestSet, format: OutputFormat) -> RepoServeResult<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(set)?)),
        OutputFormat::Yaml => {
            let mut out = String::new();
            for manifest in &set.manifests {
                let value: serde_json::Value = serde_json::from_str(&manifest.content)?;
                out.push_str("---\n");
                out.push_str(&format!(
                    "# Source: {}:{}\n",
                    manifest.source_path, manifest.source_line
                ));
                out.push_str(&serde_yaml::to_string(&value)?);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{Cli, Commands};
    use crate::render::Manifest;
    use crate::source::BackendKind;
    use clap::Parser;

    fn render_args(extra: &[&str]) -> RenderArgs {
        let mut argv = vec!["reposerve", "render"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Render(args) => args,
            _ => panic!("expected render"),
        }
    }

    #[test]
    fn plain_flags_build_bare_source() {
        let request = build_request(&render_args(&["--path", "app"]), "file:///r".into()).unwrap();
        assert_eq!(request.source.path, "app");
        assert!(request.source.helm.is_none());
        assert!(request.source.plugin.is_none());
        assert!(request.source.directory.is_none());
    }

    #[test]
    fn helm_flags_build_helm_source() {
        let args = render_args(&[
            "--values",
            "values-prod.yaml",
            "--set",
            "image.tag=1.2=3",
            "--app-name",
            "redis",
        ]);
        let request = build_request(&args, "file:///r".into()).unwrap();
        let helm = request.source.helm.unwrap();
        assert_eq!(helm.value_files, vec!["values-prod.yaml"]);
        assert_eq!(helm.parameters[0].name, "image.tag");
        assert_eq!(helm.parameters[0].value, "1.2=3");
        assert_eq!(helm.release_name, "redis");
    }

    #[test]
    fn plugin_env_requires_pair() {
        let args = render_args(&["--plugin", "cdk8s", "--env", "NOVALUE"]);
        let err = build_request(&args, "file:///r".into()).unwrap_err();
        assert!(err.to_string().contains("--env expects NAME=VALUE"));
    }

    #[test]
    fn yaml_output_keeps_provenance() {
        let set = ManifestSet {
            manifests: vec![Manifest {
                content: r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"a"}}"#
                    .to_string(),
                source_path: "app/cm.yaml".to_string(),
                source_line: 4,
            }],
            namespace: String::new(),
            server: String::new(),
            revision: "HEAD".to_string(),
            commit_author: String::new(),
            commit_date: None,
            commit_message: String::new(),
            source_type: BackendKind::Directory,
            verify_result: None,
        };

        let out = format_output(&set, OutputFormat::Yaml).unwrap();
        assert!(out.starts_with("---\n# Source: app/cm.yaml:4\n"));
        assert!(out.contains("kind: ConfigMap"));
    }
}

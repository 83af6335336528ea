//! Detect command - report which backend would render an application

use crate::cli::args::DetectArgs;
use crate::config::Config;
use crate::error::RepoServeResult;
use crate::render::{CommandTool, RenderContext, Renderer};
use crate::repo::{LocalCheckout, RepoCheckout};
use crate::source::{ManifestRequest, RepoRef, SourceDescriptor};
use std::sync::Arc;

/// Execute the detect command
pub async fn execute(args: DetectArgs, config: &Config) -> RepoServeResult<()> {
    let repo = RepoRef::git(format!("file://{}", args.root.display()));
    let checkout = LocalCheckout::new(&args.root).checkout(&repo, "").await?;

    let request = ManifestRequest {
        repo,
        source: SourceDescriptor {
            path: args.path.clone(),
            ..Default::default()
        },
        ..Default::default()
    };
    let renderer = Renderer::new(
        Arc::new(CommandTool::new(config.generation.exec_timeout())),
        config.plugins.clone(),
    );
    let ctx = RenderContext {
        checkout: &checkout,
        request: &request,
        revision: &checkout.revision,
        allowed_schemes: &config.sandbox.allowed_schemes,
    };

    println!("{}", renderer.detect(&ctx).await?);
    Ok(())
}

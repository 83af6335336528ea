//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// reposerve - sandboxed manifest generation
///
/// Renders deployable manifests from a repository checkout through Helm,
/// Kustomize, Jsonnet, Ksonnet or a plugin, with every file reference kept
/// inside the repository.
#[derive(Parser, Debug)]
#[command(name = "reposerve")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "REPOSERVE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render manifests for an application in a local checkout
    Render(RenderArgs),

    /// Print the backend that would render an application
    Detect(DetectArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the render command
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Repository checkout root
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Application path relative to the root
    #[arg(short, long, default_value = "")]
    pub path: String,

    /// Revision reported for the checkout
    #[arg(long, default_value = "")]
    pub revision: String,

    /// Helm value file (repeatable)
    #[arg(long = "values", value_name = "FILE")]
    pub values: Vec<String>,

    /// Helm parameter as name=value (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub set: Vec<String>,

    /// Skip Helm value files that do not exist
    #[arg(long)]
    pub ignore_missing_values: bool,

    /// Render with the named config management plugin
    #[arg(long)]
    pub plugin: Option<String>,

    /// Plugin environment entry as NAME=VALUE (repeatable)
    #[arg(long = "env", value_name = "NAME=VALUE")]
    pub env: Vec<String>,

    /// Recurse into subdirectories for plain directory sources
    #[arg(long)]
    pub recurse: bool,

    /// Glob of files to include for directory sources
    #[arg(long, default_value = "")]
    pub include: String,

    /// Glob of files to exclude for directory sources
    #[arg(long, default_value = "")]
    pub exclude: String,

    /// Application name
    #[arg(long, default_value = "")]
    pub app_name: String,

    /// Destination namespace
    #[arg(short, long, default_value = "")]
    pub namespace: String,

    /// Output format
    #[arg(short, long, default_value = "yaml")]
    pub format: OutputFormat,
}

/// Arguments for the detect command
#[derive(Parser, Debug)]
pub struct DetectArgs {
    /// Repository checkout root
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Application path relative to the root
    #[arg(short, long, default_value = "")]
    pub path: String,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., generation.pause_after_failures)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for rendered manifests
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Multi-document YAML stream
    Yaml,
    /// Full manifest set as JSON, with provenance
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn render_args_parse() {
        let cli = Cli::parse_from([
            "reposerve",
            "-vv",
            "render",
            "--root",
            "/tmp/repo",
            "--path",
            "charts/redis",
            "--values",
            "values.yaml",
            "--values",
            "values-prod.yaml",
            "--set",
            "replicas=2",
            "--format",
            "json",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Render(args) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(args.path, "charts/redis");
        assert_eq!(args.values, vec!["values.yaml", "values-prod.yaml"]);
        assert_eq!(args.set, vec!["replicas=2"]);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn config_action_optional() {
        let cli = Cli::parse_from(["reposerve", "config"]);
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs { action: None })
        ));
    }
}

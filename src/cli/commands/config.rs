//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{RepoServeError, RepoServeResult};
use console::style;

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    manager: &ConfigManager,
    config: &Config,
) -> RepoServeResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> RepoServeResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> RepoServeResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        eprintln!(
            "{} Config already exists at {}",
            style("!").yellow(),
            path.display()
        );
        eprintln!("  {}", style("Use --force to overwrite").dim());
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    eprintln!(
        "{} Configuration initialized {}",
        style("✓").green(),
        style(path.display()).dim()
    );

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> RepoServeResult<()> {
    let mut config = config.clone();
    apply(&mut config, key, value)?;

    manager.save(&config).await?;
    eprintln!("{} Set {} = {}", style("✓").green(), key, value);

    Ok(())
}

/// Apply a dot-separated `key = value` to `config`
fn apply(config: &mut Config, key: &str, value: &str) -> RepoServeResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => match value {
            "text" | "json" => config.general.log_format = value.to_string(),
            _ => {
                return Err(RepoServeError::User(format!(
                    "Invalid log format: {}. Use text/json",
                    value
                )))
            }
        },

        ["generation", "parallelism_limit"] => {
            config.generation.parallelism_limit = parse_number(value)?
        }
        ["generation", "pause_after_failures"] => {
            config.generation.pause_after_failures = parse_number(value)?
        }
        ["generation", "pause_for_minutes"] => {
            config.generation.pause_for_minutes = parse_number(value)?
        }
        ["generation", "pause_for_requests"] => {
            config.generation.pause_for_requests = parse_number(value)?
        }
        ["generation", "exec_timeout_secs"] => {
            config.generation.exec_timeout_secs = parse_number(value)?
        }

        ["sandbox", "allowed_schemes"] => {
            config.sandbox.allowed_schemes = value
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        _ => {
            eprintln!("{} Unknown config key: {}", style("✗").red(), key);
            eprintln!("Valid keys:");
            for key in VALID_KEYS {
                eprintln!("  {}", key);
            }
            return Err(RepoServeError::User(format!("Unknown config key: {}", key)));
        }
    }

    Ok(())
}

const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.log_format",
    "generation.parallelism_limit",
    "generation.pause_after_failures",
    "generation.pause_for_minutes",
    "generation.pause_for_requests",
    "generation.exec_timeout_secs",
    "sandbox.allowed_schemes",
];

fn parse_bool(value: &str) -> RepoServeResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(RepoServeError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> RepoServeResult<T> {
    value
        .parse()
        .map_err(|_| RepoServeError::User(format!("Invalid number: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn apply_generation_keys() {
        let mut config = Config::default();
        apply(&mut config, "generation.pause_after_failures", "5").unwrap();
        apply(&mut config, "generation.pause_for_requests", "10").unwrap();
        apply(&mut config, "sandbox.allowed_schemes", "HTTPS, s3,").unwrap();

        assert_eq!(config.generation.pause_after_failures, 5);
        assert_eq!(config.generation.pause_for_requests, 10);
        assert_eq!(config.sandbox.allowed_schemes, vec!["https", "s3"]);
    }

    #[test]
    fn apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, "generation.parallelism_limit", "many").is_err());
        assert!(apply(&mut config, "general.verbose", "maybe").is_err());
        assert!(apply(&mut config, "general.log_format", "xml").is_err());
        assert!(apply(&mut config, "vm.name", "x").is_err());
    }

    #[tokio::test]
    async fn set_persists_to_file() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));

        set_value(&manager, &Config::default(), "generation.pause_for_minutes", "15")
            .await
            .unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.generation.pause_for_minutes, 15);
    }

    #[tokio::test]
    async fn init_does_not_overwrite_without_force() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[generation]\npause_after_failures = 7\n").unwrap();
        let manager = ConfigManager::with_path(path);

        init_config(&manager, false).await.unwrap();
        assert_eq!(manager.load().await.unwrap().generation.pause_after_failures, 7);

        init_config(&manager, true).await.unwrap();
        assert_eq!(manager.load().await.unwrap().generation.pause_after_failures, 3);
    }
}

//! Configuration schema for reposerve
//!
//! Configuration is stored at `~/.config/reposerve/config.toml`

use crate::cache::BreakerPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Manifest generation and failure caching
    pub generation: GenerationConfig,

    /// File reference containment
    pub sandbox: SandboxConfig,

    /// Config management plugins available to plugin sources
    pub plugins: Vec<PluginConfig>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Manifest generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum simultaneous generations (must be >= 1)
    pub parallelism_limit: usize,

    /// Consecutive failures before generation is paused (0 = never pause)
    pub pause_after_failures: u32,

    /// Minutes to serve the cached failure once paused (0 = disabled)
    pub pause_for_minutes: u32,

    /// Cached failures to serve once paused (0 = disabled)
    pub pause_for_requests: u32,

    /// Timeout for a single tool invocation in seconds
    pub exec_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            parallelism_limit: 10,
            pause_after_failures: 3,
            pause_for_minutes: 60,
            pause_for_requests: 0,
            exec_timeout_secs: 90,
        }
    }
}

impl GenerationConfig {
    /// Breaker thresholds derived from this section
    pub fn policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            pause_after_failures: self.pause_after_failures,
            pause_for: chrono::Duration::minutes(i64::from(self.pause_for_minutes)),
            pause_for_requests: self.pause_for_requests,
            parallelism_limit: self.parallelism_limit,
        }
    }

    /// Per-invocation tool timeout
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

/// Sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// URL schemes allowed for remote value files
    pub allowed_schemes: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["https".to_string()],
        }
    }
}

/// A command line as configured for a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    /// Program and leading arguments
    pub command: Vec<String>,

    /// Trailing arguments
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Full argv (command followed by args)
    pub fn argv(&self) -> Vec<String> {
        self.command.iter().chain(self.args.iter()).cloned().collect()
    }
}

/// Config management plugin definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Name referenced by plugin sources
    pub name: String,

    /// Command run before generate
    #[serde(default)]
    pub init: Option<CommandSpec>,

    /// Command whose stdout is the rendered manifests
    pub generate: CommandSpec,
}

//! Configuration management for Cicada
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (CICADA_* prefix, `__` between sections)
//! 2. cicada.local.toml (gitignored, local overrides)
//! 3. cicada.toml (git-tracked, project config)
//! 4. ~/.config/cicada/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Default checkpoint interval, in seconds.
pub const DEFAULT_TTC_SECS: u64 = 30;

/// Default pause between two sends of a message the receiver asked to resend.
pub const DEFAULT_RESEND_BACKOFF_MS: u64 = 3000;

/// Fault-tolerance configuration of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtConfig {
    /// Protocol selector (`cic` or `pml`).
    pub protocol: String,
    /// Time to checkpoint, in seconds.
    pub ttc_secs: u64,
    /// Pause between two sends of a message when the receiver answers RESEND.
    pub resend_backoff_ms: u64,
    pub servers: ServerConfig,
    pub output_commit: OutputCommitConfig,
}

impl Default for FtConfig {
    fn default() -> Self {
        Self {
            protocol: "cic".to_string(),
            ttc_secs: DEFAULT_TTC_SECS,
            resend_backoff_ms: DEFAULT_RESEND_BACKOFF_MS,
            servers: ServerConfig::default(),
            output_commit: OutputCommitConfig::default(),
        }
    }
}

/// Addresses of the fault-tolerance servers.
///
/// Either `global` is set and serves every role, or all three dedicated
/// addresses are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

/// Experimental output-commit mode (causal vector clocks).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputCommitConfig {
    pub enabled: bool,
    /// Method names whose sending is an output commit.
    pub methods: Vec<String>,
}

impl Default for OutputCommitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            methods: vec!["logEvent".to_string()],
        }
    }
}

/// Which rollback-recovery protocol a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// Communication-induced checkpointing.
    Cic,
    /// Pessimistic message logging.
    Pml,
}

impl FromStr for ProtocolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cic" => Ok(ProtocolKind::Cic),
            "pml" => Ok(ProtocolKind::Pml),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Resolved server addresses, one per role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrls {
    pub checkpoint: String,
    pub location: String,
    pub recovery: String,
}

impl FtConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML file, without layering.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Create a configuration pointing every role at one server.
    pub fn with_global_server(url: impl Into<String>) -> Self {
        Self {
            servers: ServerConfig {
                global: Some(url.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn protocol_kind(&self) -> Result<ProtocolKind, ConfigError> {
        self.protocol.parse()
    }

    pub fn ttc(&self) -> Duration {
        Duration::from_secs(self.ttc_secs)
    }

    pub fn resend_backoff(&self) -> Duration {
        Duration::from_millis(self.resend_backoff_ms)
    }

    /// Resolves the address of each server role.
    ///
    /// The global server wins; otherwise all three dedicated addresses
    /// must be present.
    pub fn server_urls(&self) -> Result<ServerUrls, ConfigError> {
        if let Some(global) = &self.servers.global {
            return Ok(ServerUrls {
                checkpoint: global.clone(),
                location: global.clone(),
                recovery: global.clone(),
            });
        }

        match (
            &self.servers.checkpoint,
            &self.servers.location,
            &self.servers.recovery,
        ) {
            (Some(checkpoint), Some(location), Some(recovery)) => Ok(ServerUrls {
                checkpoint: checkpoint.clone(),
                location: location.clone(),
                recovery: recovery.clone(),
            }),
            _ => {
                let missing: Vec<&str> = [
                    ("checkpoint", &self.servers.checkpoint),
                    ("location", &self.servers.location),
                    ("recovery", &self.servers.recovery),
                ]
                .iter()
                .filter(|(_, url)| url.is_none())
                .map(|(name, _)| *name)
                .collect();
                Err(ConfigError::ServersNotSet(format!(
                    "missing {}",
                    missing.join(", ")
                )))
            }
        }
    }

    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol_kind()?;
        self.server_urls()?;
        if self.ttc_secs == 0 {
            return Err(ConfigError::ValidationError(
                "ttc_secs must be at least 1".to_string(),
            ));
        }
        if self.output_commit.enabled && self.output_commit.methods.is_empty() {
            return Err(ConfigError::ValidationError(
                "output commit is enabled but no output-commit method is listed".to_string(),
            ));
        }
        Ok(())
    }
}

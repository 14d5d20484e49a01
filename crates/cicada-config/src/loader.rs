//! Layered configuration loading.

use crate::{FtConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Builds an [`FtConfig`] from defaults, TOML files and the environment.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "CICADA".to_string(),
        }
    }

    /// Directory holding `cicada.toml` and `cicada.local.toml`.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Prefix of overriding environment variables, `CICADA` unless set.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Configuration files layered over the built-in defaults, lowest
    /// precedence first. Files that do not exist are skipped at load time.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(3);
        if let Ok(user) = Paths::new().user_config_file() {
            files.push(user);
        }
        files.push(Paths::project_config_file(&self.project_dir));
        files.push(Paths::local_config_file(&self.project_dir));
        files
    }

    /// Merges defaults, the existing files and the environment, in that
    /// order, and deserializes the result.
    pub fn load(self) -> Result<FtConfig> {
        let defaults = config::Config::try_from(&FtConfig::default())
            .context("Failed to encode built-in defaults")?;
        let mut builder = config::Config::builder().add_source(defaults);

        for file in self.files().into_iter().filter(|file| file.exists()) {
            builder = builder.add_source(
                config::File::from(file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // CICADA_TTC_SECS, CICADA_SERVERS__GLOBAL, ...
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Like [`load`](Self::load), falling back to the defaults on any error.
    pub fn load_or_default(self) -> FtConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_without_files() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("CICADA_TEST_DEFAULTS")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.protocol, "cic");
        assert_eq!(config.ttc_secs, 30);
        assert!(config.servers.global.is_none());
    }

    #[test]
    fn project_file_is_read() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
ttc_secs = 5
resend_backoff_ms = 250

[servers]
global = "rmi://localhost:1100/FTServer"

[output_commit]
enabled = true
methods = ["logEvent", "print"]
"#;
        fs::write(project_dir.join("cicada.toml"), config_content)
            .expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .with_env_prefix("CICADA_TEST_PROJECT")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.ttc_secs, 5);
        assert_eq!(config.resend_backoff_ms, 250);
        assert_eq!(
            config.servers.global.as_deref(),
            Some("rmi://localhost:1100/FTServer")
        );
        assert!(config.output_commit.enabled);
        assert_eq!(config.output_commit.methods.len(), 2);
        config.validate().expect("valid config");
    }

    #[test]
    fn local_file_wins_over_project_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("cicada.toml"),
            r#"
ttc_secs = 60

[servers]
checkpoint = "ckpt:1"
location = "loc:1"
recovery = "rec:1"
"#,
        )
        .expect("Failed to write project config");

        fs::write(
            project_dir.join("cicada.local.toml"),
            r"
ttc_secs = 1
",
        )
        .expect("Failed to write local config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .with_env_prefix("CICADA_TEST_LOCAL")
            .load()
            .expect("Failed to load config");

        // cicada.local.toml is merged last
        assert_eq!(config.ttc_secs, 1);
        assert_eq!(config.server_urls().unwrap().location, "loc:1");
    }

    #[test]
    fn malformed_file_is_reported() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "ttc_secs = \"soon\"").expect("write");

        let err = FtConfig::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, crate::ConfigError::ParseError { .. }));

        let missing = FtConfig::from_toml_file(temp_dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, crate::ConfigError::ReadError { .. }));
    }

    #[test]
    fn files_are_listed_lowest_precedence_first() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let files = ConfigLoader::new().with_project_dir(temp_dir.path()).files();

        let n = files.len();
        assert_eq!(files[n - 2], temp_dir.path().join("cicada.toml"));
        assert_eq!(files[n - 1], temp_dir.path().join("cicada.local.toml"));
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("CICADA_TEST_OR_DEFAULT")
            .load_or_default();
        assert_eq!(config.resend_backoff_ms, 3000);
    }
}

//! Where configuration files live.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const PROJECT_FILE: &str = "cicada.toml";
const LOCAL_FILE: &str = "cicada.local.toml";
const USER_FILE: &str = "config.toml";

/// Locations of the per-user and per-project configuration files.
pub struct Paths {
    dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            dirs: ProjectDirs::from("org", "Cicada", "cicada"),
        }
    }

    /// Per-user directory, `~/.config/cicada` on Linux. Fails when the
    /// platform has no home directory.
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.dirs {
            Some(dirs) => Ok(dirs.config_dir().to_path_buf()),
            None => Err(ConfigError::XdgError(
                "no home directory for per-user configuration".to_string(),
            )),
        }
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.user_config_dir().map(|dir| dir.join(USER_FILE))
    }

    /// Shared settings of a deployment, meant to be versioned.
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(PROJECT_FILE)
    }

    /// Machine-local overrides, kept out of version control.
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(LOCAL_FILE)
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn user_file_sits_in_cicada_dir() {
        let paths = Paths::new();

        // Sandboxed runners may have no home directory.
        if let Ok(file) = paths.user_config_file() {
            assert!(file.ends_with("config.toml"));
            assert!(file.to_string_lossy().contains("cicada"));
        }
    }

    #[test]
    fn project_files_sit_in_project_dir() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path();

        assert_eq!(Paths::project_config_file(dir), dir.join("cicada.toml"));
        assert_eq!(Paths::local_config_file(dir), dir.join("cicada.local.toml"));
    }
}

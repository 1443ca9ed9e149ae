use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::AppConfig;
use crate::error::{Error, Result};

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "resilientflow.toml";

/// Per-user config file, e.g. `~/.config/resilientflow/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "resilientflow", "resilientflow")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Resolves and loads [`AppConfig`].
///
/// Lookup order: an explicit path, then [`LOCAL_CONFIG_FILE`] in the search
/// directory, then [`default_config_path`]. Defaults are used when no file
/// exists. Environment overrides are merged last and the result validated.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
    search_dir: PathBuf,
    user_config: Option<PathBuf>,
    use_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            explicit: None,
            search_dir: PathBuf::from("."),
            user_config: default_config_path(),
            use_env: true,
        }
    }

    /// Load this file; it must exist
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = dir.into();
        self
    }

    pub fn with_user_config(mut self, path: Option<PathBuf>) -> Self {
        self.user_config = path;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// The file that [`load`](Self::load) would read, if any
    pub fn resolve(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.explicit {
            if !path.exists() {
                return Err(Error::InvalidConfig(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.clone()));
        }

        let local = self.search_dir.join(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Ok(Some(local));
        }

        Ok(self.user_config.clone().filter(|path| path.exists()))
    }

    pub async fn load(&self) -> Result<AppConfig> {
        let mut config = match self.resolve()? {
            Some(path) => load_file(&path).await?,
            None => {
                debug!("No config file found, using defaults");
                AppConfig::default()
            }
        };

        if self.use_env {
            config.merge_env_vars();
        }

        config.validate()?;
        Ok(config)
    }
}

async fn load_file(path: &Path) -> Result<AppConfig> {
    debug!("Loading config from {}", path.display());
    let content = fs::read_to_string(path).await?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

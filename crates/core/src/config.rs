//! Installer configuration
//!
//! Settings are resolved in layers, lowest precedence first:
//!
//! 1. Built-in defaults ([`DockhandConfig::default`])
//! 2. A TOML file: explicit path, else `DOCKHAND_CONFIG`, else
//!    `<user config dir>/dockhand/dockhand.toml` when it exists
//! 3. Environment overrides (`DOCKHAND_WORKSPACE_ROOT`, `DOCKHAND_ROOT_ENV_FILE`,
//!    `DOCKHAND_NETWORK`, `DOCKHAND_COMMAND_TIMEOUT_SECS`)
//!
//! CLI flags are applied on top by the binary.
//!
//! ## Example
//!
//! ```toml
//! workspace_root = "/srv/solutions"
//! network = "app-network"
//! command_timeout_secs = 1800
//!
//! [compose]
//! version = "v2.20.2"
//!
//! [solutions.demo]
//! repo_url = "https://github.com/example/demo.git"
//! repo_name = "demo"
//! image_name = "demo-img"
//! container_name = "demo-container"
//! port = 3000
//! install_type = "single-container"
//! env_file = ".env.example"
//! ```

use crate::errors::{ConfigError, Result};
use crate::registry::{SolutionDescriptor, SolutionRegistry, StaticRegistry};
use directories_next::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

/// Settings for the fallback docker compose installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeSettings {
    /// Where the standalone binary is written
    pub binary_path: PathBuf,
    /// Pinned release tag
    pub version: String,
    /// Release download base URL
    pub download_base: String,
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("/usr/local/bin/docker-compose"),
            version: "v2.20.2".to_string(),
            download_base: "https://github.com/docker/compose/releases/download".to_string(),
        }
    }
}

/// Complete installer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockhandConfig {
    /// Directory solutions are cloned into
    pub workspace_root: PathBuf,
    /// Host-wide env defaults; `<workspace_root>/.env` when unset
    pub root_env_file: Option<PathBuf>,
    /// Docker network single containers join
    pub network: String,
    /// Optional per-command timeout
    pub command_timeout_secs: Option<u64>,
    /// Fallback compose installation settings
    pub compose: ComposeSettings,
    /// Solutions; replaces the builtin registry when present
    pub solutions: Option<StaticRegistry>,
}

impl Default for DockhandConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/workspace"),
            root_env_file: None,
            network: "app-network".to_string(),
            command_timeout_secs: None,
            compose: ComposeSettings::default(),
            solutions: None,
        }
    }
}

impl DockhandConfig {
    /// Effective root env file path
    pub fn root_env_path(&self) -> PathBuf {
        self.root_env_file
            .clone()
            .unwrap_or_else(|| self.workspace_root.join(".env"))
    }

    /// Per-command timeout, if configured
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Workspace directory for a solution
    pub fn repo_path(&self, descriptor: &SolutionDescriptor) -> PathBuf {
        self.workspace_root.join(&descriptor.repo_name)
    }

    /// Configured registry, or the builtin one
    pub fn registry(&self) -> StaticRegistry {
        self.solutions.clone().unwrap_or_else(StaticRegistry::builtin)
    }

    /// Apply `DOCKHAND_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("DOCKHAND_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Ok(env_file) = std::env::var("DOCKHAND_ROOT_ENV_FILE") {
            self.root_env_file = Some(PathBuf::from(env_file));
        }
        if let Ok(network) = std::env::var("DOCKHAND_NETWORK") {
            self.network = network;
        }
        if let Ok(raw) = std::env::var("DOCKHAND_COMMAND_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::Validation {
                message: format!(
                    "DOCKHAND_COMMAND_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                    raw
                ),
            })?;
            self.command_timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Check invariants the installer relies on
    pub fn validate(&self) -> Result<()> {
        if !self.workspace_root.is_absolute() {
            return Err(ConfigError::Validation {
                message: format!(
                    "workspace_root must be an absolute path, got '{}'",
                    self.workspace_root.display()
                ),
            }
            .into());
        }
        if self.network.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "network must not be empty".to_string(),
            }
            .into());
        }
        if self.command_timeout_secs == Some(0) {
            return Err(ConfigError::Validation {
                message: "command_timeout_secs must be greater than zero".to_string(),
            }
            .into());
        }

        let registry = self.registry();
        for id in registry.identifiers() {
            if let Some(descriptor) = registry.get(&id) {
                validate_descriptor(&id, descriptor)?;
            }
        }
        Ok(())
    }
}

fn validate_descriptor(id: &str, descriptor: &SolutionDescriptor) -> Result<()> {
    let required = [
        ("repo_url", &descriptor.repo_url),
        ("repo_name", &descriptor.repo_name),
        ("branch", &descriptor.branch),
        ("image_name", &descriptor.image_name),
        ("container_name", &descriptor.container_name),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("solution '{}' has an empty {}", id, field),
            }
            .into());
        }
    }
    let mut components = Path::new(&descriptor.repo_name).components();
    let single_name = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_name || descriptor.repo_name.contains(['/', '\\']) {
        return Err(ConfigError::Validation {
            message: format!(
                "solution '{}' repo_name must be a single directory name",
                id
            ),
        }
        .into());
    }
    if descriptor.port == 0 {
        return Err(ConfigError::Validation {
            message: format!("solution '{}' must declare a non-zero port", id),
        }
        .into());
    }
    Ok(())
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve, load, override and validate the configuration
    #[instrument]
    pub fn load(explicit: Option<&Path>) -> Result<DockhandConfig> {
        let mut config = match Self::resolve_path(explicit)? {
            Some(path) => Self::load_from_path(&path)?,
            None => {
                debug!("No configuration file found, using defaults");
                DockhandConfig::default()
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    #[instrument]
    pub fn load_from_path(path: &Path) -> Result<DockhandConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::parse(&content, path)
    }

    /// Parse configuration text; `origin` is used for error messages only
    pub fn parse(content: &str, origin: &Path) -> Result<DockhandConfig> {
        let config: DockhandConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parsing {
                path: origin.display().to_string(),
                message: e.to_string(),
            })?;
        debug!(
            "Loaded configuration from {} ({} solutions)",
            origin.display(),
            config.solutions.as_ref().map_or(0, StaticRegistry::len)
        );
        Ok(config)
    }

    fn resolve_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            return Ok(Some(path.to_path_buf()));
        }
        if let Ok(from_env) = std::env::var("DOCKHAND_CONFIG") {
            return Ok(Some(PathBuf::from(from_env)));
        }
        Ok(Self::user_config_path().filter(|p| p.exists()))
    }

    /// `<user config dir>/dockhand/dockhand.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dockhand").map(|dirs| dirs.config_dir().join("dockhand.toml"))
    }
}

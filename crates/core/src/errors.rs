//! Error types and handling
//!
//! The error taxonomy mirrors the installation pipeline: each collaborator
//! (command runner, environment reconciler, compose resolver, configuration)
//! has its own enum, and all of them are wrapped by [`DockhandError`] for
//! unified propagation. Failures of a pipeline stage are surfaced as
//! [`DockhandError::InstallationFailed`], which names the stage and, when the
//! cause was a host command, the (redacted) command line.

use std::path::PathBuf;
use thiserror::Error;

/// Host command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    /// The shell could not be spawned at all
    #[error("Failed to spawn command `{command}`: {message}")]
    Spawn { command: String, message: String },

    /// The command ran and exited with a non-zero status
    #[error("Command failed with exit code {exit_code}: {command}{}", stderr_suffix(stderr))]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Reading the command's output or waiting for it failed
    #[error("I/O error while running `{command}`: {message}")]
    Io { command: String, message: String },

    /// The command exceeded the configured per-command timeout
    #[error("Command timed out after {seconds}s: {command}")]
    TimedOut { command: String, seconds: u64 },
}

impl CommandError {
    /// The command line this error refers to
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. }
            | Self::Failed { command, .. }
            | Self::Io { command, .. }
            | Self::TimedOut { command, .. } => command,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" ({})", trimmed)
    }
}

/// Environment file reconciliation errors
#[derive(Error, Debug)]
pub enum EnvError {
    /// Reading or writing one of the merge inputs/outputs failed
    #[error("Failed to merge environment file {}", path.display())]
    MergeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing up, swapping or restoring the repository env file failed
    #[error("Failed to swap environment file {}", path.display())]
    Swap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Compose tool resolution errors
#[derive(Error, Debug)]
pub enum ComposeError {
    /// The fallback compose binary could not be installed
    #[error("Failed to install docker compose: {message}")]
    InstallFailed { message: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse configuration file {path}: {message}")]
    Parsing { path: String, message: String },

    /// Configuration validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// Configuration file I/O error
    #[error("Failed to read configuration file")]
    Io(#[from] std::io::Error),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum DockhandError {
    /// Host command errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Environment reconciliation errors
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    /// Compose resolution errors
    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The requested solution identifier is not in the registry
    #[error("Unknown solution: {identifier}. Available solutions: {}", available.join(", "))]
    UnknownSolution {
        identifier: String,
        available: Vec<String>,
    },

    /// No build descriptor exists anywhere in the cloned repository
    #[error("No Dockerfile or compose file found in repository {repository}")]
    NoBuildDescriptorFound { repository: String },

    /// Another installation of the same solution is already running
    #[error("An installation of {identifier} is already in progress")]
    InstallationInProgress { identifier: String },

    /// A pipeline stage failed; wraps the stage's underlying error
    #[error("Installation of {solution} failed during {stage}: {source}")]
    InstallationFailed {
        solution: String,
        stage: &'static str,
        command: Option<String>,
        #[source]
        source: Box<DockhandError>,
    },

    /// Filesystem errors outside environment reconciliation
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DockhandError {
    /// Build an I/O error bound to the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The failing command line, if this error originated from a host command
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Command(err) => Some(err.command()),
            Self::InstallationFailed { command, .. } => command.as_deref(),
            _ => None,
        }
    }
}

/// Convenience type alias for Results with DockhandError
pub type Result<T> = std::result::Result<T, DockhandError>;

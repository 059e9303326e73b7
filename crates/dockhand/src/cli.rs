use crate::commands::install::{execute_install, InstallArgs};
use crate::commands::list::{execute_list, ListArgs};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dockhand_core::config::{ConfigLoader, DockhandConfig};
use std::path::PathBuf;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

/// dockhand subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List installable solutions
    List,
    /// Clone, configure, build and start a solution
    Install {
        /// Solution identifier (see `dockhand list`)
        solution: String,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Solution installer",
    long_about = "Solution installer\n\nClones a known repository, reconciles its environment files and builds and runs it with docker or docker compose.",
    color = clap::ColorChoice::Auto
)]
pub struct Cli {
    /// Log format (text or json, defaults to text, can be set via DOCKHAND_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Configuration file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory solutions are cloned into (overrides configuration)
    #[arg(long, global = true, value_name = "PATH")]
    pub workspace_root: Option<PathBuf>,

    /// Result output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };

        let log_level = match self.log_level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        if std::env::var_os("DOCKHAND_LOG").is_none() && std::env::var_os("RUST_LOG").is_none() {
            std::env::set_var(
                "RUST_LOG",
                format!("dockhand={},dockhand_core={}", log_level, log_level),
            );
        }
        dockhand_core::logging::init(log_format)?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        let config = self.load_config()?;

        match self.command {
            Commands::List => {
                execute_list(ListArgs {
                    config,
                    output: self.output,
                })
                .await
            }
            Commands::Install { solution } => {
                execute_install(InstallArgs {
                    solution,
                    config,
                    output: self.output,
                })
                .await
            }
        }
    }

    fn load_config(&self) -> Result<DockhandConfig> {
        let mut config = ConfigLoader::load(self.config.as_deref())?;
        if let Some(root) = &self.workspace_root {
            config.workspace_root = root.clone();
            config.validate()?;
        }
        Ok(config)
    }
}

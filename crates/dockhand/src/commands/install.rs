//! Install command implementation
//!
//! Implements `dockhand install <solution>`: runs the installation pipeline
//! with a real shell runner and prints the outcome to stdout.

use crate::cli::OutputFormat;
use anyhow::Result;
use dockhand_core::command::ShellRunner;
use dockhand_core::config::DockhandConfig;
use dockhand_core::installer::{InstallationOutcome, Installer};
use tracing::{debug, instrument};

/// Install command arguments
#[derive(Debug, Clone)]
pub struct InstallArgs {
    pub solution: String,
    pub config: DockhandConfig,
    pub output: OutputFormat,
}

/// Execute the install command
#[instrument(skip(args), fields(solution = %args.solution))]
pub async fn execute_install(args: InstallArgs) -> Result<()> {
    debug!("Install args: {:?}", args);

    let runner = ShellRunner::new().with_timeout(args.config.command_timeout());
    let registry = args.config.registry();
    let installer = Installer::new(runner, registry, args.config);

    let outcome = installer.install(&args.solution).await?;
    print_outcome(&outcome, args.output)
}

fn print_outcome(outcome: &InstallationOutcome, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(outcome)?),
        OutputFormat::Text => println!("{}", render_text(outcome)),
    }
    Ok(())
}

fn render_text(outcome: &InstallationOutcome) -> String {
    format!(
        "Installed {}; service listening on port {}",
        outcome.solution, outcome.port
    )
}

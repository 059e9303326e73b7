//! List command implementation
//!
//! Prints the solutions the configured registry knows about.

use crate::cli::OutputFormat;
use anyhow::Result;
use dockhand_core::config::DockhandConfig;
use dockhand_core::registry::InstallKind;
use serde::Serialize;
use tracing::instrument;

/// List command arguments
#[derive(Debug, Clone)]
pub struct ListArgs {
    pub config: DockhandConfig,
    pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct SolutionSummary<'a> {
    solution: &'a str,
    install_type: InstallKind,
    port: u16,
    repo_url: &'a str,
}

/// Execute the list command
#[instrument(skip(args))]
pub async fn execute_list(args: ListArgs) -> Result<()> {
    let registry = args.config.registry();
    let summaries: Vec<SolutionSummary<'_>> = registry
        .iter()
        .map(|(id, descriptor)| SolutionSummary {
            solution: id,
            install_type: descriptor.install_type,
            port: descriptor.port,
            repo_url: &descriptor.repo_url,
        })
        .collect();

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text => {
            for summary in &summaries {
                println!(
                    "{:<20} {:<17} port {}",
                    summary.solution,
                    summary.install_type.as_str(),
                    summary.port
                );
            }
        }
    }
    Ok(())
}

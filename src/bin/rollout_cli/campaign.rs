//! `campaign` commands.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vault_rollout::pipeline::{run_campaign, PipelineReport, RunOptions, StepStatus};
use vault_rollout::{Campaign, RolloutConfig};

use super::output::{print_json, status_marker};

#[derive(Parser, Debug)]
pub struct CampaignCmd {
    #[command(subcommand)]
    command: CampaignSubcommand,
}

#[derive(Subcommand, Debug)]
enum CampaignSubcommand {
    /// Run a campaign file step by step
    Run {
        /// Campaign file (YAML or JSON)
        file: PathBuf,
        /// Resolve inputs and report the plan without sending anything
        #[arg(long)]
        dry_run: bool,
        /// Start at this step id (earlier steps are skipped)
        #[arg(long = "from", value_name = "STEP_ID")]
        from: Option<String>,
    },
    /// Validate a campaign file and list its steps
    Check {
        /// Campaign file (YAML or JSON)
        file: PathBuf,
    },
}

impl CampaignCmd {
    pub async fn execute(&self, config: &RolloutConfig, json_output: bool) -> Result<()> {
        match &self.command {
            CampaignSubcommand::Run {
                file,
                dry_run,
                from,
            } => {
                let campaign = Campaign::load_from_path(file)?;
                let ctx = config.optional_context().await?;
                let options = RunOptions {
                    dry_run: *dry_run,
                    resume_from: from.clone(),
                };
                let report = run_campaign(&ctx, &campaign, &options).await?;
                if json_output {
                    print_json(&report)
                } else {
                    print_report(&report);
                    Ok(())
                }
            }
            CampaignSubcommand::Check { file } => {
                let campaign = Campaign::load_from_path(file)?;
                if json_output {
                    return print_json(&campaign);
                }
                println!("Campaign '{}' is valid ({} steps)", campaign.name, campaign.steps.len());
                for (idx, step) in campaign.steps.iter().enumerate() {
                    let reads = step.action.reads();
                    let output = step.action.output().unwrap_or("-");
                    println!(
                        "  [{}] {} ({}) reads: {} writes: {}",
                        idx + 1,
                        step.id,
                        step.action.kind(),
                        if reads.is_empty() { "-".to_string() } else { reads.join(", ") },
                        output
                    );
                }
                Ok(())
            }
        }
    }
}

fn print_report(report: &PipelineReport) {
    println!(
        "\x1b[1mCampaign '{}' on {} ({}){}\x1b[0m",
        report.campaign,
        report.network,
        report.environment,
        if report.dry_run { " [dry run]" } else { "" }
    );
    for step in &report.steps {
        let (marker, status) = match step.status {
            StepStatus::Completed => (status_marker(true), "completed"),
            StepStatus::Skipped => ("-", "skipped"),
            StepStatus::Planned => ("·", "planned"),
        };
        println!(
            "  {} [{}] {} ({}) {} in {}ms",
            marker,
            step.index + 1,
            step.id,
            step.kind,
            status,
            step.elapsed_ms
        );
        for (name, address) in &step.outputs {
            println!("      {} = {}", name, address);
        }
        if let Some(note) = &step.note {
            println!("      {}", note);
        }
    }
    println!(
        "{} completed, {} skipped of {} steps in {}ms",
        report.completed_steps, report.skipped_steps, report.total_steps, report.elapsed_ms
    );
}

//! `timelock` commands: queue a batch, execute a saved batch, inspect snapshots.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rollout_timelock::{EntryState, ExecutionReport, OutcomeStatus, TimelockEntry};
use rollout_types::abi::checksum;
use rollout_types::{Address, U256};
use serde_json::json;
use std::path::PathBuf;
use vault_rollout::campaign::{StepAction, TimelockBatchFile};
use vault_rollout::resolve::collect_refs;
use vault_rollout::steps::queue_timelock_batch;
use vault_rollout::{RolloutConfig, RolloutContext};

use super::output::{format_timestamp, now_unix, print_json, status_marker};

const DEFAULT_TIMELOCK: &str = "@timelock";

#[derive(Parser, Debug)]
pub struct TimelockCmd {
    #[command(subcommand)]
    command: TimelockSubcommand,
}

#[derive(Subcommand, Debug)]
enum TimelockSubcommand {
    /// Queue a batch file and save it as a snapshot
    Queue {
        /// Batch file with `eta` and `transactions` (YAML or JSON)
        file: PathBuf,
        /// Snapshot label
        #[arg(long)]
        label: String,
        /// Timelock address or registry reference
        #[arg(long, default_value = DEFAULT_TIMELOCK)]
        timelock: String,
        /// First nonce to use (defaults to the account's next nonce)
        #[arg(long)]
        nonce: Option<u64>,
    },
    /// Execute a saved batch and save the outcome as a new snapshot
    Execute {
        /// Snapshot name (`<timestamp>_<label>`)
        name: String,
        /// Timelock address or registry reference
        #[arg(long, default_value = DEFAULT_TIMELOCK)]
        timelock: String,
        /// First nonce to use (defaults to the account's next nonce)
        #[arg(long)]
        nonce: Option<u64>,
    },
    /// List saved snapshots
    List,
    /// Show the entries of a snapshot and their current state
    Show {
        /// Snapshot name (`<timestamp>_<label>`)
        name: String,
    },
}

impl TimelockCmd {
    pub async fn execute(&self, config: &RolloutConfig, json_output: bool) -> Result<()> {
        match &self.command {
            TimelockSubcommand::Queue {
                file,
                label,
                timelock,
                nonce,
            } => {
                let step = TimelockBatchFile::load_from_path(file)?.into_step(label, timelock)?;
                let ctx = config.connected_context().await?;
                let inputs = ctx.resolve(&StepAction::TimelockQueue(step.clone()).reads())?;
                let output =
                    queue_timelock_batch(&ctx, &step, &inputs, nonce.map(U256::from)).await?;
                if json_output {
                    print_json(&output)
                } else {
                    let snapshot = output
                        .detail
                        .as_ref()
                        .and_then(|d| d.get("snapshot"))
                        .and_then(|s| s.as_str())
                        .unwrap_or_default();
                    println!(
                        "Queued {} transactions (eta {}) as snapshot {}",
                        step.transactions.len(),
                        format_timestamp(step.eta as i64),
                        snapshot
                    );
                    Ok(())
                }
            }
            TimelockSubcommand::Execute {
                name,
                timelock,
                nonce,
            } => {
                let ctx = config.connected_context().await?;
                let batches = ctx.batches();
                let entries = batches.load(name)?;
                let engine = ctx.timelock_engine(timelock_address(&ctx, timelock)?)?;
                let nonce = match nonce {
                    Some(nonce) => U256::from(*nonce),
                    None => ctx.chain()?.next_nonce().await?,
                };

                let report = engine.execute_batch(&entries, Some(nonce)).await;
                let saved = batches.save_execution(name, &report)?;

                if json_output {
                    print_json(&json!({
                        "snapshot": saved.name(),
                        "executed": report.executed_count(),
                        "failed": report.failure_count(),
                        "report": &report,
                    }))?;
                } else {
                    print_execution(&report);
                    println!("Saved outcomes as snapshot {}", saved.name());
                }
                if report.has_failures() {
                    bail!(
                        "{} of {} timelock entries failed; see snapshot {}",
                        report.failure_count(),
                        report.outcomes.len(),
                        saved.name()
                    );
                }
                Ok(())
            }
            TimelockSubcommand::List => {
                let ctx = config.offline_context();
                let snapshots = ctx.batches().list()?;
                if json_output {
                    let items: Vec<_> = snapshots
                        .iter()
                        .map(|s| {
                            json!({
                                "name": s.name(),
                                "label": s.label,
                                "timestamp": s.timestamp,
                                "path": s.path.display().to_string(),
                            })
                        })
                        .collect();
                    return print_json(&items);
                }
                if snapshots.is_empty() {
                    println!("No timelock snapshots on {}", ctx.target);
                }
                for snapshot in snapshots {
                    println!(
                        "{}  {}",
                        snapshot.name(),
                        format_timestamp(snapshot.timestamp)
                    );
                }
                Ok(())
            }
            TimelockSubcommand::Show { name } => {
                let ctx = config.offline_context();
                let entries = ctx.batches().load(name)?;
                let now = now_unix();
                if json_output {
                    let items: Vec<_> = entries
                        .iter()
                        .map(|entry| {
                            json!({
                                "state": entry.state_at(now),
                                "identity": entry.identity().ok().map(|h| format!("{:?}", h)),
                                "entry": entry,
                            })
                        })
                        .collect();
                    return print_json(&items);
                }
                for (idx, entry) in entries.iter().enumerate() {
                    print_entry(idx, entry, entry.state_at(now));
                }
                Ok(())
            }
        }
    }
}

/// `@name` from the registry, or a literal address.
fn timelock_address(ctx: &RolloutContext, raw: &str) -> Result<Address> {
    let mut refs = Vec::new();
    collect_refs(&serde_json::Value::String(raw.to_string()), &mut refs);
    ctx.resolve(&refs)?.address(raw)
}

fn print_entry(idx: usize, entry: &TimelockEntry, state: EntryState) {
    println!(
        "[{}] {} ({})",
        idx + 1,
        entry.info,
        state
    );
    println!(
        "    {} {}({})",
        checksum(&entry.target),
        entry.signature,
        entry
            .params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if !entry.value.is_zero() {
        println!("    value: {}", entry.value);
    }
    println!("    eta: {}", format_timestamp(entry.eta as i64));
    if entry.is_queued() {
        println!("    queued in: {}", entry.queued_at);
    }
    if entry.is_executed() {
        println!("    executed in: {}", entry.executed_at);
    }
    if let Some(error) = &entry.error {
        println!("    error: {}", error);
    }
}

fn print_execution(report: &ExecutionReport) {
    for outcome in &report.outcomes {
        let (ok, status) = match outcome.status {
            OutcomeStatus::Executed => (true, "executed".to_string()),
            OutcomeStatus::AlreadyExecuted => (true, "already executed".to_string()),
            OutcomeStatus::Failed => (
                false,
                outcome
                    .entry
                    .error
                    .clone()
                    .unwrap_or_else(|| "failed".to_string()),
            ),
        };
        println!(
            "  {} [{}] {}: {}",
            status_marker(ok),
            outcome.index + 1,
            outcome.entry.info,
            status
        );
    }
    println!(
        "{} executed, {} failed of {} entries",
        report.executed_count(),
        report.failure_count(),
        report.outcomes.len()
    );
}

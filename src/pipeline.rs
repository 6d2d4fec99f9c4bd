//! Linear campaign runner.
//!
//! Steps run strictly in file order against one network/environment. The
//! first failing step aborts the run; the error names the step, the target
//! and, for a missing registry entry, the step that records it.

use anyhow::anyhow;
use rollout_registry::RegistryError;
use rollout_types::abi::checksum;
use rollout_types::{Environment, EnvironmentMismatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

use crate::campaign::{Campaign, CampaignStep, IfExists, StepAction};
use crate::context::RolloutContext;
use crate::resolve::Inputs;
use crate::steps::{call_already_applied, execute_step};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resolve and report only; nothing is sent and nothing is written.
    pub dry_run: bool,
    /// Skip every step before this id.
    pub resume_from: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    Planned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub id: String,
    pub kind: String,
    pub status: StepStatus,
    pub reads: Vec<String>,
    pub outputs: BTreeMap<String, String>,
    pub elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub campaign: String,
    pub network: String,
    pub environment: Environment,
    pub dry_run: bool,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub skipped_steps: usize,
    pub elapsed_ms: u128,
    pub steps: Vec<StepReport>,
}

/// A registry name a step needed but could not find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInput {
    pub name: String,
    /// Id of the campaign step that records `name`, if any.
    pub producer: Option<String>,
}

#[derive(Debug)]
pub enum PipelineError {
    /// The campaign is pinned to another environment.
    Environment {
        campaign: String,
        mismatch: EnvironmentMismatch,
    },
    /// `resume_from` names no step.
    UnknownStep { id: String },
    /// A step failed; nothing after it ran.
    Step {
        step_id: String,
        index: usize,
        kind: &'static str,
        network: String,
        environment: Environment,
        missing: Option<MissingInput>,
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Id of the failed step, for `--from`.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            PipelineError::Step { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    pub fn missing(&self) -> Option<&MissingInput> {
        match self {
            PipelineError::Step { missing, .. } => missing.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Environment { campaign, mismatch } => {
                write!(f, "campaign `{}` cannot run here: {}", campaign, mismatch)
            }
            PipelineError::UnknownStep { id } => {
                write!(f, "no step with id `{}` in this campaign", id)
            }
            PipelineError::Step {
                step_id,
                index,
                kind,
                network,
                environment,
                missing,
                source,
            } => {
                write!(
                    f,
                    "step #{} `{}` ({}) failed on {} ({}): {}",
                    index + 1,
                    step_id,
                    kind,
                    network,
                    environment,
                    source
                )?;
                match missing {
                    Some(MissingInput {
                        name,
                        producer: Some(producer),
                    }) => write!(
                        f,
                        "; `{}` is recorded by step `{}`, rerun with --from {}",
                        name, producer, producer
                    ),
                    Some(MissingInput {
                        name,
                        producer: None,
                    }) => write!(
                        f,
                        "; no step of this campaign records `{}`, record it first",
                        name
                    ),
                    None => Ok(()),
                }
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Environment { mismatch, .. } => Some(mismatch),
            PipelineError::UnknownStep { .. } => None,
            // The top-level message is already part of `Display`.
            PipelineError::Step { source, .. } => (**source).source(),
        }
    }
}

/// Run `campaign` against the context's target.
pub async fn run_campaign(
    ctx: &RolloutContext,
    campaign: &Campaign,
    options: &RunOptions,
) -> Result<PipelineReport, PipelineError> {
    if let Some(expected) = campaign.environment {
        ctx.target
            .environment
            .ensure(expected)
            .map_err(|mismatch| PipelineError::Environment {
                campaign: campaign.name.clone(),
                mismatch,
            })?;
    }
    let start = match options.resume_from.as_deref() {
        Some(id) => campaign
            .step_index(id)
            .ok_or_else(|| PipelineError::UnknownStep { id: id.to_string() })?,
        None => 0,
    };

    info!(
        campaign = %campaign.name,
        target = %ctx.target,
        steps = campaign.steps.len(),
        dry_run = options.dry_run,
        "running campaign"
    );

    let started = Instant::now();
    let mut reports = Vec::with_capacity(campaign.steps.len());
    for (index, step) in campaign.steps.iter().enumerate() {
        let step_started = Instant::now();
        let mut report = StepReport {
            index,
            id: step.id.clone(),
            kind: step.action.kind().to_string(),
            status: StepStatus::Skipped,
            reads: step.action.reads(),
            outputs: BTreeMap::new(),
            elapsed_ms: 0,
            note: None,
            detail: None,
        };

        if index < start {
            report.note = Some("before resume point".to_string());
            reports.push(report);
            continue;
        }

        run_step(ctx, campaign, index, step, options.dry_run, &mut report)
            .await
            .map_err(|(missing, source)| {
                warn!(step = %step.id, target = %ctx.target, error = %source, "campaign step failed");
                PipelineError::Step {
                    step_id: step.id.clone(),
                    index,
                    kind: step.action.kind(),
                    network: ctx.target.network.clone(),
                    environment: ctx.target.environment,
                    missing: missing.map(|name| MissingInput {
                        producer: campaign.producer_of(&name).map(|(_, p)| p.id.clone()),
                        name,
                    }),
                    source,
                }
            })?;

        report.elapsed_ms = step_started.elapsed().as_millis();
        info!(
            step = %step.id,
            kind = %report.kind,
            status = ?report.status,
            elapsed_ms = report.elapsed_ms as u64,
            "campaign step finished"
        );
        reports.push(report);
    }

    let count = |status: StepStatus| reports.iter().filter(|r| r.status == status).count();
    Ok(PipelineReport {
        campaign: campaign.name.clone(),
        network: ctx.target.network.clone(),
        environment: ctx.target.environment,
        dry_run: options.dry_run,
        total_steps: campaign.steps.len(),
        completed_steps: count(StepStatus::Completed),
        skipped_steps: count(StepStatus::Skipped),
        elapsed_ms: started.elapsed().as_millis(),
        steps: reports,
    })
}

type StepFailure = (Option<String>, anyhow::Error);

async fn run_step(
    ctx: &RolloutContext,
    campaign: &Campaign,
    index: usize,
    step: &CampaignStep,
    dry_run: bool,
    report: &mut StepReport,
) -> Result<(), StepFailure> {
    let mut inputs = Inputs::new(ctx.deployer());
    let mut pending = Vec::new();
    for name in &report.reads {
        match ctx.registry.get(&ctx.target, name) {
            Ok(record) => inputs.insert(name.clone(), record.address),
            Err(err) if err.is_not_found() && dry_run && produced_before(campaign, name, index) => {
                pending.push(name.clone());
            }
            Err(err) => return Err(failure(err)),
        }
    }

    let existing = match step.action.output() {
        Some(name) => match ctx.registry.get(&ctx.target, name) {
            Ok(record) => Some((name, record.address)),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(failure(err)),
        },
        None => None,
    };
    if let Some((name, address)) = existing {
        report.outputs.insert(name.to_string(), checksum(&address));
        if step.if_exists == IfExists::Skip {
            report.note = Some(format!("`{}` already recorded", name));
            return Ok(());
        }
    }
    if let StepAction::TimelockQueue(queue) = &step.action {
        let exists = ctx
            .batches()
            .exists(&queue.label)
            .map_err(|err| (None, anyhow::Error::new(err)))?;
        if exists {
            report.note = Some(format!("snapshot `{}` already saved", queue.label));
            return Ok(());
        }
    }

    if dry_run {
        report.status = StepStatus::Planned;
        if !pending.is_empty() {
            report.note = Some(format!("waits for {}", pending.join(", ")));
        } else if existing.is_some() {
            report.note = Some("would verify and overwrite".to_string());
        }
        return Ok(());
    }

    if !ctx.has_chain() && !matches!(step.action, StepAction::Record(_)) {
        return Err((None, anyhow!("no chain connection; pass --rpc-url and --private-key")));
    }
    if let StepAction::Call(call) = &step.action {
        if call_already_applied(ctx, call, &inputs)
            .await
            .map_err(|err| (None, err))?
        {
            report.note = Some("`skip_if` checks already hold".to_string());
            return Ok(());
        }
    }

    let output = execute_step(ctx, &step.action, &inputs, existing.map(|(_, a)| a))
        .await
        .map_err(|err| {
            let missing = match err.downcast_ref::<RegistryError>() {
                Some(RegistryError::NotFound { key }) => Some(key.logical_name.clone()),
                _ => None,
            };
            (missing, err)
        })?;
    report.status = StepStatus::Completed;
    report.outputs = output.outputs;
    report.detail = output.detail;
    Ok(())
}

fn failure(err: RegistryError) -> StepFailure {
    let missing = match &err {
        RegistryError::NotFound { key } => Some(key.logical_name.clone()),
        _ => None,
    };
    (missing, anyhow::Error::new(err))
}

/// Whether an earlier step of the campaign records `name`.
fn produced_before(campaign: &Campaign, name: &str, index: usize) -> bool {
    campaign.steps[..index]
        .iter()
        .any(|step| step.action.output() == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_client::MockChain;
    use rollout_types::{Address, Target};
    use std::sync::Arc;
    use tempfile::TempDir;

    const CAMPAIGN: &str = r#"
name: vaults
environment: prod
steps:
  - id: weth
    kind: record
    name: WETH9
    address: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
  - id: controller
    kind: deploy
    name: controller
    artifact: Controller
    constructor: [address]
    args: ["@WETH9"]
  - id: set-fee
    kind: call
    target: "@controller"
    signature: "setFee(uint256)"
    args: ["30"]
"#;

    fn campaign() -> Campaign {
        let campaign: Campaign = serde_yaml::from_str(CAMPAIGN).unwrap();
        campaign.validate().unwrap();
        campaign
    }

    fn context(dir: &TempDir, environment: Environment) -> RolloutContext {
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        std::fs::write(
            artifacts.join("Controller.json"),
            r#"{"contractName":"Controller","abi":[],"bytecode":"0x6080"}"#,
        )
        .unwrap();
        RolloutContext::new(
            Target::new("mainnet", environment),
            &dir.path().join("deployments"),
            &artifacts,
        )
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(MockChain::new(Address::from_low_u64_be(0xde)));
        let ctx = context(&dir, Environment::Prod).with_chain(chain.clone());

        let report = run_campaign(&ctx, &campaign(), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(report.completed_steps, 3);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(ctx.registry.contains(&ctx.target, "controller").unwrap());
        assert_eq!(chain.mined().len(), 2);

        let rerun = run_campaign(&ctx, &campaign(), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(rerun.steps[0].status, StepStatus::Skipped);
        assert_eq!(rerun.steps[1].status, StepStatus::Skipped);
        assert_eq!(rerun.steps[2].status, StepStatus::Completed);
        assert_eq!(chain.mined().len(), 3);
    }

    #[tokio::test]
    async fn guarded_call_is_not_resent() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(MockChain::new(Address::from_low_u64_be(0xde)));
        let ctx = context(&dir, Environment::Prod).with_chain(chain.clone());
        let mut campaign = campaign();
        if let StepAction::Call(call) = &mut campaign.steps[2].action {
            call.skip_if = vec![crate::campaign::Check {
                target: None,
                signature: "fee()".to_string(),
                args: vec![],
                returns: vec!["uint256".to_string()],
                expect: vec![serde_json::json!("30")],
                tolerance: None,
            }];
        }
        campaign.validate().unwrap();
        let controller = ethers::utils::get_contract_address(
            Address::from_low_u64_be(0xde),
            rollout_types::U256::zero(),
        );
        chain
            .set_view_json(controller, "fee()", &[], &["uint256"], &[serde_json::json!("0")])
            .unwrap();

        let first = run_campaign(&ctx, &campaign, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(first.steps[2].status, StepStatus::Completed);
        assert_eq!(chain.mined().len(), 2);

        // The fee is now set on-chain.
        chain
            .set_view_json(controller, "fee()", &[], &["uint256"], &[serde_json::json!("30")])
            .unwrap();
        let rerun = run_campaign(&ctx, &campaign, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(rerun.steps[2].status, StepStatus::Skipped);
        assert_eq!(
            rerun.steps[2].note.as_deref(),
            Some("`skip_if` checks already hold")
        );
        assert_eq!(chain.mined().len(), 2);
    }

    #[tokio::test]
    async fn environment_guard() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Environment::Develop);
        let err = run_campaign(&ctx, &campaign(), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Environment { .. }));
        assert!(err.to_string().contains("expected ENV: prod"));
    }

    #[tokio::test]
    async fn missing_dependency_names_producer() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(MockChain::new(Address::from_low_u64_be(0xde)));
        let ctx = context(&dir, Environment::Prod).with_chain(chain);
        let options = RunOptions {
            resume_from: Some("set-fee".to_string()),
            ..RunOptions::default()
        };

        let err = run_campaign(&ctx, &campaign(), &options).await.unwrap_err();
        assert_eq!(err.step_id(), Some("set-fee"));
        assert_eq!(
            err.missing(),
            Some(&MissingInput {
                name: "controller".to_string(),
                producer: Some("controller".to_string()),
            })
        );
        let message = err.to_string();
        assert!(message.contains("mainnet"), "{message}");
        assert!(message.contains("prod"), "{message}");
        assert!(message.contains("--from controller"), "{message}");
    }

    #[tokio::test]
    async fn dry_run_plans_without_writing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Environment::Prod);
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };

        let report = run_campaign(&ctx, &campaign(), &options).await.unwrap();
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Planned));
        assert_eq!(report.steps[2].note.as_deref(), Some("waits for controller"));
        assert!(ctx.registry.list(&ctx.target).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_resume_point() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Environment::Prod);
        let options = RunOptions {
            resume_from: Some("nope".to_string()),
            ..RunOptions::default()
        };
        let err = run_campaign(&ctx, &campaign(), &options).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStep { .. }));
    }
}

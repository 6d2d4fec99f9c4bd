//! Campaign files: the fixed, linear step list of one deployment campaign.
//!
//! ```yaml
//! version: 1
//! name: vaults-v2
//! environment: prod
//! steps:
//!   - id: fee-model
//!     kind: deploy
//!     name: kink_fee_model
//!     artifact: KinkFeeModel
//!     constructor: [uint256, uint256]
//!     args: ["100", "2000"]
//!   - id: controller
//!     kind: deploy
//!     name: controller
//!     artifact: Controller
//!     constructor: [address]
//!     args: ["@kink_fee_model"]
//! ```

use anyhow::{bail, Context, Result};
use rollout_types::abi::{parse_param_types, signature_arguments};
use rollout_types::serde_helpers::decimal_u64;
use rollout_types::Environment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::resolve::{collect_refs, is_valid_name, SELF_REF};

pub const SUPPORTED_CAMPAIGN_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(default = "default_campaign_version")]
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Environment the campaign was written for; running it anywhere else fails.
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub steps: Vec<CampaignStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStep {
    pub id: String,
    #[serde(default)]
    pub if_exists: IfExists,
    #[serde(flatten)]
    pub action: StepAction,
}

/// What a writer step does when its outputs are already recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfExists {
    #[default]
    Skip,
    /// Run `verify` against the existing record, then redo the step.
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    Record(RecordStep),
    Deploy(DeployStep),
    Call(CallStep),
    Lookup(LookupStep),
    Validate(ValidateStep),
    TimelockQueue(TimelockQueueStep),
}

/// Record an externally deployed address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStep {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployStep {
    pub name: String,
    pub artifact: String,
    #[serde(default)]
    pub constructor: Vec<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub verify: Vec<Check>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStep {
    pub target: String,
    pub signature: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub value: Option<String>,
    /// View checks that hold once the call has taken effect; when all of them
    /// pass the call is not sent. `target` defaults to the call target.
    #[serde(default)]
    pub skip_if: Vec<Check>,
}

/// Read an address from a view function and record it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupStep {
    pub name: String,
    pub target: String,
    pub signature: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub verify: Vec<Check>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateStep {
    pub checks: Vec<Check>,
}

/// A view call whose decoded result must equal `expect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    /// Defaults to `@self` in `verify` lists.
    #[serde(default)]
    pub target: Option<String>,
    pub signature: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub returns: Vec<String>,
    pub expect: Vec<Value>,
    /// Allowed absolute difference for integer results.
    #[serde(default)]
    pub tolerance: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelockQueueStep {
    pub label: String,
    pub timelock: String,
    #[serde(with = "decimal_u64")]
    pub eta: u64,
    pub transactions: Vec<TimelockTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockTransaction {
    pub info: String,
    pub target: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub param_types: Vec<String>,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// A timelock batch queued outside of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelockBatchFile {
    #[serde(with = "decimal_u64")]
    pub eta: u64,
    pub transactions: Vec<TimelockTransaction>,
}

impl TimelockBatchFile {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        read_document(path, "timelock batch")
    }

    /// The equivalent `timelock_queue` step, validated like one.
    pub fn into_step(self, label: &str, timelock: &str) -> Result<TimelockQueueStep> {
        let step = TimelockQueueStep {
            label: label.to_string(),
            timelock: timelock.to_string(),
            eta: self.eta,
            transactions: self.transactions,
        };
        let campaign = Campaign {
            version: SUPPORTED_CAMPAIGN_VERSION,
            name: label.to_string(),
            description: None,
            environment: None,
            steps: vec![CampaignStep {
                id: label.to_string(),
                if_exists: IfExists::Skip,
                action: StepAction::TimelockQueue(step),
            }],
        };
        campaign.validate()?;
        match campaign.steps.into_iter().next().map(|step| step.action) {
            Some(StepAction::TimelockQueue(step)) => Ok(step),
            _ => bail!("timelock batch `{label}` produced no queue step"),
        }
    }
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Record(_) => "record",
            StepAction::Deploy(_) => "deploy",
            StepAction::Call(_) => "call",
            StepAction::Lookup(_) => "lookup",
            StepAction::Validate(_) => "validate",
            StepAction::TimelockQueue(_) => "timelock_queue",
        }
    }

    /// Registry name this step writes, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            StepAction::Record(step) => Some(step.name.as_str()),
            StepAction::Deploy(step) => Some(step.name.as_str()),
            StepAction::Lookup(step) => Some(step.name.as_str()),
            _ => None,
        }
    }

    /// Checks run against an existing record before it is overwritten.
    pub fn verify(&self) -> &[Check] {
        match self {
            StepAction::Deploy(step) => step.verify.as_slice(),
            StepAction::Lookup(step) => step.verify.as_slice(),
            _ => &[],
        }
    }

    /// Every registry name the step reads, in first-use order.
    pub fn reads(&self) -> Vec<String> {
        let mut refs = Vec::new();
        let mut strings: Vec<&str> = Vec::new();
        let mut values: Vec<&Value> = Vec::new();
        match self {
            StepAction::Record(step) => strings.push(&step.address),
            StepAction::Deploy(step) => values.extend(&step.args),
            StepAction::Call(step) => {
                strings.push(&step.target);
                values.extend(&step.args);
                push_checks(&step.skip_if, &mut strings, &mut values);
            }
            StepAction::Lookup(step) => {
                strings.push(&step.target);
                values.extend(&step.args);
            }
            StepAction::Validate(step) => push_checks(&step.checks, &mut strings, &mut values),
            StepAction::TimelockQueue(step) => {
                strings.push(&step.timelock);
                for tx in &step.transactions {
                    strings.push(&tx.target);
                    values.extend(&tx.params);
                }
            }
        }
        push_checks(self.verify(), &mut strings, &mut values);

        for raw in strings {
            collect_refs(&Value::String(raw.to_string()), &mut refs);
        }
        for value in values {
            collect_refs(value, &mut refs);
        }
        refs
    }
}

fn push_checks<'a>(checks: &'a [Check], strings: &mut Vec<&'a str>, values: &mut Vec<&'a Value>) {
    for check in checks {
        if let Some(target) = check.target.as_deref() {
            strings.push(target);
        }
        values.extend(&check.args);
        values.extend(&check.expect);
    }
}

impl Campaign {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let campaign: Self = read_document(path, "campaign")?;
        campaign.validate()?;
        Ok(campaign)
    }

    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        self.collect_validation_issues(&mut issues);
        if issues.is_empty() {
            return Ok(());
        }

        let formatted = issues
            .into_iter()
            .enumerate()
            .map(|(idx, issue)| format!("  {}. {}", idx + 1, issue))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Campaign validation failed:\n{formatted}");
    }

    /// Index of the step writing `name`, searching the whole campaign.
    pub fn producer_of(&self, name: &str) -> Option<(usize, &CampaignStep)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.action.output() == Some(name))
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id)
    }

    fn collect_validation_issues(&self, issues: &mut Vec<String>) {
        if self.version != SUPPORTED_CAMPAIGN_VERSION {
            issues.push(format!(
                "version {} is not supported (expected {})",
                self.version, SUPPORTED_CAMPAIGN_VERSION
            ));
        }
        if self.name.trim().is_empty() {
            issues.push("name cannot be empty".to_string());
        }
        if self.steps.is_empty() {
            issues.push("steps must contain at least one entry".to_string());
        }

        let mut seen_ids = HashSet::new();
        let mut seen_labels = HashSet::new();
        for (idx, step) in self.steps.iter().enumerate() {
            let step_number = idx + 1;
            let label = format!("step {step_number} (`{}`)", step.id);

            if step.id.trim().is_empty() {
                issues.push(format!("step {step_number} has an empty `id`"));
            } else if !seen_ids.insert(step.id.as_str()) {
                issues.push(format!("duplicate step id `{}`", step.id));
            }

            if let Some(name) = step.action.output() {
                if !is_valid_name(name) || name == "self" {
                    issues.push(format!("{label}: invalid registry name `{name}`"));
                }
            }
            if step.if_exists == IfExists::Overwrite
                && matches!(step.action, StepAction::Call(_) | StepAction::Validate(_))
            {
                issues.push(format!(
                    "{label}: `if_exists` only applies to steps that record something"
                ));
            }
            for read in step.action.reads() {
                if !is_valid_name(&read) {
                    issues.push(format!("{label}: invalid reference `@{read}`"));
                }
            }

            match &step.action {
                StepAction::Record(record) => {
                    if record.address.trim().is_empty() {
                        issues.push(format!("{label}: record `address` cannot be empty"));
                    }
                }
                StepAction::Deploy(deploy) => {
                    if deploy.artifact.trim().is_empty() {
                        issues.push(format!("{label}: deploy `artifact` cannot be empty"));
                    }
                    check_types(&label, "constructor", &deploy.constructor, deploy.args.len(), issues);
                    check_list(&label, &deploy.verify, true, issues);
                }
                StepAction::Call(call) => {
                    check_call(&label, &call.signature, call.args.len(), issues);
                    check_list(&label, &call.skip_if, true, issues);
                }
                StepAction::Lookup(lookup) => {
                    check_call(&label, &lookup.signature, lookup.args.len(), issues);
                    check_list(&label, &lookup.verify, true, issues);
                }
                StepAction::Validate(validate) => {
                    if validate.checks.is_empty() {
                        issues.push(format!("{label}: validate step requires at least one check"));
                    }
                    check_list(&label, &validate.checks, false, issues);
                }
                StepAction::TimelockQueue(queue) => {
                    if !is_valid_name(&queue.label) {
                        issues.push(format!("{label}: invalid snapshot label `{}`", queue.label));
                    } else if !seen_labels.insert(queue.label.as_str()) {
                        issues.push(format!("duplicate timelock label `{}`", queue.label));
                    }
                    if queue.transactions.is_empty() {
                        issues.push(format!("{label}: timelock_queue requires at least one transaction"));
                    }
                    for (tx_idx, tx) in queue.transactions.iter().enumerate() {
                        let tx_label = format!("{label} transaction {}", tx_idx + 1);
                        if tx.info.trim().is_empty() {
                            issues.push(format!("{tx_label}: `info` cannot be empty"));
                        }
                        check_types(&tx_label, "paramTypes", &tx.param_types, tx.params.len(), issues);
                        if !tx.signature.is_empty() {
                            if let Err(err) = signature_arguments(&tx.signature) {
                                issues.push(format!("{tx_label}: {err}"));
                            }
                        }
                    }
                }
            }
        }
    }
}

/// YAML by extension, JSON otherwise.
fn read_document<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} {}", what, path.display()))?;
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if ext == "yaml" || ext == "yml" {
        serde_yaml::from_str::<T>(&raw)
            .with_context(|| format!("Invalid YAML {} in {}", what, path.display()))
    } else {
        serde_json::from_str::<T>(&raw)
            .with_context(|| format!("Invalid JSON {} in {}", what, path.display()))
    }
}

fn check_types(label: &str, field: &str, types: &[String], values: usize, issues: &mut Vec<String>) {
    if let Err(err) = parse_param_types(types) {
        issues.push(format!("{label}: {field}: {err}"));
    } else if types.len() != values {
        issues.push(format!(
            "{label}: {} `{field}` types but {} values",
            types.len(),
            values
        ));
    }
}

fn check_call(label: &str, signature: &str, args: usize, issues: &mut Vec<String>) {
    match signature_arguments(signature) {
        Ok(types) => check_types(label, signature, &types, args, issues),
        Err(err) => issues.push(format!("{label}: {err}")),
    }
}

fn check_list(label: &str, checks: &[Check], is_verify: bool, issues: &mut Vec<String>) {
    for (idx, check) in checks.iter().enumerate() {
        let check_label = format!("{label} check {}", idx + 1);
        if check.target.is_none() && !is_verify {
            issues.push(format!("{check_label}: `target` is required"));
        }
        check_call(&check_label, &check.signature, check.args.len(), issues);
        check_types(&check_label, "returns", &check.returns, check.expect.len(), issues);
        if check.target.as_deref() == Some(SELF_REF) && !is_verify {
            issues.push(format!("{check_label}: `{SELF_REF}` is only available in `verify`"));
        }
        if let Some(tolerance) = check.tolerance.as_deref() {
            if rollout_types::abi::parse_uint_str(tolerance).is_err() {
                issues.push(format!("{check_label}: invalid tolerance `{tolerance}`"));
            }
        }
    }
}

fn default_campaign_version() -> u32 {
    SUPPORTED_CAMPAIGN_VERSION
}

//! Executors for each campaign step kind.
//!
//! Executors assume their inputs are already resolved and the idempotency
//! decision is already made; they only talk to the chain and the registry.

use anyhow::{anyhow, bail, Context, Result};
use ethers::abi::{ParamType, Token};
use ethers::types::I256;
use rollout_timelock::TimelockEntry;
use rollout_types::abi::{
    checksum, decode, encode_call, encode_params, parse_param_types, parse_uint_str,
    token_to_json, tokenize,
};
use rollout_types::{Address, Bytes, H256, U256};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::campaign::{
    CallStep, Check, DeployStep, LookupStep, RecordStep, StepAction, TimelockQueueStep,
    ValidateStep,
};
use crate::context::RolloutContext;
use crate::resolve::{Inputs, SELF_REF};

/// What a completed step produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepOutput {
    /// Registry names written, with their checksummed addresses.
    pub outputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl StepOutput {
    fn recorded(name: &str, address: Address) -> Self {
        let mut outputs = BTreeMap::new();
        outputs.insert(name.to_string(), checksum(&address));
        Self {
            outputs,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Result of one view-call check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub target: String,
    pub signature: String,
    pub expected: Vec<Value>,
    pub actual: Vec<Value>,
    pub passed: bool,
}

/// Run one step. `existing` is the current record of the step's output when
/// it is being overwritten.
pub async fn execute_step(
    ctx: &RolloutContext,
    action: &StepAction,
    inputs: &Inputs,
    existing: Option<Address>,
) -> Result<StepOutput> {
    if let Some(address) = existing {
        let checks = action.verify();
        if !checks.is_empty() {
            verify_existing(ctx, checks, &inputs.with_self(address)).await?;
        }
    }

    match action {
        StepAction::Record(step) => record(ctx, step, inputs),
        StepAction::Deploy(step) => deploy(ctx, step, inputs).await,
        StepAction::Call(step) => call(ctx, step, inputs).await,
        StepAction::Lookup(step) => lookup(ctx, step, inputs).await,
        StepAction::Validate(step) => validate(ctx, step, inputs).await,
        StepAction::TimelockQueue(step) => queue_timelock_batch(ctx, step, inputs, None).await,
    }
}

fn record(ctx: &RolloutContext, step: &RecordStep, inputs: &Inputs) -> Result<StepOutput> {
    let address = inputs.address(&step.address)?;
    ctx.registry.put(&ctx.target, &step.name, address, None)?;
    info!(name = %step.name, address = %checksum(&address), "recorded address");
    Ok(StepOutput::recorded(&step.name, address))
}

async fn deploy(ctx: &RolloutContext, step: &DeployStep, inputs: &Inputs) -> Result<StepOutput> {
    let chain = ctx.chain()?;
    let args = inputs.values(&step.args)?;
    let constructor_args = encode_params(&step.constructor, &args)
        .with_context(|| format!("Failed to encode constructor arguments of {}", step.artifact))?;
    let bytecode = ctx.artifacts.bytecode(&step.artifact)?;

    let mut init_code = bytecode.to_vec();
    init_code.extend_from_slice(&constructor_args);
    let deployment = chain
        .deploy(Bytes::from(init_code), &ctx.send_options())
        .await
        .with_context(|| format!("Failed to deploy {}", step.artifact))?;

    ctx.registry.put(
        &ctx.target,
        &step.name,
        deployment.address,
        deployment.block_number,
    )?;
    info!(
        name = %step.name,
        artifact = %step.artifact,
        address = %checksum(&deployment.address),
        block = ?deployment.block_number,
        "deployed"
    );
    Ok(StepOutput::recorded(&step.name, deployment.address).with_detail(serde_json::json!({
        "txHash": format!("{:?}", deployment.tx_hash),
        "block": deployment.block_number,
    })))
}

async fn call(ctx: &RolloutContext, step: &CallStep, inputs: &Inputs) -> Result<StepOutput> {
    let chain = ctx.chain()?;
    let target = inputs.address(&step.target)?;
    let calldata = encode_call(&step.signature, &inputs.values(&step.args)?)?;
    let mut options = ctx.send_options();
    if let Some(value) = step.value.as_deref() {
        let value = parse_uint_str(value).map_err(|e| anyhow!("invalid value `{value}`: {e}"))?;
        options = options.with_value(value);
    }
    let receipt = chain
        .send(target, calldata, &options)
        .await
        .with_context(|| format!("{} on {} failed", step.signature, checksum(&target)))?;
    info!(
        signature = %step.signature,
        target = %checksum(&target),
        tx_hash = ?receipt.tx_hash,
        "call mined"
    );
    Ok(StepOutput::default().with_detail(serde_json::json!({
        "txHash": format!("{:?}", receipt.tx_hash),
        "block": receipt.block_number,
    })))
}

/// Whether every `skip_if` check of a call already holds, so sending it again
/// would change nothing. A call without checks is never considered applied.
pub async fn call_already_applied(
    ctx: &RolloutContext,
    step: &CallStep,
    inputs: &Inputs,
) -> Result<bool> {
    if step.skip_if.is_empty() {
        return Ok(false);
    }
    let target = inputs.address(&step.target)?;
    let results = run_checks(ctx, &step.skip_if, &inputs.with_self(target)).await?;
    Ok(results.iter().all(|r| r.passed))
}

async fn lookup(ctx: &RolloutContext, step: &LookupStep, inputs: &Inputs) -> Result<StepOutput> {
    let chain = ctx.chain()?;
    let target = inputs.address(&step.target)?;
    let calldata = encode_call(&step.signature, &inputs.values(&step.args)?)?;
    let output = chain
        .call(target, calldata)
        .await
        .with_context(|| format!("{} on {} failed", step.signature, checksum(&target)))?;
    let tokens = decode(&[ParamType::Address], &output)?;
    let address = match tokens.first() {
        Some(Token::Address(address)) => *address,
        _ => bail!("{} did not return an address", step.signature),
    };
    if address == Address::zero() {
        bail!("{} returned the zero address", step.signature);
    }
    ctx.registry.put(&ctx.target, &step.name, address, None)?;
    info!(name = %step.name, address = %checksum(&address), "looked up address");
    Ok(StepOutput::recorded(&step.name, address))
}

async fn validate(ctx: &RolloutContext, step: &ValidateStep, inputs: &Inputs) -> Result<StepOutput> {
    let results = run_checks(ctx, &step.checks, inputs).await?;
    let failed = results.iter().filter(|r| !r.passed).count();
    let detail = serde_json::to_value(&results)?;
    if failed > 0 {
        bail!("{} of {} checks failed: {}", failed, results.len(), summarize(&results));
    }
    Ok(StepOutput::default().with_detail(detail))
}

async fn verify_existing(ctx: &RolloutContext, checks: &[Check], inputs: &Inputs) -> Result<()> {
    let results = run_checks(ctx, checks, inputs).await?;
    if results.iter().any(|r| !r.passed) {
        bail!(
            "existing deployment is not compatible, refusing to overwrite: {}",
            summarize(&results)
        );
    }
    Ok(())
}

fn summarize(results: &[CheckResult]) -> String {
    results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| {
            format!(
                "{} on {} returned {} (expected {})",
                r.signature,
                r.target,
                Value::Array(r.actual.clone()),
                Value::Array(r.expected.clone())
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Evaluate every check; a failed comparison is a result, a failed call an error.
pub async fn run_checks(
    ctx: &RolloutContext,
    checks: &[Check],
    inputs: &Inputs,
) -> Result<Vec<CheckResult>> {
    let chain = ctx.chain()?;
    let mut results = Vec::with_capacity(checks.len());
    for check in checks {
        let target = inputs.address(check.target.as_deref().unwrap_or(SELF_REF))?;
        let calldata = encode_call(&check.signature, &inputs.values(&check.args)?)?;
        let output = chain
            .call(target, calldata)
            .await
            .with_context(|| format!("{} on {} failed", check.signature, checksum(&target)))?;

        let kinds = parse_param_types(&check.returns)?;
        let actual = decode(&kinds, &output)?;
        let expected = kinds
            .iter()
            .zip(inputs.values(&check.expect)?)
            .map(|(kind, value)| tokenize(kind, &value))
            .collect::<Result<Vec<_>, _>>()?;
        let tolerance = match check.tolerance.as_deref() {
            Some(raw) => {
                parse_uint_str(raw).map_err(|e| anyhow!("invalid tolerance `{raw}`: {e}"))?
            }
            None => U256::zero(),
        };
        let passed = actual.len() == expected.len()
            && actual
                .iter()
                .zip(&expected)
                .all(|(a, e)| tokens_match(a, e, tolerance));

        let result = CheckResult {
            target: checksum(&target),
            signature: check.signature.clone(),
            expected: expected.iter().map(token_to_json).collect(),
            actual: actual.iter().map(token_to_json).collect(),
            passed,
        };
        if passed {
            info!(signature = %result.signature, target = %result.target, "check passed");
        } else {
            warn!(
                signature = %result.signature,
                target = %result.target,
                actual = %serde_json::Value::Array(result.actual.clone()),
                expected = %serde_json::Value::Array(result.expected.clone()),
                "check failed"
            );
        }
        results.push(result);
    }
    Ok(results)
}

fn tokens_match(actual: &Token, expected: &Token, tolerance: U256) -> bool {
    match (actual, expected) {
        (Token::Uint(a), Token::Uint(e)) => {
            let diff = if a > e { *a - *e } else { *e - *a };
            diff <= tolerance
        }
        (Token::Int(a), Token::Int(e)) => {
            match I256::from_raw(*a).checked_sub(I256::from_raw(*e)) {
                Some(diff) => diff.unsigned_abs() <= tolerance,
                None => false,
            }
        }
        (Token::Array(a), Token::Array(e))
        | (Token::FixedArray(a), Token::FixedArray(e))
        | (Token::Tuple(a), Token::Tuple(e)) => {
            a.len() == e.len() && a.iter().zip(e).all(|(x, y)| tokens_match(x, y, tolerance))
        }
        _ => actual == expected,
    }
}

/// Queue the step's transactions in order starting at `nonce` (the account's
/// next nonce when `None`) and save them under the step's label.
///
/// If the batch stops early, everything queued so far and the failing entry
/// (with its `error`) are saved as `<label>-partial`. A later run reuses the
/// queue records of that snapshot and only submits the remaining entries.
pub async fn queue_timelock_batch(
    ctx: &RolloutContext,
    step: &TimelockQueueStep,
    inputs: &Inputs,
    nonce: Option<U256>,
) -> Result<StepOutput> {
    let chain = ctx.chain()?;
    let timelock = inputs.address(&step.timelock)?;

    let mut entries = Vec::with_capacity(step.transactions.len());
    for tx in &step.transactions {
        let mut entry = TimelockEntry::proposed(
            tx.info.clone(),
            inputs.address(&tx.target)?,
            tx.signature.clone(),
            tx.param_types.clone(),
            inputs.values(&tx.params)?,
            step.eta,
        );
        if let Some(value) = tx.value.as_deref() {
            let value = parse_uint_str(value)
                .map_err(|e| anyhow!("invalid value `{value}` in `{}`: {e}", tx.info))?;
            entry = entry.with_value(value);
        }
        entries.push(entry);
    }

    let batches = ctx.batches();
    let partial_label = format!("{}-partial", step.label);
    let already_queued: HashMap<H256, TimelockEntry> = batches
        .load_latest(&partial_label)?
        .unwrap_or_default()
        .into_iter()
        .filter(TimelockEntry::is_queued)
        .filter_map(|entry| entry.identity().ok().map(|id| (id, entry)))
        .collect();

    // Slot per entry: the earlier queue record, or a fresh submission.
    let mut slots: Vec<Option<TimelockEntry>> = entries
        .iter()
        .map(|entry| {
            entry
                .identity()
                .ok()
                .and_then(|id| already_queued.get(&id).cloned())
        })
        .collect();
    let pending: Vec<usize> = (0..entries.len()).filter(|i| slots[*i].is_none()).collect();
    let to_queue: Vec<TimelockEntry> = pending.iter().map(|i| entries[*i].clone()).collect();
    if pending.len() < entries.len() {
        info!(
            label = %step.label,
            reused = entries.len() - pending.len(),
            remaining = pending.len(),
            "resuming partially queued batch"
        );
    }

    let engine = ctx.timelock_engine(timelock)?;
    let nonce = match nonce {
        Some(nonce) => nonce,
        None => chain.next_nonce().await?,
    };
    match engine.queue_batch(&to_queue, nonce).await {
        Ok(queued) => {
            let submitted = queued.len();
            for (index, entry) in pending.iter().zip(queued) {
                slots[*index] = Some(entry);
            }
            let queued: Vec<TimelockEntry> = slots.into_iter().flatten().collect();
            let snapshot = batches.save(&step.label, &queued)?;
            info!(
                label = %step.label,
                entries = queued.len(),
                snapshot = %snapshot.name(),
                "timelock batch queued"
            );
            Ok(StepOutput::default().with_detail(serde_json::json!({
                "snapshot": snapshot.name(),
                "entries": queued.len(),
                "submitted": submitted,
                "nextNonce": (nonce + U256::from(submitted)).to_string(),
            })))
        }
        Err(mut failure) => {
            for (index, entry) in pending.iter().zip(&failure.queued) {
                slots[*index] = Some(entry.clone());
            }
            if let Some(index) = pending.get(failure.failed_index).copied() {
                let mut rejected = entries[index].clone();
                rejected.error = Some(failure.error.to_string());
                slots[index] = Some(rejected);
                failure.failed_index = index;
            }
            let recorded: Vec<TimelockEntry> = slots.into_iter().flatten().collect();
            let snapshot = batches.save(&partial_label, &recorded)?;
            warn!(
                snapshot = %snapshot.name(),
                queued = recorded.iter().filter(|e| e.is_queued()).count(),
                "saved the partially queued batch"
            );
            Err(anyhow::Error::new(failure))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::TimelockTransaction;
    use ethers::utils::get_contract_address;
    use rollout_client::MockChain;
    use rollout_types::{Environment, Target};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    const TIMELOCK_DELAY: u64 = 2 * 24 * 3600;
    const TIMELOCK_GRACE: u64 = 14 * 24 * 3600;

    fn sender() -> Address {
        Address::from_low_u64_be(0xde)
    }

    fn setup() -> (TempDir, Arc<MockChain>, RolloutContext) {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(MockChain::new(sender()));
        let ctx = RolloutContext::new(
            Target::new("mainnet", Environment::Prod),
            &dir.path().join("deployments"),
            &dir.path().join("artifacts"),
        )
        .with_chain(chain.clone());
        (dir, chain, ctx)
    }

    fn write_artifact(root: &Path, name: &str, bytecode: &str) {
        let dir = root.join("artifacts/contracts").join(format!("{name}.sol"));
        std::fs::create_dir_all(&dir).unwrap();
        let json = json!({ "contractName": name, "abi": [], "bytecode": bytecode });
        std::fs::write(dir.join(format!("{name}.json")), json.to_string()).unwrap();
    }

    fn check(target: &str, expect: &str, tolerance: Option<&str>) -> Check {
        Check {
            target: Some(target.to_string()),
            signature: "fee()".to_string(),
            args: vec![],
            returns: vec!["uint256".to_string()],
            expect: vec![json!(expect)],
            tolerance: tolerance.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn deploy_appends_constructor_args_and_records() {
        let (dir, chain, ctx) = setup();
        write_artifact(dir.path(), "Controller", "0x6080");
        let weth = Address::from_low_u64_be(0x77);
        let mut inputs = Inputs::new(Some(sender()));
        inputs.insert("WETH9", weth);

        let action = StepAction::Deploy(DeployStep {
            name: "controller".to_string(),
            artifact: "Controller".to_string(),
            constructor: vec!["address".to_string()],
            args: vec![json!("@WETH9")],
            verify: vec![],
        });
        let output = execute_step(&ctx, &action, &inputs, None).await.unwrap();

        let expected = get_contract_address(sender(), U256::zero());
        assert_eq!(output.outputs["controller"], checksum(&expected));
        let record = ctx.registry.get(&ctx.target, "controller").unwrap();
        assert_eq!(record.address, expected);
        assert!(record.block_number.is_some());

        let mut init_code = vec![0x60, 0x80];
        init_code.extend_from_slice(&encode_params(&["address"], &[json!(checksum(&weth))]).unwrap());
        assert_eq!(chain.mined()[0].calldata, Bytes::from(init_code));
    }

    #[tokio::test]
    async fn validate_compares_decoded_results() {
        let (_dir, chain, ctx) = setup();
        let controller = Address::from_low_u64_be(0x55);
        chain
            .set_view_json(controller, "fee()", &[], &["uint256"], &[json!(30)])
            .unwrap();
        let mut inputs = Inputs::new(Some(sender()));
        inputs.insert("controller", controller);

        let passing = StepAction::Validate(ValidateStep {
            checks: vec![check("@controller", "30", None)],
        });
        execute_step(&ctx, &passing, &inputs, None).await.unwrap();

        let failing = StepAction::Validate(ValidateStep {
            checks: vec![check("@controller", "31", None)],
        });
        let err = execute_step(&ctx, &failing, &inputs, None)
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("1 of 1 checks failed"), "{err}");

        let tolerant = StepAction::Validate(ValidateStep {
            checks: vec![check("@controller", "31", Some("1"))],
        });
        execute_step(&ctx, &tolerant, &inputs, None).await.unwrap();
        assert!(chain.mined().is_empty());
    }

    #[test]
    fn signed_tolerance() {
        let minus_one = Token::Int(I256::minus_one().into_raw());
        let plus_one = Token::Int(I256::one().into_raw());
        assert!(tokens_match(&minus_one, &plus_one, U256::from(2)));
        assert!(!tokens_match(&minus_one, &plus_one, U256::one()));
    }

    #[tokio::test]
    async fn lookup_records_returned_address() {
        let (_dir, chain, ctx) = setup();
        let vault = Address::from_low_u64_be(0x55);
        let strategy = Address::from_low_u64_be(0x56);
        chain
            .set_view_json(vault, "strategy()", &[], &["address"], &[json!(checksum(&strategy))])
            .unwrap();
        let mut inputs = Inputs::new(Some(sender()));
        inputs.insert("vault", vault);

        let action = StepAction::Lookup(LookupStep {
            name: "strategy".to_string(),
            target: "@vault".to_string(),
            signature: "strategy()".to_string(),
            args: vec![],
            verify: vec![],
        });
        execute_step(&ctx, &action, &inputs, None).await.unwrap();
        assert_eq!(ctx.registry.address(&ctx.target, "strategy").unwrap(), strategy);
    }

    #[tokio::test]
    async fn overwrite_refuses_incompatible_existing_record() {
        let (dir, chain, ctx) = setup();
        write_artifact(dir.path(), "Controller", "0x6080");
        let existing = Address::from_low_u64_be(0x99);
        chain
            .set_view_json(existing, "fee()", &[], &["uint256"], &[json!(10)])
            .unwrap();
        let mut verify = check("@self", "30", None);
        verify.target = None;

        let action = StepAction::Deploy(DeployStep {
            name: "controller".to_string(),
            artifact: "Controller".to_string(),
            constructor: vec![],
            args: vec![],
            verify: vec![verify],
        });
        let err = execute_step(&ctx, &action, &Inputs::new(Some(sender())), Some(existing))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("refusing to overwrite"), "{err}");
        assert!(chain.mined().is_empty());
    }

    fn queue_step(eta: u64) -> StepAction {
        StepAction::TimelockQueue(TimelockQueueStep {
            label: "ops_batch".to_string(),
            timelock: "@timelock".to_string(),
            eta,
            transactions: vec![
                TimelockTransaction {
                    info: "raise fee".to_string(),
                    target: "@controller".to_string(),
                    value: None,
                    signature: "setFee(uint256)".to_string(),
                    param_types: vec!["uint256".to_string()],
                    params: vec![json!("30")],
                },
                TimelockTransaction {
                    info: "hand over".to_string(),
                    target: "@controller".to_string(),
                    value: Some("0".to_string()),
                    signature: "setGovernance(address)".to_string(),
                    param_types: vec!["address".to_string()],
                    params: vec![json!("@timelock")],
                },
            ],
        })
    }

    fn timelock_inputs(timelock: Address) -> Inputs {
        let mut inputs = Inputs::new(Some(sender()));
        inputs.insert("timelock", timelock);
        inputs.insert("controller", Address::from_low_u64_be(0x55));
        inputs
    }

    #[tokio::test]
    async fn timelock_queue_saves_snapshot() {
        let (_dir, chain, ctx) = setup();
        let timelock = Address::from_low_u64_be(0x71);
        chain.install_timelock(timelock, TIMELOCK_DELAY, TIMELOCK_GRACE);
        let eta = chain.now() + TIMELOCK_DELAY;

        let output = execute_step(&ctx, &queue_step(eta), &timelock_inputs(timelock), None)
            .await
            .unwrap();
        assert_eq!(output.detail.unwrap()["entries"], json!(2));

        let batches = ctx.batches();
        assert!(batches.exists("ops_batch").unwrap());
        let name = batches.list().unwrap()[0].name();
        let entries = batches.load(&name).unwrap();
        assert!(entries.iter().all(|e| e.is_queued() && !e.is_executed()));
        assert_eq!(entries[1].params, vec![json!(checksum(&timelock))]);
        assert_eq!(chain.mined_nonces(), vec![U256::zero(), U256::one()]);
    }

    #[tokio::test]
    async fn timelock_queue_with_early_eta_records_rejection() {
        let (_dir, chain, ctx) = setup();
        let timelock = Address::from_low_u64_be(0x71);
        chain.install_timelock(timelock, TIMELOCK_DELAY, TIMELOCK_GRACE);
        let eta = chain.now() + 60;

        let err = execute_step(&ctx, &queue_step(eta), &timelock_inputs(timelock), None)
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("rejected"), "{err}");
        assert!(chain.mined().is_empty());

        let batches = ctx.batches();
        assert!(!batches.exists("ops_batch").unwrap());
        let partial = batches.load_latest("ops_batch-partial").unwrap().unwrap();
        assert_eq!(partial.len(), 1);
        assert!(!partial[0].is_queued());
        assert!(partial[0].error.as_deref().unwrap().contains("delay"));
    }
}

//! Campaign runs against the in-memory chain.

use ethers::utils::get_contract_address;
use rollout_client::mock::MOCK_GENESIS_TIME;
use rollout_client::MockChain;
use rollout_types::abi::{checksum, parse_address};
use rollout_types::{Address, Environment, Target, U256};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use vault_rollout::pipeline::{run_campaign, PipelineError, RunOptions, StepStatus};
use vault_rollout::{Campaign, RolloutContext};

const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
const TIMELOCK: &str = "0x0000000000000000000000000000000000000071";
const DELAY: u64 = 2 * 24 * 3600;
const GRACE: u64 = 14 * 24 * 3600;

fn deployer() -> Address {
    Address::from_low_u64_be(0xde)
}

fn write_artifact(root: &Path, name: &str) {
    let dir = root.join("contracts").join(format!("{name}.sol"));
    std::fs::create_dir_all(&dir).unwrap();
    let artifact = json!({ "contractName": name, "abi": [], "bytecode": "0x60806040" });
    std::fs::write(dir.join(format!("{name}.json")), artifact.to_string()).unwrap();
}

struct Harness {
    _dir: TempDir,
    chain: Arc<MockChain>,
    ctx: RolloutContext,
}

fn harness(network: &str, environment: Environment) -> Harness {
    let dir = TempDir::new().unwrap();
    let artifacts = dir.path().join("artifacts");
    write_artifact(&artifacts, "KinkFeeModel");
    write_artifact(&artifacts, "Controller");

    let chain = Arc::new(MockChain::new(deployer()));
    chain.install_timelock(parse_address(TIMELOCK).unwrap(), DELAY, GRACE);
    let ctx = RolloutContext::new(
        Target::new(network, environment),
        &dir.path().join("deployments"),
        &artifacts,
    )
    .with_chain(chain.clone());
    Harness {
        _dir: dir,
        chain,
        ctx,
    }
}

fn vaults_campaign() -> Campaign {
    let raw = format!(
        r#"
name: vaults
environment: prod
steps:
  - id: weth
    kind: record
    name: WETH9
    address: "{WETH}"
  - id: timelock
    kind: record
    name: timelock
    address: "{TIMELOCK}"
  - id: fee-model
    kind: deploy
    name: kink_fee_model
    artifact: KinkFeeModel
    constructor: [uint256, uint256]
    args: ["100", "2000"]
  - id: controller
    kind: deploy
    name: controller
    artifact: Controller
    constructor: [address, address]
    args: ["@kink_fee_model", "$deployer"]
    verify:
      - signature: "feeModel()"
        returns: [address]
        expect: ["@kink_fee_model"]
  - id: set-token
    kind: call
    target: "@controller"
    signature: "setToken(address)"
    args: ["@WETH9"]
  - id: vault
    kind: lookup
    name: vault_weth
    target: "@controller"
    signature: "vaults(address)"
    args: ["@WETH9"]
  - id: check
    kind: validate
    checks:
      - target: "@controller"
        signature: "feeModel()"
        returns: [address]
        expect: ["@kink_fee_model"]
  - id: handover
    kind: timelock_queue
    label: ops_batch
    timelock: "@timelock"
    eta: "{eta}"
    transactions:
      - info: hand controller to timelock
        target: "@controller"
        signature: "setGovernance(address)"
        paramTypes: [address]
        params: ["@timelock"]
"#,
        eta = MOCK_GENESIS_TIME + DELAY
    );
    let campaign: Campaign = serde_yaml::from_str(&raw).unwrap();
    campaign.validate().unwrap();
    campaign
}

/// Views the campaign's lookup and checks read, at the addresses the
/// deployments will land on.
fn install_views(chain: &MockChain, vault: Address) -> (Address, Address) {
    let fee_model = get_contract_address(deployer(), U256::zero());
    let controller = get_contract_address(deployer(), U256::one());
    chain
        .set_view_json(controller, "feeModel()", &[], &["address"], &[json!(checksum(&fee_model))])
        .unwrap();
    chain
        .set_view_json(
            controller,
            "vaults(address)",
            &[json!(WETH)],
            &["address"],
            &[json!(checksum(&vault))],
        )
        .unwrap();
    (fee_model, controller)
}

#[tokio::test]
async fn full_campaign_records_every_output() {
    let h = harness("mainnet", Environment::Prod);
    let vault = Address::from_low_u64_be(0x99);
    let (fee_model, controller) = install_views(&h.chain, vault);

    let report = run_campaign(&h.ctx, &vaults_campaign(), &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.total_steps, 8);
    assert_eq!(report.completed_steps, 8);

    let registry = &h.ctx.registry;
    let target = &h.ctx.target;
    assert_eq!(registry.address(target, "kink_fee_model").unwrap(), fee_model);
    assert_eq!(registry.address(target, "controller").unwrap(), controller);
    assert_eq!(registry.address(target, "vault_weth").unwrap(), vault);
    assert!(registry.get(target, "controller").unwrap().block_number.is_some());

    let batches = h.ctx.batches();
    assert!(batches.exists("ops_batch").unwrap());
    let nonces: Vec<u64> = h.chain.mined_nonces().iter().map(|n| n.as_u64()).collect();
    assert_eq!(nonces, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn rerun_skips_recorded_outputs_and_saved_batches() {
    let h = harness("mainnet", Environment::Prod);
    install_views(&h.chain, Address::from_low_u64_be(0x99));
    let campaign = vaults_campaign();
    run_campaign(&h.ctx, &campaign, &RunOptions::default())
        .await
        .unwrap();

    let rerun = run_campaign(&h.ctx, &campaign, &RunOptions::default())
        .await
        .unwrap();
    let statuses: Vec<_> = rerun.steps.iter().map(|s| (s.id.as_str(), s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("weth", StepStatus::Skipped),
            ("timelock", StepStatus::Skipped),
            ("fee-model", StepStatus::Skipped),
            ("controller", StepStatus::Skipped),
            ("set-token", StepStatus::Completed),
            ("vault", StepStatus::Skipped),
            ("check", StepStatus::Completed),
            ("handover", StepStatus::Skipped),
        ]
    );
    assert_eq!(h.chain.mined().len(), 5);
    assert_eq!(h.ctx.batches().list().unwrap().len(), 1);
}

#[tokio::test]
async fn overwrite_redeploys_after_verifying_existing_record() {
    let h = harness("mainnet", Environment::Prod);
    install_views(&h.chain, Address::from_low_u64_be(0x99));
    let mut campaign = vaults_campaign();
    run_campaign(&h.ctx, &campaign, &RunOptions::default())
        .await
        .unwrap();
    let first = h.ctx.registry.address(&h.ctx.target, "controller").unwrap();
    // The redeployment lands at nonce 4; the validate step reads it.
    let fee_model = h.ctx.registry.address(&h.ctx.target, "kink_fee_model").unwrap();
    h.chain
        .set_view_json(
            get_contract_address(deployer(), U256::from(4)),
            "feeModel()",
            &[],
            &["address"],
            &[json!(checksum(&fee_model))],
        )
        .unwrap();

    campaign.steps[3].if_exists = vault_rollout::campaign::IfExists::Overwrite;
    let options = RunOptions {
        resume_from: Some("controller".to_string()),
        ..RunOptions::default()
    };
    let report = run_campaign(&h.ctx, &campaign, &options).await.unwrap();
    assert_eq!(report.steps[3].status, StepStatus::Completed);
    let second = h.ctx.registry.address(&h.ctx.target, "controller").unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn overwrite_refuses_incompatible_deployment() {
    let h = harness("mainnet", Environment::Prod);
    let mut campaign = vaults_campaign();
    campaign.steps[3].if_exists = vault_rollout::campaign::IfExists::Overwrite;

    let stale = Address::from_low_u64_be(0x42);
    h.ctx
        .registry
        .put(&h.ctx.target, "kink_fee_model", Address::from_low_u64_be(0x43), None)
        .unwrap();
    h.ctx.registry.put(&h.ctx.target, "controller", stale, None).unwrap();
    h.chain
        .set_view_json(stale, "feeModel()", &[], &["address"], &[json!(checksum(&Address::zero()))])
        .unwrap();

    let options = RunOptions {
        resume_from: Some("controller".to_string()),
        ..RunOptions::default()
    };
    let err = run_campaign(&h.ctx, &campaign, &options).await.unwrap_err();
    assert_eq!(err.step_id(), Some("controller"));
    assert!(err.to_string().contains("refusing to overwrite"), "{err}");
    assert_eq!(h.ctx.registry.address(&h.ctx.target, "controller").unwrap(), stale);
    assert!(h.chain.mined().is_empty());
}

#[tokio::test]
async fn dependency_missing_on_target_names_key_and_target() {
    let h = harness("mainnet", Environment::Prod);
    let raw = r#"
name: fees
steps:
  - id: set-fee
    kind: call
    target: "@controller"
    signature: "setFee(uint256)"
    args: ["30"]
"#;
    let campaign: Campaign = serde_yaml::from_str(raw).unwrap();

    let err = run_campaign(&h.ctx, &campaign, &RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Step { .. }));
    let message = err.to_string();
    for needle in ["controller", "mainnet", "prod", "set-fee"] {
        assert!(message.contains(needle), "`{needle}` missing from: {message}");
    }
    assert!(message.contains("no step of this campaign records `controller`"));
    assert!(h.chain.mined().is_empty());
}

#[tokio::test]
async fn environments_do_not_share_records() {
    let prod = harness("mainnet", Environment::Prod);
    install_views(&prod.chain, Address::from_low_u64_be(0x99));
    run_campaign(&prod.ctx, &vaults_campaign(), &RunOptions::default())
        .await
        .unwrap();

    let develop = Target::new("mainnet", Environment::Develop);
    assert!(!prod.ctx.registry.contains(&develop, "controller").unwrap());
}

#[tokio::test]
async fn failed_step_aborts_remaining_steps() {
    let h = harness("mainnet", Environment::Prod);
    // No views installed: the lookup step fails.
    let err = run_campaign(&h.ctx, &vaults_campaign(), &RunOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.step_id(), Some("vault"));
    assert!(!h.ctx.registry.contains(&h.ctx.target, "vault_weth").unwrap());
    assert!(!h.ctx.batches().exists("ops_batch").unwrap());
}

//! In-memory chain for tests.
//!
//! `MockChain` mines every transaction immediately, enforces explicit
//! nonces, answers configured view calls and emulates a Compound-style
//! timelock at any address registered with [`MockChain::install_timelock`]:
//!
//! - `queueTransaction` is refused before inclusion unless
//!   `eta >= now + delay` (mirrors a failing gas estimate).
//! - `executeTransaction` reverts after inclusion unless the call is queued,
//!   `now >= eta`, `now <= eta + grace` and the target does not revert.

use ethers::utils::{get_contract_address, keccak256};
use parking_lot::Mutex;
use rollout_types::abi::{encode_call, encode_params};
use rollout_types::{Address, Bytes, EncodingError, TimelockCall, TimelockMethod, H256, U256};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::client::{ChainClient, Deployment, SendOptions, TxReceipt};
use crate::error::RemoteError;

/// Default block time of a fresh mock.
pub const MOCK_GENESIS_TIME: u64 = 1_700_000_000;

/// A transaction the mock mined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedTx {
    pub nonce: U256,
    pub to: Option<Address>,
    pub calldata: Bytes,
    pub value: U256,
    pub gas_limit: Option<U256>,
    pub tx_hash: H256,
    pub reverted: bool,
}

#[derive(Debug, Default)]
struct MockTimelock {
    delay: u64,
    grace: u64,
    queued: HashSet<H256>,
}

#[derive(Debug)]
struct MockState {
    now: u64,
    block: u64,
    nonce: U256,
    tx_counter: u64,
    mined: Vec<MinedTx>,
    views: HashMap<(Address, Bytes), Bytes>,
    reverting: HashSet<Address>,
    timelocks: HashMap<Address, MockTimelock>,
    timelock_executions: Vec<(Address, Bytes)>,
    code: HashSet<Address>,
    /// Transactions the account can still pay for; `None` is unlimited.
    funded: Option<u64>,
}

/// What the timelock emulation decided for one call.
enum TimelockOutcome {
    Ok,
    Refused(String),
    Reverts(String),
}

#[derive(Debug)]
pub struct MockChain {
    sender: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            state: Mutex::new(MockState {
                now: MOCK_GENESIS_TIME,
                block: 1,
                nonce: U256::zero(),
                tx_counter: 0,
                mined: Vec::new(),
                views: HashMap::new(),
                reverting: HashSet::new(),
                timelocks: HashMap::new(),
                timelock_executions: Vec::new(),
                code: HashSet::new(),
                funded: None,
            }),
        }
    }

    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    pub fn advance_time(&self, seconds: u64) {
        self.state.lock().now += seconds;
    }

    /// Emulate a timelock at `address`.
    pub fn install_timelock(&self, address: Address, delay: u64, grace: u64) {
        let mut state = self.state.lock();
        state.code.insert(address);
        state.timelocks.insert(
            address,
            MockTimelock {
                delay,
                grace,
                queued: HashSet::new(),
            },
        );
    }

    /// Make every call into `address` revert.
    pub fn set_reverting(&self, address: Address) {
        self.state.lock().reverting.insert(address);
    }

    pub fn clear_reverting(&self, address: Address) {
        self.state.lock().reverting.remove(&address);
    }

    /// Let the account pay for `count` more transactions (`None`: unlimited).
    /// Sends beyond that are rejected before inclusion.
    pub fn fund_transactions(&self, count: Option<u64>) {
        self.state.lock().funded = count;
    }

    /// Answer the exact `calldata` sent to `to` with `output`.
    pub fn set_view(&self, to: Address, calldata: Bytes, output: Bytes) {
        self.state.lock().views.insert((to, calldata), output);
    }

    /// `set_view` with the call and the answer given as JSON values.
    pub fn set_view_json(
        &self,
        to: Address,
        signature: &str,
        args: &[Value],
        return_types: &[&str],
        returns: &[Value],
    ) -> Result<(), EncodingError> {
        let calldata = encode_call(signature, args)?;
        let output = encode_params(return_types, returns)?;
        self.set_view(to, calldata, output);
        Ok(())
    }

    /// Every mined transaction, in nonce order.
    pub fn mined(&self) -> Vec<MinedTx> {
        self.state.lock().mined.clone()
    }

    /// Nonces of mined transactions, in mining order.
    pub fn mined_nonces(&self) -> Vec<U256> {
        self.state.lock().mined.iter().map(|tx| tx.nonce).collect()
    }

    /// Calls the emulated timelocks forwarded to their targets.
    pub fn timelock_executions(&self) -> Vec<(Address, Bytes)> {
        self.state.lock().timelock_executions.clone()
    }

    pub fn is_queued(&self, timelock: Address, tx_hash: H256) -> bool {
        self.state
            .lock()
            .timelocks
            .get(&timelock)
            .map(|t| t.queued.contains(&tx_hash))
            .unwrap_or(false)
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.state.lock().code.contains(&address)
    }
}

impl MockState {
    fn next_hash(&mut self) -> H256 {
        self.tx_counter += 1;
        let mut seed = b"mock-tx".to_vec();
        seed.extend_from_slice(&self.tx_counter.to_be_bytes());
        H256::from(keccak256(seed))
    }

    fn check_nonce(&self, options: &SendOptions) -> Result<U256, RemoteError> {
        if self.funded == Some(0) {
            return Err(RemoteError::rejected(
                "insufficient funds for gas * price + value",
            ));
        }
        match options.nonce {
            Some(nonce) if nonce != self.nonce => Err(RemoteError::rejected(format!(
                "nonce {} does not match next account nonce {}",
                nonce, self.nonce
            ))),
            _ => Ok(self.nonce),
        }
    }

    fn mine(
        &mut self,
        nonce: U256,
        to: Option<Address>,
        calldata: Bytes,
        options: &SendOptions,
        reverted: bool,
    ) -> TxReceipt {
        let tx_hash = self.next_hash();
        self.nonce = nonce + U256::one();
        if let Some(funded) = self.funded.as_mut() {
            *funded = funded.saturating_sub(1);
        }
        self.block += 1;
        self.mined.push(MinedTx {
            nonce,
            to,
            calldata,
            value: options.value.unwrap_or_default(),
            gas_limit: options.gas_limit,
            tx_hash,
            reverted,
        });
        TxReceipt {
            tx_hash,
            block_number: Some(self.block),
        }
    }

    /// Validate (and with `apply`, perform) a timelock call.
    fn timelock(&mut self, timelock: Address, calldata: &[u8], apply: bool) -> TimelockOutcome {
        let (method, call) = match TimelockCall::decode(calldata) {
            Ok(decoded) => decoded,
            Err(e) => return TimelockOutcome::Refused(format!("unknown timelock call: {}", e)),
        };
        let now = self.now;
        let target_reverts = self.reverting.contains(&call.target);
        let Some(lock) = self.timelocks.get_mut(&timelock) else {
            return TimelockOutcome::Refused("not a timelock".to_string());
        };
        let hash = call.tx_hash();
        match method {
            TimelockMethod::Queue => {
                if call.eta < now + lock.delay {
                    return TimelockOutcome::Refused(
                        "Timelock::queueTransaction: Estimated execution block must satisfy delay."
                            .to_string(),
                    );
                }
                if apply {
                    lock.queued.insert(hash);
                }
                TimelockOutcome::Ok
            }
            TimelockMethod::Execute => {
                if !lock.queued.contains(&hash) {
                    return TimelockOutcome::Reverts(
                        "Timelock::executeTransaction: Transaction hasn't been queued.".to_string(),
                    );
                }
                if now < call.eta {
                    return TimelockOutcome::Reverts(
                        "Timelock::executeTransaction: Transaction hasn't surpassed time lock."
                            .to_string(),
                    );
                }
                if now > call.eta + lock.grace {
                    return TimelockOutcome::Reverts(
                        "Timelock::executeTransaction: Transaction is stale.".to_string(),
                    );
                }
                if target_reverts {
                    return TimelockOutcome::Reverts(
                        "Timelock::executeTransaction: Transaction execution reverted.".to_string(),
                    );
                }
                if apply {
                    lock.queued.remove(&hash);
                    let mut forwarded = Vec::new();
                    if !call.signature.is_empty() {
                        forwarded.extend_from_slice(&ethers::utils::id(&call.signature));
                    }
                    forwarded.extend_from_slice(&call.data);
                    self.timelock_executions
                        .push((call.target, Bytes::from(forwarded)));
                }
                TimelockOutcome::Ok
            }
        }
    }
}

#[async_trait::async_trait]
impl ChainClient for MockChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn block_number(&self) -> Result<u64, RemoteError> {
        Ok(self.state.lock().block)
    }

    async fn timestamp(&self) -> Result<u64, RemoteError> {
        Ok(self.state.lock().now)
    }

    async fn next_nonce(&self) -> Result<U256, RemoteError> {
        Ok(self.state.lock().nonce)
    }

    async fn deploy(&self, init_code: Bytes, options: &SendOptions) -> Result<Deployment, RemoteError> {
        let mut state = self.state.lock();
        if init_code.is_empty() {
            return Err(RemoteError::rejected("empty init code"));
        }
        let nonce = state.check_nonce(options)?;
        let address = get_contract_address(self.sender, nonce);
        let receipt = state.mine(nonce, None, init_code, options, false);
        state.code.insert(address);
        Ok(Deployment {
            address,
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        })
    }

    async fn send(
        &self,
        to: Address,
        calldata: Bytes,
        options: &SendOptions,
    ) -> Result<TxReceipt, RemoteError> {
        let mut state = self.state.lock();
        let nonce = state.check_nonce(options)?;

        let revert_reason = if state.reverting.contains(&to) {
            Some("execution reverted".to_string())
        } else if state.timelocks.contains_key(&to) {
            match state.timelock(to, &calldata, true) {
                TimelockOutcome::Ok => None,
                TimelockOutcome::Refused(reason) => return Err(RemoteError::Rejected { reason }),
                TimelockOutcome::Reverts(reason) => Some(reason),
            }
        } else {
            None
        };

        let receipt = state.mine(nonce, Some(to), calldata, options, revert_reason.is_some());
        match revert_reason {
            Some(reason) => Err(RemoteError::Reverted {
                tx_hash: receipt.tx_hash,
                reason,
            }),
            None => Ok(receipt),
        }
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, RemoteError> {
        let state = self.state.lock();
        state
            .views
            .get(&(to, calldata.clone()))
            .cloned()
            .ok_or_else(|| RemoteError::rejected(format!("execution reverted: no view for {:?}", to)))
    }

    async fn estimate_gas(
        &self,
        to: Address,
        calldata: Bytes,
        _value: Option<U256>,
    ) -> Result<U256, RemoteError> {
        let mut state = self.state.lock();
        if state.reverting.contains(&to) {
            return Err(RemoteError::rejected("execution reverted"));
        }
        if state.timelocks.contains_key(&to) {
            match state.timelock(to, &calldata, false) {
                TimelockOutcome::Ok => {}
                TimelockOutcome::Refused(reason) | TimelockOutcome::Reverts(reason) => {
                    return Err(RemoteError::Rejected { reason })
                }
            }
        }
        Ok(U256::from(21_000 + 16 * calldata.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_types::abi::parse_param_types;
    use serde_json::json;

    fn sender() -> Address {
        Address::from_low_u64_be(0xde)
    }

    fn call(eta: u64) -> TimelockCall {
        TimelockCall {
            target: Address::from_low_u64_be(0x7a),
            value: U256::zero(),
            signature: "setFee(uint256)".to_string(),
            data: encode_params(&["uint256"], &[json!(30)]).unwrap(),
            eta,
        }
    }

    #[tokio::test]
    async fn test_nonce_must_match() {
        let chain = MockChain::new(sender());
        let to = Address::from_low_u64_be(1);
        let bad = SendOptions::default().with_nonce(U256::from(5));
        assert!(matches!(
            chain.send(to, Bytes::new(), &bad).await,
            Err(RemoteError::Rejected { .. })
        ));
        assert_eq!(chain.next_nonce().await.unwrap(), U256::zero());

        let good = SendOptions::default().with_nonce(U256::zero());
        chain.send(to, Bytes::new(), &good).await.unwrap();
        assert_eq!(chain.next_nonce().await.unwrap(), U256::one());
    }

    #[tokio::test]
    async fn test_deploy_address_follows_nonce() {
        let chain = MockChain::new(sender());
        let deployment = chain
            .deploy(Bytes::from(vec![0x60, 0x80]), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(deployment.address, get_contract_address(sender(), U256::zero()));
        assert!(chain.has_code(deployment.address));
    }

    #[tokio::test]
    async fn test_timelock_lifecycle() {
        let chain = MockChain::new(sender());
        let timelock = Address::from_low_u64_be(0x71);
        chain.install_timelock(timelock, 3600, 14 * 86400);
        let eta = chain.now() + 7200;
        let call = call(eta);

        chain
            .send(timelock, call.queue_calldata(), &SendOptions::default())
            .await
            .unwrap();
        assert!(chain.is_queued(timelock, call.tx_hash()));

        // too early: mined but reverted
        let early = chain
            .send(timelock, call.execute_calldata(), &SendOptions::default())
            .await;
        assert!(matches!(early, Err(RemoteError::Reverted { .. })));

        chain.advance_time(7200);
        chain
            .send(timelock, call.execute_calldata(), &SendOptions::default())
            .await
            .unwrap();
        assert!(!chain.is_queued(timelock, call.tx_hash()));
        assert_eq!(chain.timelock_executions().len(), 1);
        assert_eq!(chain.mined_nonces(), vec![U256::from(0), U256::from(1), U256::from(2)]);
    }

    #[tokio::test]
    async fn test_queue_too_soon_is_refused_without_nonce() {
        let chain = MockChain::new(sender());
        let timelock = Address::from_low_u64_be(0x71);
        chain.install_timelock(timelock, 3600, 86400);
        let call = call(chain.now() + 60);

        let err = chain
            .send(timelock, call.queue_calldata(), &SendOptions::default())
            .await
            .unwrap_err();
        assert!(!err.consumed_nonce());
        assert!(chain.mined().is_empty());
    }

    #[tokio::test]
    async fn test_view_answers() {
        let chain = MockChain::new(sender());
        let vault = Address::from_low_u64_be(0x55);
        chain
            .set_view_json(vault, "reserveFactor()", &[], &["uint256"], &[json!(100)])
            .unwrap();
        let out = chain
            .call(vault, encode_call("reserveFactor()", &[]).unwrap())
            .await
            .unwrap();
        let tokens = rollout_types::abi::decode(&parse_param_types(&["uint256"]).unwrap(), &out).unwrap();
        assert_eq!(tokens[0], ethers::abi::Token::Uint(U256::from(100)));
    }
}

//! Queue and execute timelock entries.
//!
//! The engine does no delay arithmetic: `eta` is taken as given and the
//! remote timelock decides whether it is acceptable. Every submission
//! waits for inclusion before the next one starts.

use rollout_client::{RemoteError, SendOptions};
use rollout_types::env_utils::env_var_or;
use rollout_types::{TimelockCall, U256};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::TimelockClient;
use crate::entry::TimelockEntry;
use crate::error::{QueueBatchError, TimelockError};

/// Gas added on top of the execution estimate.
pub const DEFAULT_EXECUTION_GAS_MARGIN: u64 = 2_000_000;

/// Environment override for [`DEFAULT_EXECUTION_GAS_MARGIN`].
pub const GAS_MARGIN_ENV: &str = "ROLLOUT_EXECUTION_GAS_MARGIN";

/// Result of one entry in [`TimelockEngine::execute_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Executed,
    /// `executedAt` was already set in the loaded snapshot.
    AlreadyExecuted,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryOutcome {
    pub index: usize,
    pub status: OutcomeStatus,
    pub entry: TimelockEntry,
}

/// Per-entry outcomes of a batch execution, in batch order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<EntryOutcome>,
    /// Next nonce after the batch, when nonces were managed explicitly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_nonce: Option<U256>,
}

impl ExecutionReport {
    pub fn failures(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn executed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Executed)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// The entries to persist as the execution snapshot.
    pub fn entries(&self) -> Vec<TimelockEntry> {
        self.outcomes.iter().map(|o| o.entry.clone()).collect()
    }
}

pub struct TimelockEngine {
    client: Arc<dyn TimelockClient>,
    gas_margin: U256,
    gas_price: Option<U256>,
}

impl TimelockEngine {
    /// Engine with the gas margin from `ROLLOUT_EXECUTION_GAS_MARGIN` (or the default).
    pub fn new(client: Arc<dyn TimelockClient>) -> Self {
        Self {
            client,
            gas_margin: U256::from(env_var_or(GAS_MARGIN_ENV, DEFAULT_EXECUTION_GAS_MARGIN)),
            gas_price: None,
        }
    }

    pub fn with_gas_margin(mut self, gas_margin: U256) -> Self {
        self.gas_margin = gas_margin;
        self
    }

    pub fn with_gas_price(mut self, gas_price: Option<U256>) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn client(&self) -> &Arc<dyn TimelockClient> {
        &self.client
    }

    fn options(&self, nonce: Option<U256>) -> SendOptions {
        SendOptions {
            nonce,
            gas_price: self.gas_price,
            ..SendOptions::default()
        }
    }

    /// Queue one entry, letting the node pick the nonce.
    pub async fn queue(&self, entry: &TimelockEntry) -> Result<TimelockEntry, TimelockError> {
        let call = encode(entry)?;
        self.submit_queue(entry, &call, None).await
    }

    async fn submit_queue(
        &self,
        entry: &TimelockEntry,
        call: &TimelockCall,
        nonce: Option<U256>,
    ) -> Result<TimelockEntry, TimelockError> {
        let receipt = self
            .client
            .queue_transaction(call, &self.options(nonce))
            .await
            .map_err(|source| TimelockError::RemoteRejection {
                info: entry.info.clone(),
                source,
            })?;

        let mut queued = entry.clone();
        queued.queued_at = format!("{:?}", receipt.tx_hash);
        queued.execution_transaction = format!("0x{}", hex::encode(call.execute_calldata()));
        queued.error = None;
        info!(
            info = %entry.info,
            eta = entry.eta,
            tx_hash = %queued.queued_at,
            identity = ?call.tx_hash(),
            "queued timelock transaction"
        );
        Ok(queued)
    }

    /// Queue `entries` in order with nonces `starting_nonce, starting_nonce + 1, ..`.
    ///
    /// Every entry is encoded before the first submission. The batch stops
    /// at the first failure and never skips an entry.
    pub async fn queue_batch(
        &self,
        entries: &[TimelockEntry],
        starting_nonce: U256,
    ) -> Result<Vec<TimelockEntry>, QueueBatchError> {
        let mut calls = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            match encode(entry) {
                Ok(call) => calls.push(call),
                Err(error) => {
                    return Err(QueueBatchError {
                        queued: Vec::new(),
                        failed_index: index,
                        error,
                        next_nonce: starting_nonce,
                    })
                }
            }
        }

        let mut nonce = starting_nonce;
        let mut queued = Vec::with_capacity(entries.len());
        for (index, (entry, call)) in entries.iter().zip(&calls).enumerate() {
            match self.submit_queue(entry, call, Some(nonce)).await {
                Ok(done) => {
                    queued.push(done);
                    nonce += U256::one();
                }
                Err(error) => {
                    if error.consumed_nonce() {
                        nonce += U256::one();
                    }
                    warn!(index, info = %entry.info, error = %error, "timelock batch stopped");
                    return Err(QueueBatchError {
                        queued,
                        failed_index: index,
                        error,
                        next_nonce: nonce,
                    });
                }
            }
        }
        Ok(queued)
    }

    /// Execute one queued entry, letting the node pick the nonce.
    pub async fn execute(&self, entry: &TimelockEntry) -> Result<TimelockEntry, TimelockError> {
        self.execute_with_nonce(entry, None).await
    }

    async fn execute_with_nonce(
        &self,
        entry: &TimelockEntry,
        nonce: Option<U256>,
    ) -> Result<TimelockEntry, TimelockError> {
        if !entry.is_queued() {
            return Err(TimelockError::NotQueued {
                info: entry.info.clone(),
            });
        }
        let call = encode(entry)?;
        let execution = |source: RemoteError| TimelockError::Execution {
            info: entry.info.clone(),
            source,
        };

        let estimate = self
            .client
            .estimate_execution(&call)
            .await
            .map_err(execution)?;
        let gas_limit = estimate.saturating_add(self.gas_margin);
        let options = SendOptions {
            gas_limit: Some(gas_limit),
            ..self.options(nonce)
        };
        let receipt = self
            .client
            .execute_transaction(&call, &options)
            .await
            .map_err(execution)?;

        let mut executed = entry.clone();
        executed.executed_at = format!("{:?}", receipt.tx_hash);
        executed.error = None;
        info!(
            info = %entry.info,
            tx_hash = %executed.executed_at,
            gas_limit = %gas_limit,
            "executed timelock transaction"
        );
        Ok(executed)
    }

    /// Execute every entry in order. A failing entry is recorded with its
    /// error and the remaining entries are still attempted.
    ///
    /// With `starting_nonce`, each submitted transaction gets the next
    /// explicit nonce; entries refused before inclusion do not consume one.
    pub async fn execute_batch(
        &self,
        entries: &[TimelockEntry],
        starting_nonce: Option<U256>,
    ) -> ExecutionReport {
        let mut nonce = starting_nonce;
        let mut outcomes = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            if entry.is_executed() {
                outcomes.push(EntryOutcome {
                    index,
                    status: OutcomeStatus::AlreadyExecuted,
                    entry: entry.clone(),
                });
                continue;
            }

            match self.execute_with_nonce(entry, nonce).await {
                Ok(executed) => {
                    nonce = nonce.map(|n| n + U256::one());
                    outcomes.push(EntryOutcome {
                        index,
                        status: OutcomeStatus::Executed,
                        entry: executed,
                    });
                }
                Err(error) => {
                    if error.consumed_nonce() {
                        nonce = nonce.map(|n| n + U256::one());
                    }
                    warn!(index, info = %entry.info, error = %error, "timelock execution failed");
                    let mut failed = entry.clone();
                    failed.executed_at = String::new();
                    failed.error = Some(error.to_string());
                    outcomes.push(EntryOutcome {
                        index,
                        status: OutcomeStatus::Failed,
                        entry: failed,
                    });
                }
            }
        }

        ExecutionReport {
            outcomes,
            next_nonce: nonce,
        }
    }
}

fn encode(entry: &TimelockEntry) -> Result<TimelockCall, TimelockError> {
    entry.call().map_err(|source| TimelockError::Encoding {
        info: entry.info.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ContractTimelock;
    use crate::entry::EntryState;
    use rollout_client::MockChain;
    use rollout_types::Address;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DELAY: u64 = 2 * 86400;
    const GRACE: u64 = 14 * 86400;

    fn timelock_address() -> Address {
        Address::from_low_u64_be(0x71)
    }

    fn setup() -> (Arc<MockChain>, TimelockEngine) {
        let chain = Arc::new(MockChain::new(Address::from_low_u64_be(0xde)));
        chain.install_timelock(timelock_address(), DELAY, GRACE);
        let client = ContractTimelock::new(chain.clone(), timelock_address());
        let engine = TimelockEngine::new(Arc::new(client)).with_gas_margin(U256::from(2_000_000u64));
        (chain, engine)
    }

    fn fee_entry(vault: u64, fee: u64, eta: u64) -> TimelockEntry {
        TimelockEntry::proposed(
            format!("set fee of vault {vault}"),
            Address::from_low_u64_be(vault),
            "setFee(uint256)",
            vec!["uint256".to_string()],
            vec![json!(fee)],
            eta,
        )
    }

    #[tokio::test]
    async fn test_queue_sets_queued_at_and_replay_calldata() {
        let (chain, engine) = setup();
        let entry = fee_entry(1, 30, chain.now() + DELAY + 60);

        let queued = engine.queue(&entry).await.unwrap();
        assert!(queued.queued_at.starts_with("0x"));
        assert_eq!(queued.queued_at.len(), 66);
        let call = entry.call().unwrap();
        assert_eq!(
            queued.execution_transaction,
            format!("0x{}", hex::encode(call.execute_calldata()))
        );
        assert!(chain.is_queued(timelock_address(), entry.identity().unwrap()));
    }

    #[tokio::test]
    async fn test_queue_batch_uses_ascending_nonces() {
        let (chain, engine) = setup();
        let eta = chain.now() + DELAY + 60;
        let entries: Vec<_> = (1..=3).map(|i| fee_entry(i, 10 * i, eta)).collect();

        let queued = engine.queue_batch(&entries, U256::zero()).await.unwrap();
        assert_eq!(queued.len(), 3);
        assert_eq!(
            chain.mined_nonces(),
            vec![U256::from(0), U256::from(1), U256::from(2)]
        );
    }

    #[tokio::test]
    async fn test_queue_batch_stops_at_rejection() {
        let (chain, engine) = setup();
        let good = chain.now() + DELAY + 60;
        let too_soon = chain.now() + 60;
        let entries = vec![
            fee_entry(1, 10, good),
            fee_entry(2, 20, too_soon),
            fee_entry(3, 30, good),
        ];

        let err = engine.queue_batch(&entries, U256::zero()).await.unwrap_err();
        assert_eq!(err.failed_index, 1);
        assert_eq!(err.queued.len(), 1);
        assert!(matches!(err.error, TimelockError::RemoteRejection { .. }));
        // rejected before inclusion: the nonce is still free
        assert_eq!(err.next_nonce, U256::one());
        assert_eq!(chain.mined().len(), 1);
    }

    /// Accepts the first queue call, then loses track of every later one.
    #[derive(Default)]
    struct FlakyTimelock {
        submitted: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TimelockClient for FlakyTimelock {
        fn address(&self) -> Address {
            timelock_address()
        }

        async fn queue_transaction(
            &self,
            _call: &TimelockCall,
            _options: &SendOptions,
        ) -> Result<rollout_client::TxReceipt, RemoteError> {
            let index = self.submitted.fetch_add(1, Ordering::SeqCst);
            let tx_hash = rollout_types::H256::repeat_byte(index as u8 + 1);
            if index == 0 {
                Ok(rollout_client::TxReceipt {
                    tx_hash,
                    block_number: Some(1),
                })
            } else {
                Err(RemoteError::Unconfirmed {
                    tx_hash,
                    reason: "receipt polling timed out".to_string(),
                })
            }
        }

        async fn estimate_execution(&self, _call: &TimelockCall) -> Result<U256, RemoteError> {
            Ok(U256::from(50_000))
        }

        async fn execute_transaction(
            &self,
            _call: &TimelockCall,
            _options: &SendOptions,
        ) -> Result<rollout_client::TxReceipt, RemoteError> {
            Err(RemoteError::rejected("not used"))
        }
    }

    #[tokio::test]
    async fn test_queue_batch_counts_unconfirmed_nonce_as_used() {
        let engine = TimelockEngine::new(Arc::new(FlakyTimelock::default()));
        let entries: Vec<_> = (1..=3).map(|i| fee_entry(i, 10 * i, 4_000_000_000)).collect();

        let err = engine.queue_batch(&entries, U256::from(7)).await.unwrap_err();
        assert_eq!(err.failed_index, 1);
        assert_eq!(err.queued.len(), 1);
        assert!(err.error.consumed_nonce());
        assert_eq!(err.next_nonce, U256::from(9));
    }

    #[tokio::test]
    async fn test_queue_batch_encodes_everything_first() {
        let (chain, engine) = setup();
        let eta = chain.now() + DELAY + 60;
        let mut broken = fee_entry(2, 20, eta);
        broken.params = vec![json!(1.5)];
        let entries = vec![fee_entry(1, 10, eta), broken];

        let err = engine.queue_batch(&entries, U256::zero()).await.unwrap_err();
        assert_eq!(err.failed_index, 1);
        assert!(matches!(err.error, TimelockError::Encoding { .. }));
        assert!(chain.mined().is_empty());
    }

    #[tokio::test]
    async fn test_execute_adds_gas_margin() {
        let (chain, engine) = setup();
        let entry = fee_entry(1, 30, chain.now() + DELAY + 60);
        let queued = engine.queue(&entry).await.unwrap();

        chain.advance_time(DELAY + 60);
        let executed = engine.execute(&queued).await.unwrap();
        assert!(!executed.executed_at.is_empty());
        assert_eq!(executed.queued_at, queued.queued_at);
        assert_eq!(executed.state_at(chain.now()), EntryState::Executed);

        let last = chain.mined().pop().unwrap();
        assert!(last.gas_limit.unwrap() > U256::from(2_000_000u64));
    }

    #[tokio::test]
    async fn test_execute_before_eta_fails() {
        let (chain, engine) = setup();
        let entry = fee_entry(1, 30, chain.now() + DELAY + 60);
        let queued = engine.queue(&entry).await.unwrap();

        let err = engine.execute(&queued).await.unwrap_err();
        assert!(matches!(err, TimelockError::Execution { .. }));
        // the estimate failed, nothing was mined beyond the queue call
        assert_eq!(chain.mined().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_unqueued_entry() {
        let (chain, engine) = setup();
        let entry = fee_entry(1, 30, chain.now());
        assert!(matches!(
            engine.execute(&entry).await,
            Err(TimelockError::NotQueued { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_batch_continues_after_failure() {
        let (chain, engine) = setup();
        let eta = chain.now() + DELAY + 60;
        let entries: Vec<_> = (1..=3).map(|i| fee_entry(i, 10 * i, eta)).collect();
        let queued = engine.queue_batch(&entries, U256::zero()).await.unwrap();

        chain.advance_time(DELAY + 60);
        chain.set_reverting(Address::from_low_u64_be(2));

        let report = engine.execute_batch(&queued, Some(U256::from(3))).await;
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.executed_count(), 2);
        assert_eq!(report.outcomes[1].status, OutcomeStatus::Failed);
        assert!(report.outcomes[1].entry.error.is_some());
        assert!(report.outcomes[1].entry.executed_at.is_empty());
        assert!(report.outcomes[2].entry.is_executed());
        // estimate refused entry #2, so only two execution nonces were used
        assert_eq!(report.next_nonce, Some(U256::from(5)));
        assert_eq!(chain.timelock_executions().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_batch_skips_executed_entries() {
        let (chain, engine) = setup();
        let eta = chain.now() + DELAY + 60;
        let queued = engine.queue(&fee_entry(1, 10, eta)).await.unwrap();
        chain.advance_time(DELAY + 60);
        let executed = engine.execute(&queued).await.unwrap();

        let report = engine.execute_batch(&[executed], None).await;
        assert_eq!(report.outcomes[0].status, OutcomeStatus::AlreadyExecuted);
        assert!(!report.has_failures());
    }
}

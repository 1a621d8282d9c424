// services/orchestrator.rs
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::intent::{PaymentIntent, SettlementSnapshot};
use crate::models::offline_entry::OfflineQueueEntry;
use crate::models::rail::RailId;
use crate::models::rate::{CurrencyPair, QuotedRate};
use crate::models::transaction::{FailureInfo, FailureKind, Transaction, TxStatus};
use crate::services::fx_service::FxConverter;
use crate::services::gateway::{
    GatewayError, PaymentGateway, PendingSettlement, SettlementStatus,
};
use crate::services::offline_ledger::OfflineLedger;
use crate::services::rail_registry::RailRegistry;
use crate::services::transaction_store::{SettlementOutcome, TransactionStore};

const DRAIN_BATCH: i64 = 500;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Overall budget for initiate + poll before the attempt fails with
    /// Timeout and the user is offered a retry.
    pub settle_timeout: Duration,
    /// Delay before the single automatic re-initiate on GatewayUnavailable.
    pub retry_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
    /// Entries left queued for the next drain (provider unreachable).
    pub deferred: usize,
    /// Another drain already held the lock; nothing was attempted.
    pub skipped: bool,
}

enum PollOutcome {
    Success,
    Failed(String),
    Timeout,
    Cancelled,
}

enum DrainOutcome {
    Settled(TxStatus),
    Deferred,
}

/// Drives a PaymentIntent from confirmation to a terminal Transaction:
/// idempotency check, settlement snapshot, then either the online gateway
/// path (initiate + bounded poll) or the offline queue. Queued settlements
/// resolve later through `drain` or a reconciling status check, never twice.
pub struct PaymentOrchestrator {
    gateways: HashMap<RailId, Arc<dyn PaymentGateway>>,
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn OfflineLedger>,
    fx: Arc<FxConverter>,
    registry: Arc<RailRegistry>,
    connectivity: tokio::sync::watch::Receiver<bool>,
    config: OrchestratorConfig,
    /// Single-owner claim per idempotency key; concurrent submits with the
    /// same key collapse to one in-flight settlement.
    in_flight: Arc<Mutex<HashSet<String>>>,
    cancels: Mutex<HashMap<String, Arc<AtomicBool>>>,
    drain_lock: tokio::sync::Mutex<()>,
}

struct ClaimGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.key);
    }
}

impl PaymentOrchestrator {
    pub fn new(
        gateways: Vec<Arc<dyn PaymentGateway>>,
        store: Arc<dyn TransactionStore>,
        ledger: Arc<dyn OfflineLedger>,
        fx: Arc<FxConverter>,
        registry: Arc<RailRegistry>,
        connectivity: tokio::sync::watch::Receiver<bool>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateways: gateways.into_iter().map(|g| (g.rail(), g)).collect(),
            store,
            ledger,
            fx,
            registry,
            connectivity,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancels: Mutex::new(HashMap::new()),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    fn claim(&self, key: &str) -> Result<ClaimGuard> {
        let mut set = self.in_flight.lock().unwrap();
        if !set.insert(key.to_string()) {
            return Err(AppError::SettlementInFlight(key.to_string()));
        }
        Ok(ClaimGuard {
            set: Arc::clone(&self.in_flight),
            key: key.to_string(),
        })
    }

    fn snapshot(intent: &PaymentIntent, quote: &QuotedRate) -> SettlementSnapshot {
        let donation = if intent.round_up {
            FxConverter::round_up(intent.amount)
        } else {
            Decimal::ZERO
        };
        SettlementSnapshot {
            local_amount: FxConverter::convert(intent.amount, quote),
            donation,
            total_charged: intent.amount + donation,
            rate: quote.rate,
            pair: quote.pair.clone(),
        }
    }

    /// Settle a confirmed intent. Exactly-once across retries, replays and
    /// concurrent submits: an existing Completed or Queued record for the
    /// key short-circuits to its current status, and only a Failed record is
    /// superseded by a fresh attempt.
    pub async fn submit(&self, intent: PaymentIntent) -> Result<Transaction> {
        if intent.amount <= Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "amount must be greater than zero".into(),
            ));
        }
        let rail = self
            .registry
            .get(intent.rail)
            .ok_or_else(|| AppError::UnknownRail(intent.rail.to_string()))?
            .clone();

        if let Some(existing) = self.store.find(&intent.idempotency_key).await? {
            if existing.status != TxStatus::Failed {
                info!(
                    "Idempotent replay for key {} -> {}",
                    intent.idempotency_key, existing.status
                );
                return Ok(existing);
            }
        } else if self.ledger.contains(&intent.idempotency_key).await? {
            // Queue entry whose Queued record is still being written.
            return Err(AppError::SettlementInFlight(intent.idempotency_key.clone()));
        }

        let _claim = self.claim(&intent.idempotency_key)?;

        // Re-check under the claim: a concurrent submit may have settled
        // between the lookup and the claim.
        if let Some(existing) = self.store.find(&intent.idempotency_key).await? {
            if existing.status != TxStatus::Failed {
                return Ok(existing);
            }
        }

        let quote = self.fx.quote(&intent.pair).await?;
        let snapshot = Self::snapshot(&intent, &quote);

        if !self.is_online() && rail.capabilities.requires_online {
            return self.enqueue_offline(intent, snapshot).await;
        }

        self.settle_online(intent, snapshot).await
    }

    async fn enqueue_offline(
        &self,
        intent: PaymentIntent,
        snapshot: SettlementSnapshot,
    ) -> Result<Transaction> {
        self.ledger.enqueue(intent.clone(), snapshot.clone()).await?;
        let tx = Transaction::queued(&intent, &snapshot, None, true);
        info!(
            "Offline: queued payment for key {} ({} {})",
            intent.idempotency_key, snapshot.pair.base, snapshot.total_charged
        );
        self.store.record(tx).await
    }

    async fn settle_online(
        &self,
        intent: PaymentIntent,
        snapshot: SettlementSnapshot,
    ) -> Result<Transaction> {
        let gateway = self
            .gateways
            .get(&intent.rail)
            .ok_or_else(|| AppError::UnknownRail(intent.rail.to_string()))?
            .clone();

        let cancel = self.register_cancel(&intent.idempotency_key);

        let pending = match self.initiate_with_retry(gateway.as_ref(), &intent, &snapshot).await {
            Ok(pending) => pending,
            Err(e) => {
                self.clear_cancel(&intent.idempotency_key);
                let tx = Transaction::failed(&intent, &snapshot, Self::failure_from_gateway(&e));
                return self.store.record(tx).await;
            }
        };

        let outcome = self.poll_until_terminal(gateway.as_ref(), &pending, &cancel).await;
        self.clear_cancel(&intent.idempotency_key);

        let tx = match outcome {
            PollOutcome::Success => {
                Transaction::completed(&intent, &snapshot, pending.reference.clone())
            }
            PollOutcome::Failed(reason) => Transaction::failed(
                &intent,
                &snapshot,
                FailureInfo::new(FailureKind::Declined, reason),
            ),
            PollOutcome::Timeout => Transaction::failed(
                &intent,
                &snapshot,
                FailureInfo::new(
                    FailureKind::Timeout,
                    format!(
                        "no confirmation within {}s",
                        self.config.settle_timeout.as_secs()
                    ),
                ),
            ),
            // The provider charge may still land; park the record as Queued
            // and reconcile from a later status check.
            PollOutcome::Cancelled => {
                info!("Cancelled while settling key {}", intent.idempotency_key);
                Transaction::queued(&intent, &snapshot, Some(pending.reference.clone()), false)
            }
        };
        self.store.record(tx).await
    }

    async fn initiate_with_retry(
        &self,
        gateway: &dyn PaymentGateway,
        intent: &PaymentIntent,
        snapshot: &SettlementSnapshot,
    ) -> std::result::Result<PendingSettlement, GatewayError> {
        match gateway.initiate(intent, snapshot).await {
            Ok(pending) => Ok(pending),
            Err(e) if e.is_retryable() => {
                warn!(
                    "Gateway unavailable for key {}, retrying once: {}",
                    intent.idempotency_key, e
                );
                tokio::time::sleep(self.config.retry_backoff).await;
                gateway.initiate(intent, snapshot).await
            }
            Err(e) => Err(e),
        }
    }

    async fn poll_until_terminal(
        &self,
        gateway: &dyn PaymentGateway,
        pending: &PendingSettlement,
        cancel: &AtomicBool,
    ) -> PollOutcome {
        let deadline = Instant::now() + self.config.settle_timeout;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return PollOutcome::Cancelled;
            }
            match gateway.poll(&pending.reference).await {
                Ok(SettlementStatus::Success) => return PollOutcome::Success,
                Ok(SettlementStatus::Failed(reason)) => return PollOutcome::Failed(reason),
                Ok(SettlementStatus::Pending) => {}
                // Transient poll errors keep the cadence; the deadline bounds
                // a provider that never recovers.
                Err(e) => warn!("Poll error for {}: {}", pending.reference, e),
            }
            if Instant::now() >= deadline {
                return PollOutcome::Timeout;
            }
            tokio::time::sleep(pending.poll_interval).await;
        }
    }

    fn failure_from_gateway(e: &GatewayError) -> FailureInfo {
        match e {
            GatewayError::Unavailable(m) => FailureInfo::new(FailureKind::GatewayUnavailable, m.clone()),
            GatewayError::Declined(m) => FailureInfo::new(FailureKind::Declined, m.clone()),
            GatewayError::InvalidRequest(m) => FailureInfo::new(FailureKind::InvalidRequest, m.clone()),
        }
    }

    fn register_cancel(&self, key: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancels
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::clone(&flag));
        flag
    }

    fn clear_cancel(&self, key: &str) {
        self.cancels.lock().unwrap().remove(key);
    }

    /// Stop foreground polling for an in-flight settlement. The provider
    /// charge is not assumed reversed; the record reconciles later.
    pub fn cancel(&self, key: &str) -> bool {
        if let Some(flag) = self.cancels.lock().unwrap().get(key) {
            flag.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Current record for a key, opportunistically reconciling a Queued
    /// settlement that already has a provider reference.
    pub async fn current_status(&self, key: &str) -> Result<Transaction> {
        let tx = self
            .store
            .find(key)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(key.to_string()))?;

        if tx.status != TxStatus::Queued || !self.is_online() {
            return Ok(tx);
        }
        let (Some(reference), Some(gateway)) =
            (tx.provider_reference.clone(), self.gateways.get(&tx.rail))
        else {
            return Ok(tx);
        };

        match gateway.poll(&reference).await {
            Ok(SettlementStatus::Success) => {
                self.store
                    .resolve(
                        tx.id,
                        SettlementOutcome::Completed {
                            provider_reference: Some(reference),
                        },
                    )
                    .await
            }
            Ok(SettlementStatus::Failed(reason)) => {
                self.store
                    .resolve(
                        tx.id,
                        SettlementOutcome::Failed(FailureInfo::new(FailureKind::Declined, reason)),
                    )
                    .await
            }
            Ok(SettlementStatus::Pending) | Err(_) => Ok(tx),
        }
    }

    /// User-initiated retry after a Failed settlement. Reuses the same
    /// idempotency key, so at most one charge can ever land.
    pub async fn retry(&self, key: &str) -> Result<Transaction> {
        let existing = self
            .store
            .find(key)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(key.to_string()))?;
        if existing.status != TxStatus::Failed {
            return Ok(existing);
        }

        let intent = PaymentIntent {
            idempotency_key: existing.idempotency_key.clone(),
            merchant_id: existing.merchant_id.clone(),
            amount: existing.home_amount - existing.donation,
            pair: CurrencyPair::new(existing.home_currency.clone(), existing.local_currency.clone()),
            rail: existing.rail,
            round_up: existing.donation > Decimal::ZERO,
            payer_phone: existing.payer_phone.clone(),
            created_at: Utc::now(),
        };
        self.submit(intent).await
    }

    /// Provider callback path: resolve the Queued record tracking this
    /// reference, if any. Records that already resolved are left untouched.
    pub async fn apply_provider_result(
        &self,
        reference: &str,
        success: bool,
        description: &str,
    ) -> Result<Option<Transaction>> {
        let Some(tx) = self.store.find_by_reference(reference).await? else {
            return Ok(None);
        };
        if tx.status != TxStatus::Queued {
            return Ok(Some(tx));
        }
        let outcome = if success {
            SettlementOutcome::Completed {
                provider_reference: Some(reference.to_string()),
            }
        } else {
            SettlementOutcome::Failed(FailureInfo::new(
                FailureKind::Declined,
                description.to_string(),
            ))
        };
        Ok(Some(self.store.resolve(tx.id, outcome).await?))
    }

    /// Replay the offline queue, oldest first. Single drain in flight;
    /// per-entry outcomes are independent, and entries whose provider is
    /// unreachable stay queued for the next reconnect.
    pub async fn drain(&self) -> Result<DrainReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        };

        let mut report = DrainReport::default();
        let batch = self.ledger.oldest_first(DRAIN_BATCH).await?;
        if batch.is_empty() {
            return Ok(report);
        }
        info!("Draining {} offline payment(s)", batch.len());

        for entry in batch {
            match self.drain_entry(&entry).await {
                Ok(DrainOutcome::Settled(TxStatus::Completed)) => report.completed += 1,
                Ok(DrainOutcome::Settled(_)) => report.failed += 1,
                Ok(DrainOutcome::Deferred) => report.deferred += 1,
                Err(e) => {
                    warn!(
                        "Drain error for key {}: {}",
                        entry.intent.idempotency_key, e
                    );
                    report.deferred += 1;
                }
            }
        }

        info!(
            "Drain finished: {} completed, {} failed, {} deferred",
            report.completed, report.failed, report.deferred
        );
        Ok(report)
    }

    async fn drain_entry(&self, entry: &OfflineQueueEntry) -> Result<DrainOutcome> {
        let key = &entry.intent.idempotency_key;
        let _claim = self.claim(key)?;

        let queued = match self.store.find(key).await? {
            Some(tx) if tx.status == TxStatus::Queued => tx,
            // Already resolved elsewhere (callback or status check); the
            // entry is spent.
            Some(tx) => {
                self.ledger.remove(entry.id).await?;
                return Ok(DrainOutcome::Settled(tx.status));
            }
            None => {
                let tx = Transaction::queued(&entry.intent, &entry.snapshot, None, true);
                self.store.record(tx).await?
            }
        };

        let gateway = self
            .gateways
            .get(&entry.intent.rail)
            .ok_or_else(|| AppError::UnknownRail(entry.intent.rail.to_string()))?
            .clone();

        let pending = match self
            .initiate_with_retry(gateway.as_ref(), &entry.intent, &entry.snapshot)
            .await
        {
            Ok(pending) => pending,
            Err(GatewayError::Unavailable(msg)) => {
                warn!("Deferring queued key {}: {}", key, msg);
                return Ok(DrainOutcome::Deferred);
            }
            Err(e) => {
                self.store
                    .resolve(
                        queued.id,
                        SettlementOutcome::Failed(Self::failure_from_gateway(&e)),
                    )
                    .await?;
                self.ledger.remove(entry.id).await?;
                return Ok(DrainOutcome::Settled(TxStatus::Failed));
            }
        };

        let never_cancelled = AtomicBool::new(false);
        let outcome = self
            .poll_until_terminal(gateway.as_ref(), &pending, &never_cancelled)
            .await;

        let status = match outcome {
            PollOutcome::Success => {
                self.store
                    .resolve(
                        queued.id,
                        SettlementOutcome::Completed {
                            provider_reference: Some(pending.reference.clone()),
                        },
                    )
                    .await?;
                TxStatus::Completed
            }
            PollOutcome::Failed(reason) => {
                self.store
                    .resolve(
                        queued.id,
                        SettlementOutcome::Failed(FailureInfo::new(FailureKind::Declined, reason)),
                    )
                    .await?;
                TxStatus::Failed
            }
            PollOutcome::Timeout => {
                self.store
                    .resolve(
                        queued.id,
                        SettlementOutcome::Failed(FailureInfo::new(
                            FailureKind::Timeout,
                            format!(
                                "no confirmation within {}s",
                                self.config.settle_timeout.as_secs()
                            ),
                        )),
                    )
                    .await?;
                TxStatus::Failed
            }
            PollOutcome::Cancelled => unreachable!("drain settlements are never cancelled"),
        };

        self.ledger.remove(entry.id).await?;
        Ok(DrainOutcome::Settled(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::RecommendedAction;
    use crate::services::connectivity::ConnectivitySignal;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    // ------------------------------------------------------------------
    // In-memory doubles implementing the same traits as the Mongo-backed
    // store and ledger.
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MemStore {
        txs: Mutex<Vec<Transaction>>,
    }

    #[async_trait]
    impl TransactionStore for MemStore {
        async fn record(&self, tx: Transaction) -> Result<Transaction> {
            let mut txs = self.txs.lock().unwrap();
            if let Some(pos) = txs
                .iter()
                .position(|t| t.idempotency_key == tx.idempotency_key)
            {
                if txs[pos].status != TxStatus::Failed {
                    return Err(AppError::InvalidTransition(format!(
                        "key {} already recorded as {}",
                        tx.idempotency_key, txs[pos].status
                    )));
                }
                txs[pos] = tx.clone();
            } else {
                txs.push(tx.clone());
            }
            Ok(tx)
        }

        async fn find(&self, idempotency_key: &str) -> Result<Option<Transaction>> {
            Ok(self
                .txs
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.idempotency_key == idempotency_key)
                .cloned())
        }

        async fn find_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
            Ok(self
                .txs
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.provider_reference.as_deref() == Some(reference))
                .cloned())
        }

        async fn resolve(&self, id: uuid::Uuid, outcome: SettlementOutcome) -> Result<Transaction> {
            let mut txs = self.txs.lock().unwrap();
            let tx = txs
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))?;
            let target = outcome.status();
            if !tx.status.can_transition_to(target) {
                return Err(AppError::InvalidTransition(format!(
                    "{} -> {} for transaction {}",
                    tx.status, target, id
                )));
            }
            tx.status = target;
            tx.settled_at = Some(Utc::now());
            match outcome {
                SettlementOutcome::Completed { provider_reference } => {
                    if provider_reference.is_some() {
                        tx.provider_reference = provider_reference;
                    }
                    tx.failure = None;
                }
                SettlementOutcome::Failed(failure) => tx.failure = Some(failure),
            }
            Ok(tx.clone())
        }

        async fn list_recent(&self, limit: i64) -> Result<Vec<Transaction>> {
            let mut txs = self.txs.lock().unwrap().clone();
            txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            txs.truncate(limit as usize);
            Ok(txs)
        }
    }

    #[derive(Default)]
    struct MemLedger {
        entries: Mutex<Vec<OfflineQueueEntry>>,
        fail_enqueue: AtomicBool,
    }

    #[async_trait]
    impl OfflineLedger for MemLedger {
        async fn enqueue(
            &self,
            intent: PaymentIntent,
            snapshot: SettlementSnapshot,
        ) -> Result<OfflineQueueEntry> {
            if self.fail_enqueue.load(Ordering::Relaxed) {
                return Err(AppError::StorageFailure("disk full".into()));
            }
            let entry = OfflineQueueEntry::new(intent, snapshot);
            self.entries.lock().unwrap().push(entry.clone());
            Ok(entry)
        }

        async fn contains(&self, idempotency_key: &str) -> Result<bool> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.intent.idempotency_key == idempotency_key))
        }

        async fn oldest_first(&self, limit: i64) -> Result<Vec<OfflineQueueEntry>> {
            let mut entries = self.entries.lock().unwrap().clone();
            entries.sort_by_key(|e| e.enqueued_at);
            entries.truncate(limit as usize);
            Ok(entries)
        }

        async fn remove(&self, id: uuid::Uuid) -> Result<()> {
            self.entries.lock().unwrap().retain(|e| e.id != id);
            Ok(())
        }
    }

    /// Scripted gateway: per-key initiate errors, per-reference poll
    /// behavior, and a record of initiate order for FIFO assertions.
    #[derive(Clone, Debug)]
    enum MockPoll {
        Success,
        Pending,
        Fail(String),
    }

    #[derive(Default)]
    struct MockGateway {
        initiate_count: AtomicUsize,
        order: Mutex<Vec<String>>,
        initiate_errs: Mutex<HashMap<String, VecDeque<GatewayError>>>,
        poll_behavior: Mutex<HashMap<String, MockPoll>>,
    }

    impl MockGateway {
        fn script_initiate_errs(&self, key: &str, errs: Vec<GatewayError>) {
            self.initiate_errs
                .lock()
                .unwrap()
                .insert(key.to_string(), errs.into());
        }

        fn script_poll(&self, reference: &str, behavior: MockPoll) {
            self.poll_behavior
                .lock()
                .unwrap()
                .insert(reference.to_string(), behavior);
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        fn rail(&self) -> RailId {
            RailId::Mpesa
        }

        async fn initiate(
            &self,
            intent: &PaymentIntent,
            _snapshot: &SettlementSnapshot,
        ) -> std::result::Result<PendingSettlement, GatewayError> {
            self.initiate_count.fetch_add(1, Ordering::Relaxed);
            self.order
                .lock()
                .unwrap()
                .push(intent.idempotency_key.clone());
            if let Some(queue) = self
                .initiate_errs
                .lock()
                .unwrap()
                .get_mut(&intent.idempotency_key)
            {
                if let Some(err) = queue.pop_front() {
                    return Err(err);
                }
            }
            Ok(PendingSettlement {
                reference: intent.idempotency_key.clone(),
                poll_interval: Duration::from_millis(10),
            })
        }

        async fn poll(
            &self,
            reference: &str,
        ) -> std::result::Result<SettlementStatus, GatewayError> {
            let behavior = self
                .poll_behavior
                .lock()
                .unwrap()
                .get(reference)
                .cloned()
                .unwrap_or(MockPoll::Success);
            Ok(match behavior {
                MockPoll::Success => SettlementStatus::Success,
                MockPoll::Pending => SettlementStatus::Pending,
                MockPoll::Fail(reason) => SettlementStatus::Failed(reason),
            })
        }
    }

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    struct Harness {
        orchestrator: PaymentOrchestrator,
        gateway: Arc<MockGateway>,
        store: Arc<MemStore>,
        ledger: Arc<MemLedger>,
        signal: Arc<ConnectivitySignal>,
    }

    fn harness(online: bool) -> Harness {
        let gateway = Arc::new(MockGateway::default());
        let store = Arc::new(MemStore::default());
        let ledger = Arc::new(MemLedger::default());
        let signal = Arc::new(ConnectivitySignal::new(online));

        let fx = Arc::new(FxConverter::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9".into(),
            300,
        ));
        let now = Utc::now();
        fx.prime(QuotedRate {
            pair: CurrencyPair::new("USD", "KES"),
            rate: dec!(129.50),
            quoted_at: now,
            expires_at: now + chrono::Duration::hours(1),
        });

        let orchestrator = PaymentOrchestrator::new(
            vec![gateway.clone() as Arc<dyn PaymentGateway>],
            store.clone() as Arc<dyn TransactionStore>,
            ledger.clone() as Arc<dyn OfflineLedger>,
            fx,
            Arc::new(RailRegistry::with_default_rails()),
            signal.subscribe(),
            OrchestratorConfig::default(),
        );

        Harness {
            orchestrator,
            gateway,
            store,
            ledger,
            signal,
        }
    }

    fn intent(key: &str, amount: Decimal, round_up: bool) -> PaymentIntent {
        PaymentIntent {
            idempotency_key: key.to_string(),
            merchant_id: "m-123".to_string(),
            amount,
            pair: CurrencyPair::new("USD", "KES"),
            rail: RailId::Mpesa,
            round_up,
            payer_phone: Some("254712345678".to_string()),
            created_at: Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn completed_payment_carries_settlement_amounts() {
        let h = harness(true);

        let tx = h
            .orchestrator
            .submit(intent("k-1", dec!(12.30), true))
            .await
            .unwrap();

        assert_eq!(tx.status, TxStatus::Completed);
        assert_eq!(tx.home_amount, dec!(13.00));
        assert_eq!(tx.donation, dec!(0.70));
        assert_eq!(tx.local_amount, dec!(1592.85));
        assert!(tx.provider_reference.is_some());
        assert!(!tx.offline_queued);
    }

    #[tokio::test(start_paused = true)]
    async fn integral_amount_has_no_donation_even_with_round_up() {
        let h = harness(true);

        let tx = h
            .orchestrator
            .submit(intent("k-2", dec!(45.00), true))
            .await
            .unwrap();

        assert_eq!(tx.home_amount, dec!(45.00));
        assert_eq!(tx.donation, Decimal::ZERO);
        assert_eq!(tx.local_amount, dec!(5827.50));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_submission_queues_without_touching_the_gateway() {
        let h = harness(false);

        let tx = h
            .orchestrator
            .submit(intent("k-3", dec!(10.00), false))
            .await
            .unwrap();

        assert_eq!(tx.status, TxStatus::Queued);
        assert!(tx.offline_queued);
        assert_eq!(h.gateway.initiate_count.load(Ordering::Relaxed), 0);
        assert!(h.ledger.contains("k-3").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_never_settles_twice() {
        let h = harness(true);
        let first = h
            .orchestrator
            .submit(intent("k-4", dec!(5.00), false))
            .await
            .unwrap();

        let second = h
            .orchestrator
            .submit(intent("k-4", dec!(5.00), false))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, TxStatus::Completed);
        assert_eq!(h.gateway.initiate_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_key_short_circuits_to_the_queued_record() {
        let h = harness(false);
        let queued = h
            .orchestrator
            .submit(intent("k-5", dec!(8.00), false))
            .await
            .unwrap();

        h.signal.set_online(true);
        let replay = h
            .orchestrator
            .submit(intent("k-5", dec!(8.00), false))
            .await
            .unwrap();

        assert_eq!(replay.id, queued.id);
        assert_eq!(replay.status, TxStatus::Queued);
        assert_eq!(h.gateway.initiate_count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_outage_is_retried_exactly_once() {
        let h = harness(true);
        h.gateway.script_initiate_errs(
            "k-6",
            vec![GatewayError::Unavailable("connection reset".into())],
        );

        let tx = h
            .orchestrator
            .submit(intent("k-6", dec!(5.00), false))
            .await
            .unwrap();

        assert_eq!(tx.status, TxStatus::Completed);
        assert_eq!(h.gateway.initiate_count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_outage_fails_after_the_single_retry() {
        let h = harness(true);
        h.gateway.script_initiate_errs(
            "k-7",
            vec![
                GatewayError::Unavailable("down".into()),
                GatewayError::Unavailable("still down".into()),
            ],
        );

        let tx = h
            .orchestrator
            .submit(intent("k-7", dec!(5.00), false))
            .await
            .unwrap();

        assert_eq!(tx.status, TxStatus::Failed);
        let failure = tx.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::GatewayUnavailable);
        assert_eq!(failure.action, RecommendedAction::Retry);
        assert_eq!(h.gateway.initiate_count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_is_terminal_and_never_auto_retried() {
        let h = harness(true);
        h.gateway
            .script_initiate_errs("k-8", vec![GatewayError::Declined("insufficient funds".into())]);

        let tx = h
            .orchestrator
            .submit(intent("k-8", dec!(5.00), false))
            .await
            .unwrap();

        assert_eq!(tx.status, TxStatus::Failed);
        let failure = tx.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Declined);
        assert_eq!(failure.action, RecommendedAction::ContactSupport);
        assert_eq!(h.gateway.initiate_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_is_superseded_by_retry_with_same_key() {
        let h = harness(true);
        h.gateway
            .script_initiate_errs("k-9", vec![GatewayError::Declined("card expired".into())]);

        let failed = h
            .orchestrator
            .submit(intent("k-9", dec!(5.00), false))
            .await
            .unwrap();
        assert_eq!(failed.status, TxStatus::Failed);

        let retried = h.orchestrator.retry("k-9").await.unwrap();
        assert_eq!(retried.status, TxStatus::Completed);

        // One record per key: the failed attempt was superseded, not joined.
        let all = h.store.list_recent(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TxStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_poll_times_out_instead_of_hanging() {
        let h = harness(true);
        h.gateway.script_poll("k-10", MockPoll::Pending);

        let tx = h
            .orchestrator
            .submit(intent("k-10", dec!(5.00), false))
            .await
            .unwrap();

        assert_eq!(tx.status, TxStatus::Failed);
        let failure = tx.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.action, RecommendedAction::Retry);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_replays_fifo_and_isolates_failures() {
        let h = harness(false);
        for key in ["k-a", "k-b", "k-c"] {
            h.orchestrator
                .submit(intent(key, dec!(3.00), false))
                .await
                .unwrap();
        }
        h.gateway.script_poll("k-b", MockPoll::Fail("rejected by payer".into()));

        h.signal.set_online(true);
        let report = h.orchestrator.drain().await.unwrap();

        assert_eq!(*h.gateway.order.lock().unwrap(), vec!["k-a", "k-b", "k-c"]);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(h.store.find("k-a").await.unwrap().unwrap().status, TxStatus::Completed);
        assert_eq!(h.store.find("k-b").await.unwrap().unwrap().status, TxStatus::Failed);
        assert_eq!(h.store.find("k-c").await.unwrap().unwrap().status, TxStatus::Completed);
        assert!(h.ledger.oldest_first(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_provider_defers_entries_to_the_next_drain() {
        let h = harness(false);
        h.orchestrator
            .submit(intent("k-d", dec!(3.00), false))
            .await
            .unwrap();
        h.gateway.script_initiate_errs(
            "k-d",
            vec![
                GatewayError::Unavailable("down".into()),
                GatewayError::Unavailable("down".into()),
            ],
        );

        h.signal.set_online(true);
        let report = h.orchestrator.drain().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(h.store.find("k-d").await.unwrap().unwrap().status, TxStatus::Queued);
        assert_eq!(h.ledger.oldest_first(10).await.unwrap().len(), 1);

        // Provider back: the deferred entry settles on the next drain.
        let report = h.orchestrator.drain().await.unwrap();
        assert_eq!(report.completed, 1);
        assert!(h.ledger.oldest_first(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_drain_runs_at_a_time() {
        let h = harness(true);
        let _held = h.orchestrator.drain_lock.try_lock().unwrap();

        let report = h.orchestrator.drain().await.unwrap();
        assert!(report.skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_parks_the_settlement_for_reconciliation() {
        let h = harness(true);
        h.gateway.script_poll("k-11", MockPoll::Pending);

        let orchestrator = Arc::new(h.orchestrator);
        let submitting = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator.submit(intent("k-11", dec!(5.00), false)).await
            })
        };

        // Let the settlement reach its poll loop, then cancel it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(orchestrator.cancel("k-11"));

        let tx = submitting.await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Queued);
        assert!(!tx.offline_queued);
        assert_eq!(tx.provider_reference.as_deref(), Some("k-11"));

        // The charge landed provider-side; a later status check reconciles.
        h.gateway.script_poll("k-11", MockPoll::Success);
        let reconciled = orchestrator.current_status("k-11").await.unwrap();
        assert_eq!(reconciled.status, TxStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submit_for_a_claimed_key_is_rejected() {
        let h = harness(true);
        let _claim = h.orchestrator.claim("k-12").unwrap();

        let err = h
            .orchestrator
            .submit(intent("k-12", dec!(5.00), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SettlementInFlight(_)));
        assert_eq!(h.gateway.initiate_count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_amount_is_rejected_before_any_side_effect() {
        let h = harness(true);

        let err = h
            .orchestrator
            .submit(intent("k-13", Decimal::ZERO, false))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert!(h.store.find("k-13").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn full_offline_queue_fails_only_that_enqueue() {
        let h = harness(false);
        h.ledger.fail_enqueue.store(true, Ordering::Relaxed);

        let err = h
            .orchestrator
            .submit(intent("k-14", dec!(5.00), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StorageFailure(_)));
        assert!(h.store.find("k-14").await.unwrap().is_none());

        // Storage recovered: the same key goes through untouched.
        h.ledger.fail_enqueue.store(false, Ordering::Relaxed);
        let tx = h
            .orchestrator
            .submit(intent("k-14", dec!(5.00), false))
            .await
            .unwrap();
        assert_eq!(tx.status, TxStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_rate_surfaces_rate_unavailable() {
        let h = harness(true);
        let mut unquoted = intent("k-15", dec!(5.00), false);
        unquoted.pair = CurrencyPair::new("USD", "TZS");

        let err = h.orchestrator.submit(unquoted).await.unwrap_err();
        assert!(matches!(err, AppError::RateUnavailable(_)));
        assert!(h.store.find("k-15").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn provider_callback_resolves_a_parked_settlement() {
        let h = harness(true);
        h.gateway.script_poll("k-16", MockPoll::Pending);

        let orchestrator = Arc::new(h.orchestrator);
        let submitting = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator.submit(intent("k-16", dec!(5.00), false)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator.cancel("k-16");
        submitting.await.unwrap().unwrap();

        let resolved = orchestrator
            .apply_provider_result("k-16", true, "processed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.status, TxStatus::Completed);

        // A second callback for the same reference is a no-op.
        let again = orchestrator
            .apply_provider_result("k-16", false, "late duplicate")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.status, TxStatus::Completed);
    }
}

// services/transaction_store.rs
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::transaction::{FailureInfo, Transaction, TxStatus};

/// Resolution applied to a Queued transaction by reconciliation.
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Completed { provider_reference: Option<String> },
    Failed(FailureInfo),
}

impl SettlementOutcome {
    pub fn status(&self) -> TxStatus {
        match self {
            SettlementOutcome::Completed { .. } => TxStatus::Completed,
            SettlementOutcome::Failed(_) => TxStatus::Failed,
        }
    }
}

/// Append-only transaction log keyed by idempotency key. The only in-place
/// update is resolving Queued; a Failed record may be superseded by a fresh
/// attempt under the same key, and Completed is immutable.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn record(&self, tx: Transaction) -> Result<Transaction>;

    async fn find(&self, idempotency_key: &str) -> Result<Option<Transaction>>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transaction>>;

    /// Queued -> {Completed, Failed} only; anything else is InvalidTransition.
    async fn resolve(&self, id: Uuid, outcome: SettlementOutcome) -> Result<Transaction>;

    async fn list_recent(&self, limit: i64) -> Result<Vec<Transaction>>;
}

pub struct MongoTransactionStore {
    collection: Collection<Transaction>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("transactions"),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "idempotency_key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index).await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn record(&self, tx: Transaction) -> Result<Transaction> {
        let filter = doc! { "idempotency_key": &tx.idempotency_key };

        match self.collection.find_one(filter.clone()).await? {
            None => {
                self.collection.insert_one(&tx).await?;
                info!("Recorded transaction {} [{}]", tx.id, tx.status);
                Ok(tx)
            }
            // A failed attempt is superseded by the fresh one; any other
            // duplicate is a contract violation the orchestrator should have
            // caught.
            Some(existing) if existing.status == TxStatus::Failed => {
                self.collection.replace_one(filter, &tx).await?;
                info!("Superseded failed transaction for key {}", tx.idempotency_key);
                Ok(tx)
            }
            Some(existing) => Err(AppError::InvalidTransition(format!(
                "key {} already recorded as {}",
                existing.idempotency_key, existing.status
            ))),
        }
    }

    async fn find(&self, idempotency_key: &str) -> Result<Option<Transaction>> {
        Ok(self
            .collection
            .find_one(doc! { "idempotency_key": idempotency_key })
            .await?)
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        Ok(self
            .collection
            .find_one(doc! { "provider_reference": reference })
            .await?)
    }

    async fn resolve(&self, id: Uuid, outcome: SettlementOutcome) -> Result<Transaction> {
        let filter = doc! { "id": id.to_string() };
        let current = self
            .collection
            .find_one(filter.clone())
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))?;

        let target = outcome.status();
        if !current.status.can_transition_to(target) {
            return Err(AppError::InvalidTransition(format!(
                "{} -> {} for transaction {}",
                current.status, target, id
            )));
        }

        let mut updated = current;
        updated.status = target;
        updated.settled_at = Some(Utc::now());
        match outcome {
            SettlementOutcome::Completed { provider_reference } => {
                if provider_reference.is_some() {
                    updated.provider_reference = provider_reference;
                }
                updated.failure = None;
            }
            SettlementOutcome::Failed(failure) => {
                updated.failure = Some(failure);
            }
        }

        self.collection.replace_one(filter, &updated).await?;
        info!("Resolved transaction {} -> {}", id, updated.status);
        Ok(updated)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Transaction>> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

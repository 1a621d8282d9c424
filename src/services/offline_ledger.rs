// services/offline_ledger.rs
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::intent::{PaymentIntent, SettlementSnapshot};
use crate::models::offline_entry::OfflineQueueEntry;

/// Durable FIFO queue of payments captured while disconnected. Entries are
/// drained oldest-first on reconnect and removed once their outcome is
/// recorded; one entry's failure never blocks the rest.
#[async_trait]
pub trait OfflineLedger: Send + Sync {
    async fn enqueue(
        &self,
        intent: PaymentIntent,
        snapshot: SettlementSnapshot,
    ) -> Result<OfflineQueueEntry>;

    async fn contains(&self, idempotency_key: &str) -> Result<bool>;

    /// Oldest entries first. Restartable: callers may fetch, process and
    /// remove in batches until empty.
    async fn oldest_first(&self, limit: i64) -> Result<Vec<OfflineQueueEntry>>;

    async fn remove(&self, id: Uuid) -> Result<()>;
}

pub struct MongoOfflineLedger {
    collection: Collection<OfflineQueueEntry>,
}

impl MongoOfflineLedger {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("offline_queue"),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique_key = IndexModel::builder()
            .keys(doc! { "intent.idempotency_key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let fifo = IndexModel::builder().keys(doc! { "enqueued_at": 1 }).build();
        self.collection.create_index(unique_key).await?;
        self.collection.create_index(fifo).await?;
        Ok(())
    }
}

#[async_trait]
impl OfflineLedger for MongoOfflineLedger {
    async fn enqueue(
        &self,
        intent: PaymentIntent,
        snapshot: SettlementSnapshot,
    ) -> Result<OfflineQueueEntry> {
        let entry = OfflineQueueEntry::new(intent, snapshot);
        self.collection
            .insert_one(&entry)
            .await
            .map_err(|e| AppError::StorageFailure(e.to_string()))?;
        info!(
            "Queued offline payment {} for key {}",
            entry.id, entry.intent.idempotency_key
        );
        Ok(entry)
    }

    async fn contains(&self, idempotency_key: &str) -> Result<bool> {
        let found = self
            .collection
            .find_one(doc! { "intent.idempotency_key": idempotency_key })
            .await?;
        Ok(found.is_some())
    }

    async fn oldest_first(&self, limit: i64) -> Result<Vec<OfflineQueueEntry>> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "enqueued_at": 1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        self.collection
            .delete_one(doc! { "id": id.to_string() })
            .await?;
        Ok(())
    }
}

// models/offline_entry.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::intent::{PaymentIntent, SettlementSnapshot};

/// A payment captured while disconnected: the intent plus the settlement
/// snapshot computed at capture time. Drained FIFO on reconnect and consumed
/// exactly once, producing a Queued -> {Completed, Failed} resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineQueueEntry {
    pub id: Uuid,
    pub intent: PaymentIntent,
    pub snapshot: SettlementSnapshot,
    pub enqueued_at: DateTime<Utc>,
}

impl OfflineQueueEntry {
    pub fn new(intent: PaymentIntent, snapshot: SettlementSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent,
            snapshot,
            enqueued_at: Utc::now(),
        }
    }
}

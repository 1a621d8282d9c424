use mongodb::Database;
use std::sync::Arc;

use crate::services::connectivity::ConnectivitySignal;
use crate::services::fx_service::FxConverter;
use crate::services::orchestrator::PaymentOrchestrator;
use crate::services::rail_registry::RailRegistry;
use crate::services::transaction_store::TransactionStore;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub store: Arc<dyn TransactionStore>,
    pub fx: Arc<FxConverter>,
    pub rails: Arc<RailRegistry>,
    pub connectivity: Arc<ConnectivitySignal>,
}

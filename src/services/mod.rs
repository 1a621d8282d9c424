pub mod connectivity;
pub mod fx_service;
pub mod gateway;
pub mod offline_ledger;
pub mod orchestrator;
pub mod rail_registry;
pub mod transaction_store;

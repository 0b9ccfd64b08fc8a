//! Per-tenant encrypted append-only result storage.

pub mod data_store;
pub mod models;

pub use data_store::{StoreError, UserDataStore};
pub use models::{AnalysisInput, HistoryEntry, ResultEntry, TenantExport, TenantState, TenantStatistics};

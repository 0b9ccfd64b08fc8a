//! User Data Store
//! Mission: Atomic encrypted persistence of per-tenant result logs

use crate::crypto;
use crate::store::models::{
    AnalysisInput, ResultEntry, TenantExport, TenantState, TenantStatistics, ACTION_USER_DELETED,
};
use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const SCHEMA_VERSION: u32 = 1;

/// Typed failures raised by the data store.
#[derive(Debug, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    /// The tenant's sealed file failed decryption or schema validation;
    /// the tenant is failed-closed until an operator restores the file.
    Integrity,
    Io(String),
    Serialization(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "tenant data not found"),
            StoreError::Integrity => write!(f, "tenant data failed integrity check"),
            StoreError::Io(detail) => write!(f, "tenant persistence failed: {}", detail),
            StoreError::Serialization(detail) => write!(f, "tenant serialization failed: {}", detail),
        }
    }
}

impl std::error::Error for StoreError {}

/// Serialized shape of one sealed tenant file.
#[derive(serde::Serialize, serde::Deserialize)]
struct TenantStateFile {
    schema_version: u32,
    state: TenantState,
}

/// A tenant slot is either live state or a fail-closed marker left behind
/// by a decrypt/schema failure.
enum TenantSlot {
    Ready(TenantState),
    Failed,
}

/// Per-tenant append-only store. The registry mutex is short-lived; each
/// tenant's state sits behind its own RwLock (readers share, writers
/// exclude). Flushes serialize under the tenant lock but perform file I/O
/// outside any critical section except the final atomic rename.
pub struct UserDataStore {
    data_dir: PathBuf,
    key: Option<[u8; crypto::KEY_SIZE]>,
    tenants: Mutex<HashMap<String, Arc<RwLock<TenantSlot>>>>,
}

impl UserDataStore {
    pub fn new(data_dir: &Path, key: Option<[u8; crypto::KEY_SIZE]>) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            key,
            tenants: Mutex::new(HashMap::new()),
        })
    }

    fn tenant_path(&self, username: &str) -> PathBuf {
        self.data_dir.join(format!("{username}.enc"))
    }

    /// Fetch or rehydrate the slot for `username`. A sealed file that fails
    /// decryption or schema validation poisons the slot.
    fn slot(&self, username: &str) -> Arc<RwLock<TenantSlot>> {
        let mut tenants = self.tenants.lock();
        if let Some(slot) = tenants.get(username) {
            return Arc::clone(slot);
        }

        let slot = match self.load_from_disk(username) {
            Ok(Some(state)) => {
                debug!(username, results = state.results.len(), "Tenant rehydrated");
                TenantSlot::Ready(state)
            }
            Ok(None) => TenantSlot::Ready(TenantState::new(username)),
            Err(e) => {
                warn!(username, error = %e, "Tenant file rejected, failing closed");
                TenantSlot::Failed
            }
        };

        let slot = Arc::new(RwLock::new(slot));
        tenants.insert(username.to_string(), Arc::clone(&slot));
        slot
    }

    fn load_from_disk(&self, username: &str) -> Result<Option<TenantState>, StoreError> {
        let path = self.tenant_path(username);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read(&path).map_err(|e| StoreError::Io(e.to_string()))?;
        let envelope: crypto::SealedFile =
            serde_json::from_slice(&raw).map_err(|_| StoreError::Integrity)?;
        let body = crypto::open_envelope(self.key.as_ref(), &envelope)
            .map_err(|_| StoreError::Integrity)?;
        let file: TenantStateFile =
            serde_json::from_slice(&body).map_err(|_| StoreError::Integrity)?;
        if file.schema_version != SCHEMA_VERSION {
            return Err(StoreError::Integrity);
        }
        Ok(Some(file.state))
    }

    /// Append one result under the tenant's exclusive lock and schedule an
    /// asynchronous flush. Returns the stored entry with its timestamp.
    pub fn append(&self, username: &str, value: i64) -> Result<ResultEntry, StoreError> {
        let slot = self.slot(username);
        let entry = {
            let mut guard = slot.write();
            match &mut *guard {
                TenantSlot::Ready(state) => {
                    let entry = state.append_result(value);
                    debug_assert!(state.counters_consistent());
                    entry
                }
                TenantSlot::Failed => return Err(StoreError::Integrity),
            }
        };
        self.schedule_flush(username, slot);
        Ok(entry)
    }

    /// Tail of the result log, original order, length <= limit
    /// (None = everything).
    pub fn list_results(
        &self,
        username: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ResultEntry>, StoreError> {
        let slot = self.slot(username);
        let guard = slot.read();
        match &*guard {
            TenantSlot::Ready(state) => Ok(tail(&state.results, limit)),
            TenantSlot::Failed => Err(StoreError::Integrity),
        }
    }

    pub fn list_history(
        &self,
        username: &str,
        limit: Option<usize>,
    ) -> Result<Vec<crate::store::models::HistoryEntry>, StoreError> {
        let slot = self.slot(username);
        let guard = slot.read();
        match &*guard {
            TenantSlot::Ready(state) => Ok(tail(&state.history, limit)),
            TenantSlot::Failed => Err(StoreError::Integrity),
        }
    }

    pub fn statistics(&self, username: &str) -> Result<TenantStatistics, StoreError> {
        let slot = self.slot(username);
        let guard = slot.read();
        match &*guard {
            TenantSlot::Ready(state) => Ok(state.statistics()),
            TenantSlot::Failed => Err(StoreError::Integrity),
        }
    }

    /// Snapshot for the analytics engine: tail window of `count` results
    /// (clamped to the total; None = the configured default window).
    pub fn analysis_window(
        &self,
        username: &str,
        count: Option<usize>,
        default_window: usize,
    ) -> Result<AnalysisInput, StoreError> {
        let slot = self.slot(username);
        let guard = slot.read();
        match &*guard {
            TenantSlot::Ready(state) => {
                let total = state.results.len();
                let window_size = count.unwrap_or(default_window).min(total);
                Ok(AnalysisInput {
                    window: tail(&state.results, Some(window_size)),
                    total,
                    last_updated: state.last_updated,
                })
            }
            TenantSlot::Failed => Err(StoreError::Integrity),
        }
    }

    /// Drop results and counters, retain history, flush synchronously.
    pub fn clear(&self, username: &str) -> Result<(), StoreError> {
        let slot = self.slot(username);
        {
            let mut guard = slot.write();
            match &mut *guard {
                TenantSlot::Ready(state) => state.clear_results(),
                TenantSlot::Failed => return Err(StoreError::Integrity),
            }
        }
        self.flush(username)
    }

    /// Deep snapshot of the tenant. NotFound when the tenant has no data.
    pub fn export(&self, username: &str) -> Result<TenantExport, StoreError> {
        let slot = self.slot(username);
        let guard = slot.read();
        match &*guard {
            TenantSlot::Ready(state) => {
                if state.is_empty() {
                    return Err(StoreError::NotFound);
                }
                Ok(TenantExport {
                    username: state.username.clone(),
                    results: state.results.clone(),
                    history: state.history.clone(),
                    counters: state.counters.clone(),
                    last_updated: state.last_updated,
                    exported_at: Local::now().timestamp_millis(),
                })
            }
            TenantSlot::Failed => Err(StoreError::Integrity),
        }
    }

    /// Append an audit marker (register/delete lifecycle) and flush.
    pub fn record_history(&self, username: &str, action: &str) -> Result<(), StoreError> {
        let slot = self.slot(username);
        {
            let mut guard = slot.write();
            match &mut *guard {
                TenantSlot::Ready(state) => state.record(action),
                TenantSlot::Failed => return Err(StoreError::Integrity),
            }
        }
        self.flush(username)
    }

    /// Remove the tenant from memory and delete its sealed file. Appends a
    /// final "user-deleted" marker first so the action is recorded even if
    /// file deletion fails.
    pub fn drop_tenant(&self, username: &str) -> Result<(), StoreError> {
        {
            let slot = self.slot(username);
            let mut guard = slot.write();
            if let TenantSlot::Ready(state) = &mut *guard {
                state.record(ACTION_USER_DELETED);
            }
        }

        self.tenants.lock().remove(username);

        let path = self.tenant_path(username);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.lock().len()
    }

    /// Flush one tenant to its sealed file. No-op for unknown or failed
    /// tenants.
    pub fn flush(&self, username: &str) -> Result<(), StoreError> {
        let slot = {
            let tenants = self.tenants.lock();
            match tenants.get(username) {
                Some(slot) => Arc::clone(slot),
                None => return Ok(()),
            }
        };
        flush_slot(
            &slot,
            self.key.as_ref(),
            &self.data_dir.join(format!("{username}.enc.tmp")),
            &self.tenant_path(username),
        )
    }

    /// Flush every resident tenant; used at shutdown.
    pub fn flush_all(&self) {
        let usernames: Vec<String> = { self.tenants.lock().keys().cloned().collect() };
        for username in usernames {
            if let Err(e) = self.flush(&username) {
                warn!(username = %username, error = %e, "Shutdown flush failed");
            }
        }
    }

    /// Schedule a flush on the runtime when one is available; fall back to
    /// a synchronous flush otherwise. A failed flush only logs: in-memory
    /// state is preserved and the next mutation retries.
    fn schedule_flush(&self, username: &str, slot: Arc<RwLock<TenantSlot>>) {
        let key = self.key;
        let tmp = self.data_dir.join(format!("{username}.enc.tmp"));
        let path = self.tenant_path(username);
        let username = username.to_string();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = flush_slot(&slot, key.as_ref(), &tmp, &path) {
                    warn!(username = %username, error = %e, "Scheduled flush failed");
                }
            });
        } else if let Err(e) = flush_slot(&slot, key.as_ref(), &tmp, &path) {
            warn!(username = %username, error = %e, "Flush failed");
        }
    }
}

/// Serialize + seal under the tenant read lock, then write a temp file and
/// atomically rename it over the canonical one. Failed slots are never
/// written back to disk.
fn flush_slot(
    slot: &RwLock<TenantSlot>,
    key: Option<&[u8; crypto::KEY_SIZE]>,
    tmp: &Path,
    path: &Path,
) -> Result<(), StoreError> {
    let raw = {
        let guard = slot.read();
        let state = match &*guard {
            TenantSlot::Ready(state) => state,
            TenantSlot::Failed => return Ok(()),
        };
        let body = serde_json::to_vec(&TenantStateFile {
            schema_version: SCHEMA_VERSION,
            state: state.clone(),
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let envelope =
            crypto::seal_envelope(key, &body).map_err(|e| StoreError::Io(e.to_string()))?;
        serde_json::to_vec(&envelope).map_err(|e| StoreError::Serialization(e.to_string()))?
    };

    fs::write(tmp, &raw).map_err(|e| StoreError::Io(e.to_string()))?;
    fs::rename(tmp, path).map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(())
}

fn tail<T: Clone>(items: &[T], limit: Option<usize>) -> Vec<T> {
    match limit {
        Some(limit) => {
            let start = items.len().saturating_sub(limit);
            items[start..].to_vec()
        }
        None => items.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{ACTION_RESULTS_CLEARED, ACTION_RESULT_SUBMITTED};
    use tempfile::TempDir;

    const KEY: [u8; crypto::KEY_SIZE] = [5u8; crypto::KEY_SIZE];

    fn open_store(dir: &TempDir) -> Arc<UserDataStore> {
        Arc::new(UserDataStore::new(dir.path(), Some(KEY)).unwrap())
    }

    #[test]
    fn test_append_and_list_in_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.append("alice", 10).unwrap();
        store.append("alice", 20).unwrap();

        let results = store.list_results("alice", None).unwrap();
        let values: Vec<i64> = results.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![10, 20]);
    }

    #[test]
    fn test_counters_match_multiset() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for value in [5, 5, 5, 10, 10, 15] {
            store.append("alice", value).unwrap();
        }

        let stats = store.statistics("alice").unwrap();
        assert_eq!(stats.counters.get("5"), Some(&3));
        assert_eq!(stats.counters.get("10"), Some(&2));
        assert_eq!(stats.counters.get("15"), Some(&1));
        assert_eq!(stats.total_results, 6);
    }

    #[test]
    fn test_limit_edge_cases() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for value in [1, 2, 3] {
            store.append("alice", value).unwrap();
        }

        assert!(store.list_results("alice", Some(0)).unwrap().is_empty());

        let all = store.list_results("alice", Some(100)).unwrap();
        let values: Vec<i64> = all.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1, 2, 3]);

        let tail2 = store.list_results("alice", Some(2)).unwrap();
        let values: Vec<i64> = tail2.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn test_tenant_isolation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.append("alice", 10).unwrap();
        store.append("alice", 20).unwrap();
        store.append("bob", 30).unwrap();

        let alice: Vec<i64> = store
            .list_results("alice", None)
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        let bob: Vec<i64> = store
            .list_results("bob", None)
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(alice, vec![10, 20]);
        assert_eq!(bob, vec![30]);
    }

    #[test]
    fn test_clear_is_idempotent_and_keeps_history() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.append("alice", 7).unwrap();
        store.clear("alice").unwrap();
        store.clear("alice").unwrap();

        assert!(store.list_results("alice", None).unwrap().is_empty());
        let history = store.list_history("alice", None).unwrap();
        let actions: Vec<&str> = history.iter().map(|h| h.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                ACTION_RESULT_SUBMITTED,
                ACTION_RESULTS_CLEARED,
                ACTION_RESULTS_CLEARED
            ]
        );
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.append("alice", 17).unwrap();
            store.flush("alice").unwrap();
        }

        let reloaded = open_store(&dir);
        let results = reloaded.list_results("alice", None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 17);
        let stats = reloaded.statistics("alice").unwrap();
        assert_eq!(stats.counters.get("17"), Some(&1));
    }

    #[test]
    fn test_corrupt_file_fails_closed_per_tenant() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.append("alice", 1).unwrap();
            store.append("bob", 2).unwrap();
            store.flush("alice").unwrap();
            store.flush("bob").unwrap();
        }

        // Flip one byte inside alice's sealed file.
        let path = dir.path().join("alice.enc");
        let mut raw = fs::read(&path).unwrap();
        let pos = raw.len() / 2;
        raw[pos] ^= 0x01;
        fs::write(&path, &raw).unwrap();

        let store = open_store(&dir);
        assert_eq!(
            store.list_results("alice", None).unwrap_err(),
            StoreError::Integrity
        );
        assert_eq!(
            store.append("alice", 9).unwrap_err(),
            StoreError::Integrity
        );
        // bob is unaffected.
        assert_eq!(store.list_results("bob", None).unwrap().len(), 1);
    }

    #[test]
    fn test_export_and_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert_eq!(store.export("ghost").unwrap_err(), StoreError::NotFound);

        store.append("alice", 4).unwrap();
        let export = store.export("alice").unwrap();
        assert_eq!(export.results.len(), 1);
        assert_eq!(export.history.len(), 1);
        assert!(export.exported_at > 0);
    }

    #[test]
    fn test_drop_tenant_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.append("alice", 3).unwrap();
        store.flush("alice").unwrap();
        assert!(dir.path().join("alice.enc").exists());

        store.drop_tenant("alice").unwrap();
        assert!(!dir.path().join("alice.enc").exists());
        assert!(store.list_results("alice", None).unwrap().is_empty());
    }

    #[test]
    fn test_record_history_marker() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .record_history("alice", crate::store::models::ACTION_USER_CREATED)
            .unwrap();
        let history = store.list_history("alice", None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "user-created");
        // The marker flush creates the tenant file immediately.
        assert!(dir.path().join("alice.enc").exists());
    }

    #[test]
    fn test_analysis_window_clamps() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for value in [1, 2, 3, 4, 5] {
            store.append("alice", value).unwrap();
        }

        let input = store.analysis_window("alice", Some(100), 10).unwrap();
        assert_eq!(input.window.len(), 5);
        assert_eq!(input.total, 5);

        let input = store.analysis_window("alice", None, 3).unwrap();
        let values: Vec<i64> = input.window.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![3, 4, 5]);

        let input = store.analysis_window("alice", Some(0), 10).unwrap();
        assert!(input.window.is_empty());
        assert_eq!(input.total, 5);
    }
}

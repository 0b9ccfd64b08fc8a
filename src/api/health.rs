//! Health surface: liveness, readiness, and a process status snapshot.

use crate::api::AppState;
use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "healthy",
        "service": "spintrack-backend",
    }))
}

/// GET /check — readiness. The router only exists once every component is
/// wired, so reachable means ready.
pub async fn check() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ready",
    }))
}

/// GET /status — process snapshot.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "environment": state.config.environment,
        "memory_mb": process_memory_mb(),
        "tenants": state.data.tenant_count(),
        "stream_subscribers": state.broker.subscriber_count(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Resident memory of this process in megabytes, via a cached sysinfo
/// System instance (creating one is expensive).
fn process_memory_mb() -> u64 {
    use parking_lot::Mutex;
    use std::sync::OnceLock;
    use sysinfo::{Pid, ProcessRefreshKind, System};

    static CACHED_SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();

    let sys_mutex = CACHED_SYSTEM.get_or_init(|| Mutex::new(System::new()));
    let mut sys = sys_mutex.lock();

    let pid = Pid::from_u32(std::process::id());
    sys.refresh_processes_specifics(
        sysinfo::ProcessesToUpdate::Some(&[pid]),
        ProcessRefreshKind::new().with_memory(),
    );

    sys.process(pid)
        .map(|process| process.memory() / (1024 * 1024))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_snapshot_is_reasonable() {
        let mb = process_memory_mb();
        // A running test binary occupies more than zero and less than 16 GiB.
        assert!(mb < 16 * 1024);
    }
}

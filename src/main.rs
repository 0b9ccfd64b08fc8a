//! Spintrack - Multi-tenant real-time result analytics server
//! Mission: Authenticated submission, per-tenant encrypted storage,
//! on-demand analysis and live per-tenant broadcast

use anyhow::{Context, Result};
use spintrack_backend::{
    analytics::AnalyticsEngine,
    api::{self, AppState},
    auth::{CredentialStore, JwtHandler},
    broker::EventBroker,
    config::Config,
    store::UserDataStore,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bound on graceful drain after the shutdown signal; handlers still
/// running afterwards are abandoned.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    info!("🎰 Spintrack analytics server starting");
    if config.uses_default_admin_password() && !config.is_development() {
        warn!("⚠️  ADMIN_PASSWORD not set - using the development default");
    }

    // Startup ordering: data key -> credentials -> data store -> analytics
    // -> broker -> router.
    let data_key = config.data_key();
    if data_key.is_none() {
        warn!("⚠️  Encryption disabled - tenant files will be stored unsealed");
    }

    let credentials = Arc::new(
        CredentialStore::open(
            &config.data_dir.join("credentials.enc"),
            data_key,
            &config.admin_username,
            &config.admin_password,
        )
        .context("Failed to open credential store")?,
    );
    info!(
        users = credentials.user_count(),
        "🔐 Credential store ready"
    );

    let jwt = Arc::new(JwtHandler::new(
        config.jwt_secret.clone(),
        config.jwt_expiration_hours,
    ));

    let data = Arc::new(
        UserDataStore::new(&config.data_dir, data_key)
            .context("Failed to open user data store")?,
    );
    info!(dir = %config.data_dir.display(), "📊 User data store ready");

    let analytics = Arc::new(AnalyticsEngine::new());
    let broker = Arc::new(EventBroker::new());

    let state = AppState {
        config: Arc::new(config.clone()),
        credentials,
        jwt,
        data: data.clone(),
        analytics,
        broker: broker.clone(),
        started_at: Instant::now(),
    };

    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    // Shutdown: stop accepting, close every stream with a notice, drain
    // in-flight handlers up to the deadline, then flush tenant state.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    {
        let broker = broker.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("🛑 Shutdown signal received - draining");
            broker.close_all();
            let _ = shutdown_tx.send(true);
        });
    }

    let graceful = {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    };

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful)
    .into_future();

    let drain_deadline = {
        let mut rx = shutdown_rx;
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
            tokio::time::sleep(SHUTDOWN_DEADLINE).await;
        }
    };

    tokio::select! {
        result = server => result.context("Server error")?,
        _ = drain_deadline => {
            warn!("Drain deadline exceeded - abandoning in-flight handlers");
        }
    }

    data.flush_all();
    info!("✅ Shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let default_filter = format!(
        "spintrack_backend={},spintrack={},tower_http=info",
        config.log_level, config.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#![forbid(unsafe_code)]

//! **audit-projector** – RefData audit projector service binary.
//!
//! Wires a [`refdata_audit::AuditProjector`] against the in-process
//! reference broker and an in-memory [`refdata_audit::MemoryAuditStore`],
//! and runs its projection loop until a signal or a fatal backoff
//! exhaustion stops it. A production deployment would swap the audit
//! store for a real durable store behind the `AuditStore` trait; none is
//! in scope here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info};

use refdata_audit::{AuditProjector, AuditStore, MemoryAuditStore, TypedAuditHandler};
use refdata_backoff::BackoffPolicy;
use refdata_codec::RmpCodec;
use refdata_entities::{Currency, User};
use refdata_stream_memory::MemoryBroker;
use refdata_types::groups;

/// Runtime configuration, loaded from environment variables with typed
/// defaults.
#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default = "default_group_id")]
    group_id: String,
    #[serde(default = "default_backoff_policy")]
    store_backoff_policy: String,
}

fn default_group_id() -> String {
    groups::AUDIT_PROJECTORS.to_string()
}

fn default_backoff_policy() -> String {
    "1s-3-1m-5".to_string()
}

fn load_settings() -> Result<Settings> {
    config::Config::builder()
        .set_default("group_id", default_group_id())?
        .set_default("store_backoff_policy", default_backoff_policy())?
        .add_source(config::Environment::with_prefix("REFDATA_AUDIT"))
        .build()
        .context("failed to assemble audit projector configuration")?
        .try_deserialize()
        .context("failed to deserialize audit projector configuration")
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("audit_projector=info".parse().unwrap()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("starting RefData audit projector v{}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings()?;
    let backoff_spec = BackoffPolicy::parse(&settings.store_backoff_policy)
        .context("invalid store_backoff_policy configuration")?
        .spec();

    let broker = MemoryBroker::new();
    let store: Arc<dyn AuditStore> = Arc::new(MemoryAuditStore::new());
    let running = Arc::new(AtomicBool::new(true));

    let mut projector = AuditProjector::new(
        RmpCodec,
        build_handlers(),
        Box::new(broker.consumer(&settings.group_id)),
        Arc::new(broker.producer("audit-projector-dlq")),
        store,
        backoff_spec,
        running.clone(),
    );

    projector.start().await.context("failed to start audit projector")?;

    tokio::spawn(wait_for_shutdown(running));

    match projector.run().await {
        Ok(()) => {
            info!("audit projector stopped");
            Ok(())
        }
        Err(err) => {
            error!(%err, "audit projector terminated on a fatal error");
            Err(err.into())
        }
    }
}

fn build_handlers() -> Vec<Box<dyn refdata_audit::AuditEntityHandler<RmpCodec>>> {
    vec![
        Box::new(TypedAuditHandler::<Currency>::new()),
        Box::new(TypedAuditHandler::<User>::new()),
    ]
}

async fn wait_for_shutdown(running: Arc<AtomicBool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    running.store(false, Ordering::SeqCst);
}

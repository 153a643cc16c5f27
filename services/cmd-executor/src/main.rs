#![forbid(unsafe_code)]

//! **cmd-executor** – RefData command executor service binary.
//!
//! Wires a [`refdata_executor::CommandExecutor`] against the in-process
//! reference broker/bus and runs its write-path loop until a signal or a
//! fatal error stops it. A production deployment would swap
//! `refdata-stream-memory`/`refdata-bus-core::InMemoryBus` for real broker
//! and pub/sub driver crates behind the same `StreamConsumer`/
//! `StreamProducer`/`MessagingBus` traits; none are in scope here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use refdata_bus_core::{InMemoryBus, MessagingBus};
use refdata_codec::RmpCodec;
use refdata_entities::{Currency, User};
use refdata_executor::{CommandExecutor, ConsumerFactory, TypedEntityHandler};
use refdata_stream_core::StreamConsumer;
use refdata_stream_memory::MemoryBroker;

/// Runtime configuration, loaded from environment variables with typed
/// defaults (no config file layer is needed yet: the entity set is fixed
/// at build time via [`build_handlers`]).
#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default = "default_group_id")]
    group_id: String,
}

fn default_group_id() -> String {
    refdata_types::groups::COMMAND_EXECUTORS.to_string()
}

fn load_settings() -> Result<Settings> {
    config::Config::builder()
        .set_default("group_id", default_group_id())?
        .add_source(config::Environment::with_prefix("REFDATA_EXECUTOR"))
        .build()
        .context("failed to assemble executor configuration")?
        .try_deserialize()
        .context("failed to deserialize executor configuration")
}

/// Builds disposable hydration consumers against the same in-process
/// broker the executor's own command consumer is bound to.
struct BrokerConsumerFactory {
    broker: MemoryBroker,
}

#[async_trait]
impl ConsumerFactory for BrokerConsumerFactory {
    async fn new_consumer(&self, group_id: &str) -> Box<dyn StreamConsumer> {
        Box::new(self.broker.consumer(group_id))
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("cmd_executor=info".parse().unwrap()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("starting RefData command executor v{}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings()?;

    // The reference broker/bus backing this binary. A real deployment
    // wires equivalent driver crates behind the same traits.
    let broker = MemoryBroker::new();
    let bus: Arc<dyn MessagingBus> = Arc::new(InMemoryBus::new(1024));

    let ready = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicBool::new(true));

    let mut executor = CommandExecutor::new(
        RmpCodec,
        build_handlers(),
        Box::new(broker.consumer(&settings.group_id)),
        Arc::new(broker.producer("cmd-executor")),
        Arc::new(BrokerConsumerFactory { broker: broker.clone() }),
        bus,
        ready.clone(),
        running.clone(),
    );

    executor.start().await.context("failed to start command executor")?;

    tokio::spawn(wait_for_shutdown(running.clone()));

    match executor.run().await {
        Ok(()) => {
            info!("command executor stopped");
            Ok(())
        }
        Err(err) => {
            error!(%err, "command executor terminated on a fatal error");
            Err(err.into())
        }
    }
}

/// Builds the dispatch table for every entity this deployment serves.
/// Generalizing the entity set further (e.g. loading it from config)
/// would need `EntityHandler` construction to move behind a registry
/// keyed by name, which the fixed two-entity reference deployment here
/// does not yet need.
fn build_handlers() -> Vec<Box<dyn refdata_executor::EntityHandler<RmpCodec>>> {
    vec![
        Box::new(TypedEntityHandler::<Currency>::new()),
        Box::new(TypedEntityHandler::<User>::new()),
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

    info!("shutdown signal received, draining in-flight batch");
    running.store(false, Ordering::SeqCst);
}

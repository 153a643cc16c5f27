#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-executor** – Write-path core of the RefData event-sourced
//! platform: a consumer-group member that reads command-topic messages,
//! enforces optimistic concurrency against an in-memory version store,
//! and commits the resulting update-topic sends and consumer offsets in
//! one Kafka-style transaction.
//!
//! [`executor::CommandExecutor`] owns the main loop; [`dispatch`] supplies
//! the per-entity dispatch table it routes commands through;
//! [`version_store::VersionStore`] is the hydrated state the loop reads
//! and writes; [`batch::BatchOutput`] stages one poll batch's effects
//! until its transaction commits; [`error::ExecutorError`] is this
//! crate's fallible surface.

mod batch;
mod dispatch;
mod error;
mod executor;
mod version_store;

pub use batch::{current_version, BatchOutput};
pub use dispatch::{EntityHandler, TypedEntityHandler};
pub use error::ExecutorError;
pub use executor::{CommandExecutor, ConsumerFactory};
pub use version_store::VersionStore;

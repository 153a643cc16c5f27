#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-audit** – Durable historical projection of the RefData update
//! log.
//!
//! [`AuditProjector`] owns the consumer-group loop that buffers
//! heterogeneous update-topic messages into per-entity buckets and bulk
//! inserts each into an [`AuditStore`]; [`dispatch`] supplies the
//! per-entity decode step; [`MemoryAuditStore`] is the in-process test
//! double used by this crate's own tests and by downstream integration
//! suites.

mod dispatch;
mod error;
mod projector;
mod store;

pub use dispatch::{AuditEntityHandler, TypedAuditHandler};
pub use error::AuditError;
pub use projector::AuditProjector;
pub use store::{AuditStore, MemoryAuditStore, TypedRecordBytes};

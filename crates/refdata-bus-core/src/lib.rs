#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-bus-core** – Low-latency pub/sub bus abstraction used to
//! deliver correlated command responses (and optional status events) back
//! to clients.
//!
//! Semantics are at-most-once and best-effort: publish never blocks the
//! caller and subscribers may miss messages if they fall behind or are
//! disconnected. No durability is provided. This mirrors the reference
//! platform's `toka-bus-core::InMemoryBus`, generalized from a single
//! fixed event enum to arbitrary byte payloads addressed by hierarchical,
//! dot-delimited subjects with wildcard support.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace};

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The message could not be published (e.g. the bus is disconnected).
    #[error("failed to publish message: {0}")]
    PublishFailed(String),
}

//─────────────────────────────
//  Subject matching
//─────────────────────────────

/// A dot-delimited subject pattern. `*` matches exactly one token, `>`
/// matches the remainder of the subject and must be the last token.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    let mut pi = 0;
    let mut si = 0;
    while pi < pattern_tokens.len() {
        match pattern_tokens[pi] {
            ">" => return true,
            "*" => {
                if si >= subject_tokens.len() {
                    return false;
                }
            }
            literal => {
                if subject_tokens.get(si) != Some(&literal) {
                    return false;
                }
            }
        }
        pi += 1;
        si += 1;
    }
    pi == pattern_tokens.len() && si == subject_tokens.len()
}

//─────────────────────────────
//  Bus trait
//─────────────────────────────

/// A published message: the subject it landed on and its raw payload.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The exact subject the message was published to.
    pub subject: String,
    /// Codec-serialized payload, opaque to the bus.
    pub payload: Vec<u8>,
}

/// A live subscription. Dropping the handle does not unsubscribe; call
/// [`Subscription::unsubscribe`] explicitly, mirroring brokers where
/// subscriptions are broker-owned resources.
pub struct Subscription {
    active: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    /// Stop delivering messages to this subscription's handler. Any
    /// message already queued for delivery may still be delivered
    /// ("drained") before the handler task observes the stop signal.
    pub async fn unsubscribe(mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Core pub/sub abstraction used for command response delivery.
///
/// Implementations must be thread-safe and support any number of
/// concurrent subscribers. `publish` must not block on subscriber
/// delivery: slow or disconnected subscribers may simply miss messages.
#[async_trait]
pub trait MessagingBus: Send + Sync {
    /// Publish `payload` to `subject`. Non-blocking; returns once the
    /// message has been handed to the bus, not once subscribers have
    /// received it.
    fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to `subject_pattern`. `handler` is invoked once per
    /// matching message on a bus-owned task, out-of-band relative to the
    /// caller.
    fn subscribe(
        &self,
        subject_pattern: &str,
        handler: Arc<dyn Fn(BusMessage) + Send + Sync>,
    ) -> Subscription;
}

//─────────────────────────────
//  In-memory implementation
//─────────────────────────────

/// Default ring-buffer capacity for the underlying broadcast channel.
const DEFAULT_CAPACITY: usize = 4096;

/// A simple in-process, broadcast-backed [`MessagingBus`].
///
/// Every publish goes out on a single broadcast channel; each subscription
/// spawns a task that filters by subject pattern and forwards matches to
/// its handler. Subscribers that fall too far behind the publish rate
/// will see the rest of the stream via `broadcast::error::RecvError::Lagged`,
/// which this implementation treats as "keep going from here" rather than
/// an error, consistent with the bus's best-effort contract.
#[derive(Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<BusMessage>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryBus {
    /// Create a new bus with the given broadcast buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Number of active subscriptions (including ones whose tasks have
    /// not yet observed a matching message).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl MessagingBus for InMemoryBus {
    fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        trace!(subject, bytes = payload.len(), "publishing bus message");
        // A publish with zero subscribers is not an error: the bus is
        // best-effort and disconnection is an expected, non-fatal state.
        let _ = self.tx.send(BusMessage { subject: subject.to_string(), payload });
        Ok(())
    }

    fn subscribe(
        &self,
        subject_pattern: &str,
        handler: Arc<dyn Fn(BusMessage) + Send + Sync>,
    ) -> Subscription {
        let mut rx = self.tx.subscribe();
        let pattern = subject_pattern.to_string();
        let active = Arc::new(AtomicBool::new(true));
        let active_task = Arc::clone(&active);

        let task = tokio::spawn(async move {
            while active_task.load(Ordering::SeqCst) {
                match rx.recv().await {
                    Ok(msg) => {
                        if subject_matches(&pattern, &msg.subject) {
                            handler(msg);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, pattern, "bus subscriber lagged, resuming");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription { active, task: Some(task) }
    }
}

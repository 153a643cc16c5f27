#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-codec** – Serialization and type-dispatch registry for the
//! RefData write path.
//!
//! This crate provides two things that sit at the same layer but answer
//! different questions:
//!
//! - [`Codec`] / [`RmpCodec`]: a pure, stateless `encode`/`decode` pair over
//!   any `Serialize`/`DeserializeOwned` type. This is the "bytes ↔ typed
//!   value" half of the contract and has no notion of entity names.
//! - [`TypeRegistry`]: a type-indexed table from a compile-time-derived
//!   entity name to a small handler struct, populated once at startup. This
//!   is what lets `refdata-executor` and `refdata-audit` resolve a runtime
//!   topic/action string to a statically typed processing path without a
//!   global, compilation-unit-spanning registry (see the reference
//!   platform's per-crate `register_handler` pattern, generalized here to
//!   an explicit, owned table rather than a process-wide singleton).

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

//─────────────────────────────
//  Buffers
//─────────────────────────────

/// An owned, move-only byte buffer produced by [`Codec::encode`].
pub type Buffer = Vec<u8>;

/// A cheaply cloneable byte buffer, used when a producer must retain the
/// encoded bytes past the caller's scope (e.g. to resend on retry, or to
/// keep as the "latest serialized record" for a later Deactivate).
pub type SharedBuffer = Arc<[u8]>;

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors raised by codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization of a value failed.
    #[error("failed to encode value: {0}")]
    EncodeFailed(String),
    /// Deserialization of a buffer failed.
    #[error("failed to decode buffer: {0}")]
    DecodeFailed(String),
    /// No handler was registered under the requested type name.
    #[error("no codec handler registered for type {0:?}")]
    UnknownType(String),
}

//─────────────────────────────
//  Codec trait
//─────────────────────────────

/// Pure, stateless encode/decode pair. `(encode, decode)` round-trips
/// bit-for-bit for every `T` that implements the required serde bounds.
/// Implementations carry no mutable state and are therefore `Sync` by
/// construction, satisfying the "thread-safe for concurrent reads" part
/// of the contract without needing interior mutability.
pub trait Codec: Send + Sync {
    /// Serialize `value` into an owned buffer.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Buffer, CodecError>;

    /// Deserialize `bytes` into a `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Convenience wrapper around [`Codec::encode`] that returns a
    /// [`SharedBuffer`] for callers that need to retain the bytes.
    fn encode_shared<T: Serialize>(&self, value: &T) -> Result<SharedBuffer, CodecError> {
        self.encode(value).map(SharedBuffer::from)
    }
}

/// [`Codec`] implementation backed by MessagePack (`rmp-serde`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RmpCodec;

impl Codec for RmpCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Buffer, CodecError> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::EncodeFailed(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::DecodeFailed(e.to_string()))
    }
}

//─────────────────────────────
//  Type registry
//─────────────────────────────

/// A type-indexed table of handlers, keyed by the entity's canonical name.
///
/// `H` is whatever handler shape the caller needs (e.g. a struct of
/// `decode`/`apply_upsert`/`apply_deactivate` closures in
/// `refdata-executor`). The registry itself only owns the mapping and
/// enforces the "unknown type fails distinguishably" contract.
#[derive(Debug)]
pub struct TypeRegistry<H> {
    handlers: HashMap<&'static str, H>,
}

impl<H> Default for TypeRegistry<H> {
    fn default() -> Self {
        Self { handlers: HashMap::new() }
    }
}

impl<H> TypeRegistry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`. Registering the same name twice
    /// replaces the previous handler.
    pub fn register(&mut self, name: &'static str, handler: H) {
        self.handlers.insert(name, handler);
    }

    /// Look up the handler for `name`, failing distinguishably if it was
    /// never registered.
    pub fn get(&self, name: &str) -> Result<&H, CodecError> {
        self.handlers
            .get(name)
            .ok_or_else(|| CodecError::UnknownType(name.to_string()))
    }

    /// Iterate over every registered `(name, handler)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &H)> {
        self.handlers.iter().map(|(name, handler)| (*name, handler))
    }

    /// The set of registered names.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

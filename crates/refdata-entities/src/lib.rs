#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-entities** – Concrete entity payload types served by this
//! deployment, and the compile-time-derived name each dispatches under.
//!
//! Mirrors the reference platform's `RDEntityTraits<T>::table()` pattern
//! (a `consteval` function returning the entity's topic/dispatch name)
//! with an associated `const NAME` rather than a trait-static function
//! table, so `refdata-executor`'s dispatch registry can be built
//! generically over any `T: Entity` without a process-wide registrar.

use serde::{Deserialize, Serialize};

/// Implemented by every payload type servable by the write path. `NAME`
/// is used for topic naming (`ARQ.RefData.{Commands,Updates}.{NAME}`)
/// and as the dispatch-table key.
pub trait Entity: Send + Sync + Clone + Serialize + for<'de> Deserialize<'de> + 'static {
    /// The entity's canonical name, e.g. `"Currency"`.
    const NAME: &'static str;
}

/// An ISO currency reference-data record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    /// Three-letter ISO 4217 currency code, e.g. `"USD"`.
    pub ccy_id: String,
    /// Display name, e.g. `"US Dollar"`.
    pub name: String,
    /// Number of minor-unit decimal places conventionally quoted.
    pub decimal_places: u32,
    /// Standard settlement lag in business days.
    pub settlement_days: u32,
}

impl Entity for Currency {
    const NAME: &'static str = "Currency";
}

/// A trading-desk user reference-data record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub surname: String,
    /// Desk or team the user is attached to.
    pub desk: String,
    /// Age in years.
    pub age: u32,
}

impl Entity for User {
    const NAME: &'static str = "User";
}

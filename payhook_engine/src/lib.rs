//! Payhook reconciliation engine
//!
//! This library contains the core logic for reconciling asynchronous payment-provider notifications against the
//! order and subscription records in the local database. It is provider-agnostic: webhook handlers normalize
//! provider payloads into the event types in [`events`] and hand them to the [`ReconcilerApi`], which applies
//! exactly-once state transitions through a [`traits::ReconcilerDatabase`] backend.
//!
//! The library is divided into two main sections:
//! 1. Database management and control ([`mod@sqlite`]). You should never need to access the database directly.
//!    Instead, use the public API provided by the engine. The exception is the data types used in the database,
//!    which are defined in the `db_types` module and are public.
//! 2. The reconciliation API ([`ReconcilerApi`]). Backends need to implement the traits in [`traits`] in order to
//!    act as a storage layer for the engine.
//!
//! Side effects of a successful payment (commission processing, partner notification, operator SMS) are never
//! executed inline. They are enqueued as outbox rows in the same transaction that marks the order paid, and a
//! separate worker drains them best-effort. This keeps webhook responses fast and guarantees that a crash between
//! "order paid" and "notification sent" leaves a durable record of the pending work.

pub mod db_types;
pub mod events;
mod reconciler_api;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use reconciler_api::ReconcilerApi;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{ReconcilerDatabase, ReconcilerError};

//! tandem-state: embedded state store for a tandem cluster member.
//!
//! Backed by [redb](https://docs.rs/redb), holds everything a member needs to
//! survive a restart: the cluster membership it bootstrapped with, its own
//! identity, and the users created by the administrative auth call.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Singleton records (local identity, settings) live under fixed keys.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;

//! Transition history persistence.
//!
//! SQLite-backed append-only store with an embedded migration.

mod models;
mod store;

pub use models::*;
pub use store::*;

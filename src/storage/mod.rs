//! Local durable storage.
//!
//! - [`traits::LocalStore`]: the contract the sync engine writes through
//! - [`sql::SqlLocalStore`]: SQLite file, survives restarts
//! - [`memory::InMemoryLocalStore`]: process-lifetime only

pub mod memory;
pub mod sql;
pub mod traits;

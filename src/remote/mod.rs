//! Remote store client.
//!
//! The engine talks to the hosted backend only through [`traits::RemoteStore`];
//! [`rest::RestRemoteStore`] is the HTTP implementation and
//! [`memory::InMemoryRemoteStore`] a switchable in-process one.

pub mod memory;
pub mod rest;
pub mod traits;

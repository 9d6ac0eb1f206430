//! Distributed presence registry for charsync.
//!
//! Guarantees that each account owns at most one live real-time
//! connection across a fleet of ingress nodes that share nothing but a
//! key-value store.
//!
//! - [`PresenceRegistry`]: the atomic operations nodes use
//! - [`MemoryRegistry`]: in-process implementation for dev nodes and tests
//! - [`Admission`]: outcome of a test-and-set admit
//!
//! The registry is the only authority. Per-node maps of who is connected
//! locally are hints for fast paths and never replace a registry check.

#![allow(async_fn_in_trait)]

mod error;
mod memory;
mod registry;

pub use error::RegistryError;
pub use memory::MemoryRegistry;
pub use registry::{Admission, PresenceConfig, PresenceRegistry, presence_key};

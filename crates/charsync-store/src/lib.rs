//! Persistent store interface for charsync.
//!
//! The relational database (accounts, credentials, bans) is an external
//! collaborator. This crate defines the rows the core reads and writes
//! ([`Account`], [`Credential`], [`FingerprintBan`], ...), the narrow
//! [`Store`] trait the core talks to, and [`MemoryStore`], an in-process
//! implementation for development nodes and tests.

#![allow(async_fn_in_trait)]

mod error;
mod memory;
mod model;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use model::{
    Account, BanOutcome, BanPlan, BannedRegistration, Credential, CredentialRecord,
    ExternalIdentity, FingerprintBan, PendingUpload,
};
pub use store::Store;

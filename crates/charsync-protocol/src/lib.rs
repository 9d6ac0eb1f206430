//! Shared vocabulary for charsync.
//!
//! This crate defines the types every other layer agrees on:
//!
//! - **Identity** ([`Uid`], [`Fingerprint`], [`Ticks`]): who an account is,
//!   which character/device it presents, and the tick clock tokens expire on.
//! - **Claims** ([`SessionClaims`]): the payload of a signed session token.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]): what travels on the
//!   live channel once a connection is accepted.
//! - **Rejections** ([`RejectReason`]): the client-facing outcome of a
//!   refused authentication or connection.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes ↔ messages.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (messages) → Auth / Presence / Lifecycle
//! ```

mod codec;
mod error;
mod messages;
mod reject;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{CensusEntry, ClientMessage, ConnectionInfo, ServerMessage};
pub use reject::RejectReason;
pub use types::{Fingerprint, SessionClaims, Ticks, Uid};

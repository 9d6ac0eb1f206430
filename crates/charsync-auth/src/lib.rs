//! Authentication, session tokens, and bans for charsync.
//!
//! A client proves who it is with a long-lived secret key and gets back a
//! short-lived signed token it then presents on its live channel:
//!
//! - [`SecretKeyAuthenticator`]: secret key → account and ban flags,
//!   behind a per-source [`FailureThrottle`]
//! - [`TokenIssuer`]: signs and verifies [`SessionClaims`](charsync_protocol::SessionClaims)
//!   with the keys of a reloadable [`KeyRing`]
//! - [`BanEngine`]: spreads a ban to the primary account, the fingerprint,
//!   and the registration identity in one commit
//! - [`AuthService`]: the Authenticate and Renew requests built from the
//!   pieces above

mod authenticator;
mod ban;
mod config;
mod digest;
mod error;
mod keyring;
mod service;
mod throttle;
mod token;

pub use authenticator::{AuthReply, SecretKeyAuthenticator};
pub use ban::BanEngine;
pub use config::{AuthConfig, SigningKeys, ThrottleConfig};
pub use digest::hash_secret_key;
pub use error::{AuthError, TokenError};
pub use keyring::KeyRing;
pub use service::{AuthService, IssuedToken};
pub use throttle::FailureThrottle;
pub use token::TokenIssuer;

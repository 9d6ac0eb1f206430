//! Identity types and session claims.
//!
//! Everything here is plain data: it can be serialized, compared, hashed,
//! and logged. None of it knows how tokens are signed or where accounts live.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Uid
// ---------------------------------------------------------------------------

/// Stable account identifier.
///
/// The uid is the primary key across authentication, presence, and pairing.
/// It is an opaque string (the registration flow picks its format), wrapped
/// in a newtype so a uid can't be passed where a fingerprint is expected.
///
/// `#[serde(transparent)]` serializes `Uid("ABC")` as just `"ABC"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub String);

impl Uid {
    /// Creates a uid from anything string-like.
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Returns the uid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty uid, which is never a valid account.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Per-character/device identity string.
///
/// Independent of the account: the same fingerprint may show up under
/// several accounts, and it can be banned on its own. A banned fingerprint
/// blocks authentication no matter which credential is presented.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn new(ident: impl Into<String>) -> Self {
        Self(ident.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Ticks
// ---------------------------------------------------------------------------

/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Nanoseconds per tick.
const NANOS_PER_TICK: u128 = 100;

/// An absolute UTC instant counted in 100-nanosecond ticks since
/// 0001-01-01T00:00:00Z.
///
/// Token expiry travels as this integer so clients written against the
/// existing service keep parsing it unchanged. Ordering is plain integer
/// ordering, which is all expiry checks need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticks(pub i64);

impl Ticks {
    /// The current wall-clock instant.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Converts a `SystemTime`. Instants before the Unix epoch saturate to it.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let ticks = since_epoch.as_nanos() / NANOS_PER_TICK;
        Self(UNIX_EPOCH_TICKS.saturating_add(i64::try_from(ticks).unwrap_or(i64::MAX)))
    }

    /// Returns this instant shifted forward by `duration`, saturating.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let ticks = duration.as_nanos() / NANOS_PER_TICK;
        Self(self.0.saturating_add(i64::try_from(ticks).unwrap_or(i64::MAX)))
    }

    /// Returns the raw tick count.
    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionClaims
// ---------------------------------------------------------------------------

/// The payload of a signed session token.
///
/// Validity is decided by the signature and `exp` alone; there is no
/// server-side revocation list. A banned account keeps a working token
/// until it expires or is renewed (renewal re-checks ban state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// The account this token speaks for.
    pub uid: Uid,

    /// The fingerprint the client presented at authentication time.
    pub chara_ident: Fingerprint,

    /// Optional vanity alias, carried so the live channel doesn't need a
    /// store round trip to greet the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Absolute expiry. The token is valid for every instant strictly
    /// before this one.
    pub exp: Ticks,
}

impl SessionClaims {
    /// Builds claims that expire `lifetime` after `now`.
    ///
    /// An empty alias is normalized to `None`.
    pub fn new(
        uid: Uid,
        chara_ident: Fingerprint,
        alias: Option<String>,
        now: Ticks,
        lifetime: Duration,
    ) -> Self {
        Self {
            uid,
            chara_ident,
            alias: alias.filter(|a| !a.trim().is_empty()),
            exp: now.saturating_add(lifetime),
        }
    }

    /// Returns `true` if the claims are still valid at `now`.
    pub fn is_valid_at(&self, now: Ticks) -> bool {
        now < self.exp
    }
}

// =========================================================================
// Tests
// =========================================================================

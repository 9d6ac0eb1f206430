//! Error types for the presence layer.

/// Errors a [`PresenceRegistry`](crate::PresenceRegistry) can return.
///
/// A duplicate login is not an error: it is [`Admission::Duplicate`](crate::Admission).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The shared key-value store couldn't be reached.
    #[error("presence registry unavailable: {0}")]
    Unavailable(String),
}

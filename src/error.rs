use thiserror::Error;

/// Failure classes surfaced by relay operations.
///
/// These travel inside `anyhow::Error`; callers that need to branch on the
/// kind downcast with `err.downcast_ref::<RelayError>()`.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No local identity is available. Fatal for the invocation.
    #[error("not authenticated: no local identity available")]
    NotAuthenticated,

    /// A mandatory child node was missing from an expected response.
    /// Retrying is unlikely to help without reauthentication.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Media re-upload was refused by the remote device; the code is an
    /// HTTP-like status mapped from the retry result. Non-fatal.
    #[error("media re-upload failed by device (status {0})")]
    MediaRetryFailed(u16),

    /// Encryption or session-install failure; the send for that recipient
    /// is lost.
    #[error("crypto failure: {0}")]
    Crypto(String),
}

/// Stanza emission failure at the transport boundary. Surfaced unchanged;
/// the caller may retry.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("stanza send failed: {0}")]
    SendFailed(String),
    #[error("request timed out")]
    Timeout,
}

//! Shared error types for the REST collaborator and the wire protocol.

use thiserror::Error;

/// Typed REST failure kinds.
///
/// Callers react differently to each kind (retry after a rate limit, give up
/// on a 404), so the kind is part of the type instead of being buried in a
/// message string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("resource not found")]
    NotFound,
    #[error("access forbidden")]
    Forbidden,
    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("server error (status {status})")]
    Server { status: u16 },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl HttpError {
    /// Whether a retry can reasonably succeed without caller intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HttpError::RateLimited { .. } | HttpError::Server { .. } | HttpError::Network(_)
        )
    }
}

/// Wire-level decoding failures. Always recoverable: the offending frame is
/// dropped and the connection keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed gateway frame: {0}")]
    MalformedFrame(String),
    #[error("compressed stream corrupt: {0}")]
    Decompress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(HttpError::RateLimited { retry_after_ms: Some(250) }.is_transient());
        assert!(HttpError::Server { status: 502 }.is_transient());
        assert!(!HttpError::NotFound.is_transient());
        assert!(!HttpError::Forbidden.is_transient());
    }
}

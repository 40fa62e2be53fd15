//! Error types for traceroute operations.

use std::net::IpAddr;
use thiserror::Error;

/// Main error type for traceroute operations.
#[derive(Error, Debug)]
pub enum TracerouteError {
    // Socket/IO errors
    #[error("Failed to create socket: {0}")]
    SocketCreation(#[source] std::io::Error),

    #[error("Failed to set socket option {option}: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Read timeout exceeded")]
    ReadTimeout,

    #[error("Read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    // Packet errors
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Failed to parse {layer} layer: {reason}")]
    PacketParseFailed { layer: &'static str, reason: String },

    #[error("Not a trace response (ICMP type {icmp_type}, code {icmp_code})")]
    NotTraceResponse { icmp_type: u8, icmp_code: u8 },

    #[error("Packet did not match any probe")]
    PacketMismatch,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    // Configuration errors
    #[error("Invalid hop limit: {0} (must be at least 1)")]
    InvalidHopLimit(u8),

    #[error("Invalid loop count: {0} (use -1 for infinite or a positive count)")]
    InvalidLoopCount(i64),

    #[error("No hosts to trace")]
    NoHosts,

    #[error("Too many hosts: {hosts} requested, base port leaves room for {available}")]
    TooManyHosts { hosts: usize, available: usize },

    #[error("Unsupported address {0}: only IPv4 targets can be traced")]
    UnsupportedAddress(IpAddr),

    // DNS errors
    #[error("Failed to resolve hostname {hostname}: {source}")]
    DnsResolutionFailed {
        hostname: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TracerouteError {
    /// Returns true if this error is retryable (e.g., timeout, packet mismatch, parse failure).
    ///
    /// The receive loop shares one raw socket with every other ICMP flow on the
    /// machine, so most of what it reads is unrelated traffic. Retryable errors
    /// are logged and the packet dropped; anything else ends the batch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ReadTimeout
                | Self::PacketMismatch
                | Self::NotTraceResponse { .. }
                | Self::MalformedPacket(_)
                | Self::PacketParseFailed { .. }
                | Self::PacketTooShort { .. }
        )
    }
}

impl From<std::io::Error> for TracerouteError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => TracerouteError::ReadTimeout,
            std::io::ErrorKind::WouldBlock => TracerouteError::ReadTimeout,
            std::io::ErrorKind::Interrupted => TracerouteError::ReadTimeout,
            _ => TracerouteError::ReadFailed(err),
        }
    }
}

/// Result type alias for traceroute operations.
pub type TracerouteResult<T> = Result<T, TracerouteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(TracerouteError::ReadTimeout.is_retryable());
        assert!(TracerouteError::PacketMismatch.is_retryable());
        assert!(TracerouteError::MalformedPacket("test".into()).is_retryable());
        assert!(TracerouteError::NotTraceResponse {
            icmp_type: 0,
            icmp_code: 0
        }
        .is_retryable());
        assert!(TracerouteError::PacketParseFailed {
            layer: "IP",
            reason: "test".into()
        }
        .is_retryable());
        assert!(TracerouteError::PacketTooShort {
            expected: 20,
            actual: 10
        }
        .is_retryable());
        assert!(!TracerouteError::NoHosts.is_retryable());
        assert!(!TracerouteError::SocketCreation(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied
        ))
        .is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: TracerouteError = std::io::Error::from(std::io::ErrorKind::WouldBlock).into();
        assert!(matches!(err, TracerouteError::ReadTimeout));

        let err: TracerouteError = std::io::Error::from(std::io::ErrorKind::NotConnected).into();
        assert!(matches!(err, TracerouteError::ReadFailed(_)));
        assert!(!err.is_retryable());
    }
}

//! Packet codec and socket I/O for multitrace.
//!
//! Probes leave through a [`Sink`] (a UDP socket with a settable TTL) and
//! router errors come back through a [`Source`] (a raw ICMP socket). The
//! [`codec`] module turns the two into wire bytes and [`TraceResponse`]s.

pub mod codec;
pub mod platform;
pub mod sink;
pub mod source;
pub mod synth;

pub use codec::{
    decode_response, encode_probe, parse_udp_first_bytes, IcmpKind, TraceResponse, UdpInfo,
};
pub use sink::Sink;
pub use source::Source;

/// Handle containing both source and sink for packet I/O.
pub struct SourceSinkHandle {
    /// Receives router responses.
    pub source: Box<dyn Source>,
    /// Transmits probes.
    pub sink: Box<dyn Sink>,
}

impl std::fmt::Debug for SourceSinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSinkHandle").finish_non_exhaustive()
    }
}

/// Opens the probe and response sockets for the current platform.
///
/// Failing to open either socket is fatal: nothing has been sent yet and the
/// caller should surface the error as-is.
pub async fn new_source_sink() -> Result<SourceSinkHandle, multitrace_core::TracerouteError> {
    platform::new_source_sink().await
}

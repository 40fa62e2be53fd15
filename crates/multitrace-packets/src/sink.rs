//! Probe transmission trait.

use async_trait::async_trait;
use multitrace_core::TracerouteError;
use std::net::SocketAddrV4;

/// Trait for sockets that transmit probes.
#[async_trait]
pub trait Sink: Send {
    /// Sends `payload` to `addr` with the outbound TTL set to `ttl`.
    async fn send_probe(
        &mut self,
        payload: &[u8],
        ttl: u8,
        addr: SocketAddrV4,
    ) -> Result<(), TracerouteError>;

    /// Closes the sink.
    async fn close(&mut self) -> Result<(), TracerouteError>;
}

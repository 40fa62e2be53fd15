//! Response source trait.

use async_trait::async_trait;
use multitrace_core::TracerouteError;

/// Trait for sockets that deliver inbound router responses.
#[async_trait]
pub trait Source: Send {
    /// Waits until a packet is available and reads it (starting at the IP
    /// layer) into `buf`. Returns the number of bytes read.
    ///
    /// Implementations must be cancel-safe: dropping the future before it
    /// completes must not lose a packet.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TracerouteError>;

    /// Closes the source.
    async fn close(&mut self) -> Result<(), TracerouteError>;
}

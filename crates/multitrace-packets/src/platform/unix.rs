//! Unix socket pair: a UDP probe socket and a raw ICMP response socket.

use crate::{Sink, Source, SourceSinkHandle};
use async_trait::async_trait;
use multitrace_core::TracerouteError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::io::unix::AsyncFd;
use tokio::net::UdpSocket;
use tracing::trace;

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket closed")
}

/// Raw ICMP socket registered with the tokio reactor.
///
/// A read that would block parks the task on readiness and retries once the
/// reactor reports the socket readable. At most one read is outstanding
/// because `read` takes `&mut self`.
pub struct IcmpSource {
    inner: Option<AsyncFd<Socket>>,
}

impl IcmpSource {
    /// Opens the raw socket. Requires CAP_NET_RAW or root.
    pub fn new() -> Result<Self, TracerouteError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(TracerouteError::SocketCreation)?;
        socket
            .set_nonblocking(true)
            .map_err(|source| TracerouteError::SocketOption {
                option: "O_NONBLOCK",
                source,
            })?;
        let inner = AsyncFd::new(socket).map_err(TracerouteError::SocketCreation)?;
        trace!("Opened raw ICMP socket");

        Ok(Self { inner: Some(inner) })
    }
}

#[async_trait]
impl Source for IcmpSource {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TracerouteError> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| TracerouteError::ReadFailed(closed()))?;

        loop {
            let mut guard = inner.readable().await.map_err(TracerouteError::ReadFailed)?;

            match guard.try_io(|fd| {
                let mut socket: &Socket = fd.get_ref();
                socket.read(buf)
            }) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(TracerouteError::ReadFailed(e)),
                Err(_would_block) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TracerouteError> {
        // Dropping the AsyncFd deregisters and closes the descriptor.
        self.inner.take();
        Ok(())
    }
}

/// Unconnected UDP socket used to send every probe of the batch.
pub struct UdpSink {
    socket: Option<UdpSocket>,
    current_ttl: Option<u8>,
}

impl UdpSink {
    /// Opens the probe socket on an ephemeral port.
    pub fn new() -> Result<Self, TracerouteError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(TracerouteError::SocketCreation)?;
        socket
            .set_nonblocking(true)
            .map_err(|source| TracerouteError::SocketOption {
                option: "O_NONBLOCK",
                source,
            })?;
        socket
            .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())
            .map_err(TracerouteError::SocketCreation)?;
        let socket =
            UdpSocket::from_std(socket.into()).map_err(TracerouteError::SocketCreation)?;

        Ok(Self {
            socket: Some(socket),
            current_ttl: None,
        })
    }
}

#[async_trait]
impl Sink for UdpSink {
    async fn send_probe(
        &mut self,
        payload: &[u8],
        ttl: u8,
        addr: SocketAddrV4,
    ) -> Result<(), TracerouteError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TracerouteError::WriteFailed(closed()))?;

        if self.current_ttl != Some(ttl) {
            socket
                .set_ttl(u32::from(ttl))
                .map_err(|source| TracerouteError::SocketOption {
                    option: "IP_TTL",
                    source,
                })?;
            self.current_ttl = Some(ttl);
        }

        socket
            .send_to(payload, SocketAddr::V4(addr))
            .await
            .map_err(TracerouteError::WriteFailed)?;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TracerouteError> {
        self.socket.take();
        self.current_ttl = None;
        Ok(())
    }
}

/// Creates a new source and sink for unix platforms.
pub async fn new_source_sink() -> Result<SourceSinkHandle, TracerouteError> {
    let sink = UdpSink::new()?;
    let source = IcmpSource::new()?;

    Ok(SourceSinkHandle {
        source: Box::new(source),
        sink: Box::new(sink),
    })
}

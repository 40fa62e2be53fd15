//! Probe encoding and ICMP response decoding.
//!
//! A probe is a plain UDP datagram whose payload length equals its TTL and
//! whose destination port is `base_port + host_slot`. Routers that drop it
//! answer with an ICMP error quoting the original IP header and the first
//! bytes of the UDP header, which is enough to recover both numbers.

use etherparse::{Icmpv4Slice, IpNumber, Ipv4HeaderSlice};
use multitrace_core::{ProbeIdentity, TracerouteError};
use std::fmt;
use std::net::Ipv4Addr;

/// Length of the UDP header.
pub const UDP_HEADER_LEN: usize = 8;

/// ICMP type for "time exceeded".
pub const ICMP_TIME_EXCEEDED: u8 = 11;

/// ICMP type for "destination unreachable".
pub const ICMP_DEST_UNREACHABLE: u8 = 3;

const PROBE_FILLER: u8 = b'x';

/// Builds the payload of the probe for `hop`: exactly `hop` filler bytes.
///
/// The caller sets the socket TTL to `hop` before sending.
pub fn encode_probe(hop: u8) -> Vec<u8> {
    vec![PROBE_FILLER; usize::from(hop)]
}

/// ICMPv4 message types, named for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpKind {
    EchoReply,
    DestinationUnreachable,
    SourceQuench,
    Redirect,
    EchoRequest,
    RouterAdvertisement,
    RouterSolicitation,
    TimeExceeded,
    ParameterProblem,
    Timestamp,
    TimestampReply,
    Other(u8),
}

impl IcmpKind {
    /// Classifies an ICMP type byte.
    pub fn from_type(icmp_type: u8) -> Self {
        match icmp_type {
            0 => IcmpKind::EchoReply,
            3 => IcmpKind::DestinationUnreachable,
            4 => IcmpKind::SourceQuench,
            5 => IcmpKind::Redirect,
            8 => IcmpKind::EchoRequest,
            9 => IcmpKind::RouterAdvertisement,
            10 => IcmpKind::RouterSolicitation,
            11 => IcmpKind::TimeExceeded,
            12 => IcmpKind::ParameterProblem,
            13 => IcmpKind::Timestamp,
            14 => IcmpKind::TimestampReply,
            other => IcmpKind::Other(other),
        }
    }

    /// Returns true for the two error types a traceroute probe can trigger.
    pub fn is_trace_error(&self) -> bool {
        matches!(self, IcmpKind::TimeExceeded | IcmpKind::DestinationUnreachable)
    }
}

impl fmt::Display for IcmpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpKind::EchoReply => write!(f, "echo-reply"),
            IcmpKind::DestinationUnreachable => write!(f, "destination-unreachable"),
            IcmpKind::SourceQuench => write!(f, "source-quench"),
            IcmpKind::Redirect => write!(f, "redirect"),
            IcmpKind::EchoRequest => write!(f, "echo-request"),
            IcmpKind::RouterAdvertisement => write!(f, "router-advertisement"),
            IcmpKind::RouterSolicitation => write!(f, "router-solicitation"),
            IcmpKind::TimeExceeded => write!(f, "time-exceeded"),
            IcmpKind::ParameterProblem => write!(f, "parameter-problem"),
            IcmpKind::Timestamp => write!(f, "timestamp"),
            IcmpKind::TimestampReply => write!(f, "timestamp-reply"),
            IcmpKind::Other(t) => write!(f, "type-{}", t),
        }
    }
}

/// UDP header info parsed from an ICMP payload.
#[derive(Debug, Clone, Copy)]
pub struct UdpInfo {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// UDP length.
    pub length: u16,
    /// UDP checksum.
    pub checksum: u16,
}

/// Parse the first 8 bytes of a UDP header from an ICMP payload.
pub fn parse_udp_first_bytes(buf: &[u8]) -> Result<UdpInfo, TracerouteError> {
    if buf.len() < UDP_HEADER_LEN {
        return Err(TracerouteError::PacketTooShort {
            expected: UDP_HEADER_LEN,
            actual: buf.len(),
        });
    }

    Ok(UdpInfo {
        src_port: u16::from_be_bytes([buf[0], buf[1]]),
        dst_port: u16::from_be_bytes([buf[2], buf[3]]),
        length: u16::from_be_bytes([buf[4], buf[5]]),
        checksum: u16::from_be_bytes([buf[6], buf[7]]),
    })
}

/// A router error that quotes one of our probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceResponse {
    /// Time exceeded or destination unreachable.
    pub kind: IcmpKind,
    /// ICMP code.
    pub code: u8,
    /// Source of the ICMP error (the router or the target).
    pub responder: Ipv4Addr,
    /// Destination of the quoted probe.
    pub destination: Ipv4Addr,
    /// Host slot and hop recovered from the quoted probe.
    pub identity: ProbeIdentity,
}

/// Decodes a raw ICMP packet (starting at the IP layer) read from the
/// response socket.
///
/// Anything that is not a time-exceeded or destination-unreachable error
/// quoting a UDP datagram to a port at or above `base_port` comes back as a
/// retryable error.
pub fn decode_response(packet: &[u8], base_port: u16) -> Result<TraceResponse, TracerouteError> {
    let outer = Ipv4HeaderSlice::from_slice(packet).map_err(|e| {
        TracerouteError::PacketParseFailed {
            layer: "IP",
            reason: e.to_string(),
        }
    })?;
    if outer.protocol() != IpNumber::ICMP {
        return Err(TracerouteError::PacketMismatch);
    }

    let icmp = Icmpv4Slice::from_slice(&packet[outer.slice().len()..]).map_err(|e| {
        TracerouteError::PacketParseFailed {
            layer: "ICMP",
            reason: e.to_string(),
        }
    })?;
    let kind = IcmpKind::from_type(icmp.type_u8());
    if !kind.is_trace_error() {
        return Err(TracerouteError::NotTraceResponse {
            icmp_type: icmp.type_u8(),
            icmp_code: icmp.code_u8(),
        });
    }

    // Quoted original datagram: IP header, then at least 8 bytes of UDP.
    let quoted = icmp.payload();
    let inner = Ipv4HeaderSlice::from_slice(quoted).map_err(|e| {
        TracerouteError::PacketParseFailed {
            layer: "Inner IP",
            reason: e.to_string(),
        }
    })?;
    if inner.protocol() != IpNumber::UDP {
        return Err(TracerouteError::PacketMismatch);
    }

    let inner_header_len = inner.slice().len();
    let udp = parse_udp_first_bytes(&quoted[inner_header_len..])?;

    let payload_len = usize::from(inner.total_len())
        .checked_sub(inner_header_len + UDP_HEADER_LEN)
        .ok_or_else(|| {
            TracerouteError::MalformedPacket(format!(
                "quoted total length {} shorter than headers",
                inner.total_len()
            ))
        })?;
    let hop = u8::try_from(payload_len)
        .ok()
        .filter(|hop| *hop > 0)
        .ok_or_else(|| {
            TracerouteError::MalformedPacket(format!(
                "quoted payload length {} is not a hop number",
                payload_len
            ))
        })?;

    let identity = ProbeIdentity::from_destination_port(udp.dst_port, base_port, hop)
        .ok_or(TracerouteError::PacketMismatch)?;

    Ok(TraceResponse {
        kind,
        code: icmp.code_u8(),
        responder: outer.source_addr(),
        destination: inner.destination_addr(),
        identity,
    })
}

//! Synthetic packets.
//!
//! Builds the IPv4 datagrams a probe would become on the wire and the ICMP
//! errors routers send back, so the codec and the engine can be exercised
//! without raw sockets.

use pnet_packet::icmp::{self, IcmpCode, IcmpType, MutableIcmpPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::{self, Ipv4Flags, MutableIpv4Packet};
use pnet_packet::udp::{self, MutableUdpPacket};
use std::net::Ipv4Addr;

use crate::codec::{encode_probe, ICMP_DEST_UNREACHABLE, ICMP_TIME_EXCEEDED, UDP_HEADER_LEN};

const IPV4_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;

/// Routers quote the original IP header plus this many bytes of its payload.
const QUOTED_PAYLOAD_LEN: usize = 8;

/// ICMP code for "port unreachable".
const PORT_UNREACHABLE: u8 = 3;

/// Builds the full IPv4 datagram the kernel would emit for the probe of
/// `hop`: TTL and payload length both equal `hop`.
pub fn udp_probe(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, hop: u8) -> Vec<u8> {
    let payload = encode_probe(hop);
    let udp_len = UDP_HEADER_LEN + payload.len();
    let ip_len = IPV4_HEADER_LEN + udp_len;
    let mut buffer = vec![0u8; ip_len];

    write_ipv4_header(
        &mut buffer,
        src,
        dst,
        hop,
        IpNextHeaderProtocols::Udp,
        0x4000 + u16::from(hop),
    );

    if let Some(mut udp_packet) = MutableUdpPacket::new(&mut buffer[IPV4_HEADER_LEN..]) {
        udp_packet.set_source(src_port);
        udp_packet.set_destination(dst_port);
        udp_packet.set_length(udp_len as u16);
        udp_packet.set_payload(&payload);
        let checksum = udp::ipv4_checksum(&udp_packet.to_immutable(), &src, &dst);
        udp_packet.set_checksum(checksum);
    }

    buffer
}

/// Builds a "time exceeded in transit" error from `router` quoting `probe`.
pub fn time_exceeded(router: Ipv4Addr, local: Ipv4Addr, probe: &[u8]) -> Vec<u8> {
    icmp_error(router, local, ICMP_TIME_EXCEEDED, 0, probe)
}

/// Builds a "port unreachable" error from `target` quoting `probe`.
pub fn port_unreachable(target: Ipv4Addr, local: Ipv4Addr, probe: &[u8]) -> Vec<u8> {
    icmp_error(target, local, ICMP_DEST_UNREACHABLE, PORT_UNREACHABLE, probe)
}

/// Builds an ICMP error of the given type and code quoting `original`.
pub fn icmp_error(
    from: Ipv4Addr,
    to: Ipv4Addr,
    icmp_type: u8,
    icmp_code: u8,
    original: &[u8],
) -> Vec<u8> {
    let quoted = &original[..original.len().min(IPV4_HEADER_LEN + QUOTED_PAYLOAD_LEN)];
    let mut body = vec![0u8; 4];
    body.extend_from_slice(quoted);
    build_icmp(from, to, icmp_type, icmp_code, &body)
}

/// Builds an echo reply from `from`, the kind of unrelated ICMP traffic a
/// raw socket also sees.
pub fn echo_reply(from: Ipv4Addr, to: Ipv4Addr) -> Vec<u8> {
    // identifier, sequence, then a short payload
    let body = [0x12, 0x34, 0x00, 0x01, b'p', b'i', b'n', b'g'];
    build_icmp(from, to, 0, 0, &body)
}

fn build_icmp(from: Ipv4Addr, to: Ipv4Addr, icmp_type: u8, icmp_code: u8, body: &[u8]) -> Vec<u8> {
    let icmp_len = 4 + body.len();
    let mut buffer = vec![0u8; IPV4_HEADER_LEN + icmp_len.max(ICMP_HEADER_LEN)];

    write_ipv4_header(&mut buffer, from, to, 64, IpNextHeaderProtocols::Icmp, 0);

    if let Some(mut icmp_packet) = MutableIcmpPacket::new(&mut buffer[IPV4_HEADER_LEN..]) {
        icmp_packet.set_icmp_type(IcmpType::new(icmp_type));
        icmp_packet.set_icmp_code(IcmpCode::new(icmp_code));
        icmp_packet.set_payload(body);
        let checksum = icmp::checksum(&icmp_packet.to_immutable());
        icmp_packet.set_checksum(checksum);
    }

    buffer
}

fn write_ipv4_header(
    buffer: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    protocol: IpNextHeaderProtocol,
    identification: u16,
) {
    let total_len = buffer.len() as u16;
    if let Some(mut ip_packet) = MutableIpv4Packet::new(buffer) {
        ip_packet.set_version(4);
        ip_packet.set_header_length(5); // 5 * 4 = 20 bytes
        ip_packet.set_total_length(total_len);
        ip_packet.set_identification(identification);
        ip_packet.set_flags(Ipv4Flags::DontFragment);
        ip_packet.set_ttl(ttl);
        ip_packet.set_next_level_protocol(protocol);
        ip_packet.set_source(src);
        ip_packet.set_destination(dst);

        let checksum = ipv4::checksum(&ip_packet.to_immutable());
        ip_packet.set_checksum(checksum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_probe_layout() {
        let src: Ipv4Addr = "192.168.1.1".parse().unwrap();
        let dst: Ipv4Addr = "8.8.8.8".parse().unwrap();

        let packet = udp_probe(src, dst, 12345, 33434, 5);

        // 20 IP + 8 UDP + 5 payload
        assert_eq!(packet.len(), 33);
        assert_eq!(packet[0] >> 4, 4);
        // TTL
        assert_eq!(packet[8], 5);
        // Protocol (UDP = 17)
        assert_eq!(packet[9], 17);
        // Total length
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 33);
        // Destination port
        assert_eq!(u16::from_be_bytes([packet[22], packet[23]]), 33434);
    }

    #[test]
    fn test_icmp_error_quotes_header_and_eight_bytes() {
        let local: Ipv4Addr = "192.168.1.1".parse().unwrap();
        let router: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let probe = udp_probe(local, "8.8.8.8".parse().unwrap(), 12345, 33434, 20);

        let packet = time_exceeded(router, local, &probe);

        assert_eq!(packet.len(), 20 + 8 + 28);
        assert_eq!(packet[9], 1);
        assert_eq!(packet[20], ICMP_TIME_EXCEEDED);
        assert_eq!(&packet[28..56], &probe[..28]);
        // The quoted total length still covers the full probe.
        assert_eq!(u16::from_be_bytes([packet[30], packet[31]]), 48);
    }
}

//! Live socket tests. These need CAP_NET_RAW (or root) and a routed network,
//! so they are ignored by default:
//!
//! ```text
//! sudo -E cargo test -p multitrace-packets --test raw_sockets -- --ignored
//! ```

#![cfg(unix)]

use multitrace_core::{TracerouteError, DEFAULT_BASE_PORT};
use multitrace_packets::{decode_response, encode_probe, new_source_sink};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

fn target() -> Ipv4Addr {
    std::env::var("MULTITRACE_TARGET")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(Ipv4Addr::new(8, 8, 8, 8))
}

#[tokio::test]
#[ignore]
async fn first_hop_answers_ttl_one_probe() {
    let mut handle = new_source_sink().await.expect("open sockets");
    let target = target();

    handle
        .sink
        .send_probe(&encode_probe(1), 1, SocketAddrV4::new(target, DEFAULT_BASE_PORT))
        .await
        .expect("send probe");

    let mut buf = vec![0u8; 1500];
    let response = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let n = match handle.source.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => return Err(e),
            };
            match decode_response(&buf[..n], DEFAULT_BASE_PORT) {
                Ok(response) if response.destination == target => return Ok(response),
                Ok(_) => continue,
                Err(e) if e.is_retryable() => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await
    .expect("no ICMP response within 3s")
    .expect("read response");

    assert_eq!(response.identity.hop, 1);
    assert_eq!(response.identity.host_slot, 0);

    handle.sink.close().await.expect("close sink");
    handle.source.close().await.expect("close source");
}

#[tokio::test]
#[ignore]
async fn closed_source_refuses_reads() {
    let mut handle = new_source_sink().await.expect("open sockets");
    handle.source.close().await.expect("close source");

    let mut buf = [0u8; 64];
    let err = handle.source.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, TracerouteError::ReadFailed(_)));
    assert!(!err.is_retryable());
}

//! Core types for multi-host traceroute.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::num::NonZeroU32;
use std::time::Duration;

/// First destination port used for probes; host slot `n` probes `DEFAULT_BASE_PORT + n`.
pub const DEFAULT_BASE_PORT: u16 = 33434;

/// Default maximum TTL.
pub const DEFAULT_HOP_LIMIT: u8 = 30;

/// How long a probe may go unanswered before its hop is recorded as lost.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(50);

/// Pause between the end of one loop and the first probe of the next.
pub const DEFAULT_INTER_LOOP_DELAY: Duration = Duration::from_millis(50);

/// A resolved traceroute target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    /// Name the caller knows this host by.
    pub name: String,
    /// Resolved address.
    pub addr: Ipv4Addr,
}

impl Host {
    /// Creates a new host.
    pub fn new(name: impl Into<String>, addr: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }
}

impl From<Ipv4Addr> for Host {
    fn from(addr: Ipv4Addr) -> Self {
        Self::new(addr.to_string(), addr)
    }
}

/// Result for a single hop: who answered and how long it took, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// The address that answered (None if the hop timed out).
    pub address: Option<Ipv4Addr>,
    /// Round-trip time in milliseconds (None if the hop timed out).
    pub rtt_ms: Option<f64>,
}

impl TraceStep {
    /// A hop that answered after `rtt`.
    pub fn reply(address: Ipv4Addr, rtt: Duration) -> Self {
        Self {
            address: Some(address),
            rtt_ms: Some(rtt.as_secs_f64() * 1000.0),
        }
    }

    /// A hop that never answered.
    pub const fn timeout() -> Self {
        Self {
            address: None,
            rtt_ms: None,
        }
    }

    /// Returns true if this step is the timeout sentinel.
    pub fn is_timeout(&self) -> bool {
        self.address.is_none()
    }
}

impl fmt::Display for TraceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.address, self.rtt_ms) {
            (Some(addr), Some(rtt)) => write!(f, "{}  {:.3} ms", addr, rtt),
            (Some(addr), None) => write!(f, "{}", addr),
            _ => write!(f, "*"),
        }
    }
}

/// What an outbound probe carries across the network and back.
///
/// `host_slot` rides in the UDP destination port, `hop` in the payload length.
/// Both come back inside the ICMP error's copy of the original datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeIdentity {
    /// Per-batch index of the host.
    pub host_slot: u16,
    /// TTL the probe was sent with.
    pub hop: u8,
}

impl ProbeIdentity {
    /// Destination port for this probe, or None if it would overflow.
    pub fn destination_port(&self, base_port: u16) -> Option<u16> {
        base_port.checked_add(self.host_slot)
    }

    /// Recovers an identity from an echoed destination port.
    pub fn from_destination_port(port: u16, base_port: u16, hop: u8) -> Option<Self> {
        port.checked_sub(base_port).map(|host_slot| Self { host_slot, hop })
    }
}

/// How many loops each host runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum LoopCount {
    /// Keep looping until stopped.
    #[default]
    Infinite,
    /// Run exactly this many loops.
    Finite(NonZeroU32),
}

impl LoopCount {
    /// A single loop.
    pub const ONCE: LoopCount = LoopCount::Finite(NonZeroU32::MIN);

    /// Returns true once `loops_completed` loops satisfy this count.
    pub fn is_satisfied(&self, loops_completed: u32) -> bool {
        match self {
            LoopCount::Infinite => false,
            LoopCount::Finite(n) => loops_completed >= n.get(),
        }
    }
}

impl TryFrom<i64> for LoopCount {
    type Error = crate::TracerouteError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(LoopCount::Infinite),
            n if n >= 1 => u32::try_from(n)
                .ok()
                .and_then(NonZeroU32::new)
                .map(LoopCount::Finite)
                .ok_or(crate::TracerouteError::InvalidLoopCount(n)),
            n => Err(crate::TracerouteError::InvalidLoopCount(n)),
        }
    }
}

impl From<LoopCount> for i64 {
    fn from(count: LoopCount) -> Self {
        match count {
            LoopCount::Infinite => -1,
            LoopCount::Finite(n) => n.get() as i64,
        }
    }
}

impl fmt::Display for LoopCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopCount::Infinite => write!(f, "infinite"),
            LoopCount::Finite(n) => write!(f, "{}", n),
        }
    }
}

impl std::str::FromStr for LoopCount {
    type Err = crate::TracerouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inf" | "infinite" => Ok(LoopCount::Infinite),
            other => {
                let n: i64 = other.parse().map_err(|_| {
                    crate::TracerouteError::Internal(format!("invalid loop count: {}", s))
                })?;
                LoopCount::try_from(n)
            }
        }
    }
}

/// Configuration of a trace batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum TTL probed per host.
    pub hop_limit: u8,
    /// Number of loops per host.
    pub loop_count: LoopCount,
    /// Delay before a host starts its next loop.
    pub inter_loop_delay: Duration,
    /// Per-probe response deadline.
    pub probe_timeout: Duration,
    /// Destination port of host slot 0.
    pub base_port: u16,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            hop_limit: DEFAULT_HOP_LIMIT,
            loop_count: LoopCount::Infinite,
            inter_loop_delay: DEFAULT_INTER_LOOP_DELAY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            base_port: DEFAULT_BASE_PORT,
        }
    }
}

impl BatchConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), crate::TracerouteError> {
        if self.hop_limit == 0 {
            return Err(crate::TracerouteError::InvalidHopLimit(self.hop_limit));
        }
        Ok(())
    }

    /// Validates that `hosts` hosts fit in the port range above `base_port`.
    pub fn validate_host_count(&self, hosts: usize) -> Result<(), crate::TracerouteError> {
        if hosts == 0 {
            return Err(crate::TracerouteError::NoHosts);
        }
        let available = self.available_slots();
        if hosts > available {
            return Err(crate::TracerouteError::TooManyHosts { hosts, available });
        }
        Ok(())
    }

    /// Number of host slots that fit between `base_port` and the top of the port range.
    pub fn available_slots(&self) -> usize {
        usize::from(u16::MAX - self.base_port) + 1
    }
}

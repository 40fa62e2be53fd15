//! Result types for batch output.

use crate::{LoopCount, TraceStep};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// The hops recorded for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTrace {
    /// Name the host was requested by.
    pub name: String,
    /// Address that was traced.
    pub address: Ipv4Addr,
    /// Hops in TTL order, starting at TTL 1.
    pub steps: Vec<TraceStep>,
}

impl HostTrace {
    /// Returns true if the last recorded hop is the target itself.
    pub fn reached_destination(&self) -> bool {
        self.steps
            .last()
            .and_then(|step| step.address)
            .is_some_and(|addr| addr == self.address)
    }

    /// Number of hops that answered.
    pub fn responding_hops(&self) -> usize {
        self.steps.iter().filter(|step| !step.is_timeout()).count()
    }
}

impl fmt::Display for HostTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "traceroute to {} ({})", self.name, self.address)?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "{:>3}  {}", i + 1, step)?;
        }
        Ok(())
    }
}

/// Output of one completed loop for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopReport {
    /// Per-batch index of the host.
    pub host_slot: u16,
    /// Loop number, starting at 1.
    pub loop_index: u32,
    /// The trace recorded during this loop.
    pub trace: HostTrace,
}

impl LoopReport {
    /// Serializes the report to a single line of JSON.
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Final output of a batch, one entry per host in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResults {
    /// Unique identifier for this batch run.
    pub run_id: Uuid,
    /// Maximum TTL that was probed.
    pub hop_limit: u8,
    /// Loop count the batch ran with.
    pub loop_count: LoopCount,
    /// Per-host traces from each host's last loop.
    pub traces: Vec<HostTrace>,
}

impl BatchResults {
    /// Iterates over `(address, steps)` pairs in host order.
    pub fn pairs(&self) -> impl Iterator<Item = (Ipv4Addr, &[TraceStep])> {
        self.traces
            .iter()
            .map(|trace| (trace.address, trace.steps.as_slice()))
    }

    /// Serializes the results to JSON with indentation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serializes the results to compact JSON.
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_trace() -> HostTrace {
        HostTrace {
            name: "example".to_string(),
            address: "192.0.2.7".parse().unwrap(),
            steps: vec![
                TraceStep::reply("10.0.0.1".parse().unwrap(), Duration::from_millis(3)),
                TraceStep::timeout(),
                TraceStep::reply("192.0.2.7".parse().unwrap(), Duration::from_millis(12)),
            ],
        }
    }

    #[test]
    fn test_reached_destination() {
        let mut trace = sample_trace();
        assert!(trace.reached_destination());
        assert_eq!(trace.responding_hops(), 2);

        trace.steps.pop();
        assert!(!trace.reached_destination());
    }

    #[test]
    fn test_host_trace_display() {
        let text = sample_trace().to_string();
        assert!(text.starts_with("traceroute to example (192.0.2.7)"));
        assert!(text.contains("  2  *"));
        assert!(text.contains("  3  192.0.2.7  12.000 ms"));
    }

    #[test]
    fn test_results_serialization() {
        let results = BatchResults {
            run_id: Uuid::nil(),
            hop_limit: 3,
            loop_count: LoopCount::ONCE,
            traces: vec![sample_trace()],
        };

        let json = results.to_json().unwrap();
        assert!(json.contains("\"hop_limit\": 3"));
        assert!(json.contains("\"loop_count\": 1"));
        assert!(json.contains("\"address\": null"));

        let parsed: BatchResults = serde_json::from_str(&results.to_json_compact().unwrap()).unwrap();
        assert_eq!(parsed, results);
    }

    #[test]
    fn test_pairs_preserve_order() {
        let mut second = sample_trace();
        second.address = "198.51.100.1".parse().unwrap();
        let results = BatchResults {
            run_id: Uuid::nil(),
            hop_limit: 3,
            loop_count: LoopCount::Infinite,
            traces: vec![sample_trace(), second],
        };

        let addrs: Vec<Ipv4Addr> = results.pairs().map(|(addr, _)| addr).collect();
        assert_eq!(
            addrs,
            vec![
                "192.0.2.7".parse::<Ipv4Addr>().unwrap(),
                "198.51.100.1".parse().unwrap()
            ]
        );
    }
}

//! Concurrent multi-host traceroute engine.
//!
//! Every host in a [`TraceBatch`] gets a host slot that fixes its probe
//! destination port, so responses from all hosts can share one raw ICMP
//! socket. Each host is probed hop by hop, one probe in flight at a time.
//! Hosts advance independently of each other.
//!
//! # Example
//!
//! ```no_run
//! use multitrace_batch::TraceBatch;
//! use multitrace_core::{BatchConfig, Host, LoopCount};
//!
//! # async fn run() -> Result<(), multitrace_core::TracerouteError> {
//! let config = BatchConfig {
//!     loop_count: LoopCount::ONCE,
//!     ..Default::default()
//! };
//! let mut batch = TraceBatch::open(config).await?;
//! let hosts = [Host::from("192.0.2.1".parse::<std::net::Ipv4Addr>().unwrap())];
//! let outcome = batch.trace(&hosts).await?;
//! for trace in &outcome.results().traces {
//!     print!("{}", trace);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod tracker;

pub use batch::{BatchOutcome, CompletionCallback, TraceBatch};
pub use tracker::{LoopOutcome, Tracker, TrackerState};

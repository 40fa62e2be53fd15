//! Core types, configuration and error handling for multitrace.
//!
//! This crate holds the pieces shared by the probing engine and its callers:
//!
//! - [`Host`], [`TraceStep`] and [`ProbeIdentity`], the data model of a trace
//! - [`BatchConfig`] and [`LoopCount`] for configuring a batch
//! - [`TracerouteError`] for error handling
//! - [`BatchResults`], [`HostTrace`] and [`LoopReport`] for output

pub mod error;
pub mod result;
pub mod types;

pub use error::{TracerouteError, TracerouteResult};
pub use result::{BatchResults, HostTrace, LoopReport};
pub use types::{
    BatchConfig, Host, LoopCount, ProbeIdentity, TraceStep, DEFAULT_BASE_PORT, DEFAULT_HOP_LIMIT,
    DEFAULT_INTER_LOOP_DELAY, DEFAULT_PROBE_TIMEOUT,
};

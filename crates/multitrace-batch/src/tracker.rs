//! Per-host probing state.

use multitrace_core::{Host, HostTrace, LoopCount, TraceStep};
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::time::Instant;
use tokio_util::time::delay_queue::Key;

/// Where a tracker is between handler calls.
///
/// Sending and advancing happen inside a single handler, so they never show
/// up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No probe in flight: not started yet, or waiting for the next loop.
    Idle,
    /// The probe for `current_hop` is in flight and its timeout is armed.
    AwaitingResponse,
    /// Every loop this host owes the batch is done.
    Finished,
}

/// What closing a loop leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The loop count is satisfied.
    Finished,
    /// Another loop is due after the inter-loop delay.
    Restart,
}

/// Probing state for one host.
#[derive(Debug)]
pub struct Tracker {
    host: Host,
    slot: u16,
    destination: SocketAddrV4,
    current_hop: u8,
    results: Vec<TraceStep>,
    last_send: Option<Instant>,
    timeout: Option<Key>,
    loops_completed: u32,
    state: TrackerState,
}

impl Tracker {
    /// Creates a tracker that probes `host` at `port`.
    pub fn new(slot: u16, host: Host, port: u16) -> Self {
        let destination = SocketAddrV4::new(host.addr, port);
        Self {
            host,
            slot,
            destination,
            current_hop: 0,
            results: Vec::new(),
            last_send: None,
            timeout: None,
            loops_completed: 0,
            state: TrackerState::Idle,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn slot(&self) -> u16 {
        self.slot
    }

    /// Address and port every probe of this tracker goes to.
    pub fn destination(&self) -> SocketAddrV4 {
        self.destination
    }

    pub fn current_hop(&self) -> u8 {
        self.current_hop
    }

    /// Hops recorded in the current (or last) loop.
    pub fn results(&self) -> &[TraceStep] {
        &self.results
    }

    pub fn loops_completed(&self) -> u32 {
        self.loops_completed
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == TrackerState::Finished
    }

    /// Returns true if a response for `hop` is the one this tracker waits for.
    pub fn is_awaiting(&self, hop: u8) -> bool {
        self.state == TrackerState::AwaitingResponse && self.current_hop == hop
    }

    /// Moves to the next hop. Returns None once `hop_limit` has been probed,
    /// meaning the loop is over.
    pub fn next_hop(&mut self, hop_limit: u8) -> Option<u8> {
        if self.current_hop >= hop_limit {
            return None;
        }
        self.current_hop += 1;
        Some(self.current_hop)
    }

    /// Records that the probe for the current hop left at `at`, with its
    /// timeout armed under `timeout`.
    pub fn mark_sent(&mut self, at: Instant, timeout: Key) {
        self.last_send = Some(at);
        self.timeout = Some(timeout);
        self.state = TrackerState::AwaitingResponse;
    }

    /// Disarms the pending timeout, handing back its key for removal.
    pub fn take_timeout(&mut self) -> Option<Key> {
        self.timeout.take()
    }

    /// Consumes the pending timeout if it is the one that just expired.
    pub fn expire_timeout(&mut self, key: Key) -> bool {
        if self.timeout == Some(key) {
            self.timeout = None;
            true
        } else {
            false
        }
    }

    /// Records the current hop as unanswered.
    pub fn record_timeout(&mut self) {
        self.results.push(TraceStep::timeout());
        self.timeout = None;
        self.state = TrackerState::Idle;
    }

    /// Records an answer for the current hop received at `at`. Returns true
    /// if it came from the target itself.
    pub fn record_response(&mut self, responder: Ipv4Addr, at: Instant) -> bool {
        let rtt = self
            .last_send
            .map(|sent| at.saturating_duration_since(sent))
            .unwrap_or_default();
        self.results.push(TraceStep::reply(responder, rtt));
        self.timeout = None;
        self.state = TrackerState::Idle;
        responder == self.host.addr
    }

    /// Closes the current loop and says whether another one is due.
    pub fn complete_loop(&mut self, loop_count: LoopCount) -> LoopOutcome {
        self.loops_completed += 1;
        self.timeout = None;
        if loop_count.is_satisfied(self.loops_completed) {
            self.state = TrackerState::Finished;
            LoopOutcome::Finished
        } else {
            self.state = TrackerState::Idle;
            LoopOutcome::Restart
        }
    }

    /// Clears the last loop's results before starting over at hop 1.
    pub fn reset(&mut self) {
        self.results.clear();
        self.current_hop = 0;
        self.last_send = None;
        self.timeout = None;
        if self.state != TrackerState::Finished {
            self.state = TrackerState::Idle;
        }
    }

    /// Copies out what this tracker has recorded.
    pub fn snapshot(&self) -> HostTrace {
        HostTrace {
            name: self.host.name.clone(),
            address: self.host.addr,
            steps: self.results.clone(),
        }
    }
}

//! Batch orchestration.
//!
//! A [`TraceBatch`] shares one probe socket and one response socket between
//! every host it traces. A single task drives the whole batch: it waits on
//! the response socket, the timer queue and the stop handle at the same time,
//! and runs each handler to completion before looking at the next event.
//! Trackers therefore never need locks, and a response and a timeout for the
//! same probe can never both be recorded.

use crate::tracker::{LoopOutcome, Tracker};
use futures::StreamExt;
use multitrace_core::{
    BatchConfig, BatchResults, Host, LoopReport, ProbeIdentity, TracerouteError,
};
use multitrace_packets::{
    decode_response, encode_probe, new_source_sink, IcmpKind, Sink, Source, SourceSinkHandle,
    TraceResponse,
};
use std::fmt;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::delay_queue::Key;
use tokio_util::time::DelayQueue;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Large enough for any ICMP error quoting one of our probes.
const RECV_BUFFER_LEN: usize = 1500;

/// Called once with the final results when every host has finished.
pub type CompletionCallback = Box<dyn FnOnce(&BatchResults) + Send>;

#[derive(Debug, Clone, Copy)]
enum TimerEvent {
    ProbeTimeout { slot: u16, hop: u8 },
    NextLoop { slot: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Ready,
    Running,
    Closed,
}

/// How a batch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Every host finished all of its loops.
    Completed(BatchResults),
    /// The stop handle fired first. Each trace holds whatever that host had
    /// recorded in its current loop.
    Stopped(BatchResults),
}

impl BatchOutcome {
    pub fn results(&self) -> &BatchResults {
        match self {
            BatchOutcome::Completed(results) | BatchOutcome::Stopped(results) => results,
        }
    }

    pub fn into_results(self) -> BatchResults {
        match self {
            BatchOutcome::Completed(results) | BatchOutcome::Stopped(results) => results,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed(_))
    }
}

/// Traces many hosts concurrently over one socket pair.
pub struct TraceBatch {
    config: BatchConfig,
    run_id: Uuid,
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    trackers: Vec<Tracker>,
    timers: DelayQueue<TimerEvent>,
    completed: usize,
    state: BatchState,
    buffer: Vec<u8>,
    stop: CancellationToken,
    callback: Option<CompletionCallback>,
    loop_reports: Option<mpsc::UnboundedSender<LoopReport>>,
}

impl TraceBatch {
    /// Creates a batch over an already opened socket pair.
    pub fn new(config: BatchConfig, handle: SourceSinkHandle) -> Result<Self, TracerouteError> {
        config.validate()?;

        Ok(Self {
            config,
            run_id: Uuid::new_v4(),
            source: handle.source,
            sink: handle.sink,
            trackers: Vec::new(),
            timers: DelayQueue::new(),
            completed: 0,
            state: BatchState::Ready,
            buffer: vec![0u8; RECV_BUFFER_LEN],
            stop: CancellationToken::new(),
            callback: None,
            loop_reports: None,
        })
    }

    /// Opens the platform sockets and creates a batch over them.
    ///
    /// Socket creation failures (usually missing privileges for the raw
    /// socket) are returned unchanged.
    pub async fn open(config: BatchConfig) -> Result<Self, TracerouteError> {
        config.validate()?;
        let handle = new_source_sink().await?;
        Self::new(config, handle)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns true while the batch is tracing.
    pub fn is_open(&self) -> bool {
        self.state == BatchState::Running
    }

    /// Per-host state, indexed by host slot.
    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    /// Token that stops the batch when cancelled. A stopped batch closes its
    /// sockets and returns [`BatchOutcome::Stopped`]; the completion callback
    /// does not run.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Subscribes to per-loop reports. Each call replaces the previous
    /// subscriber.
    pub fn loop_reports(&mut self) -> mpsc::UnboundedReceiver<LoopReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.loop_reports = Some(tx);
        rx
    }

    /// Traces `hosts` until every host has finished its loops or the stop
    /// handle fires.
    ///
    /// Host `i` is probed on port `base_port + i`. A batch traces once; after
    /// this returns its sockets are closed.
    pub async fn trace(&mut self, hosts: &[Host]) -> Result<BatchOutcome, TracerouteError> {
        self.start(hosts)?;
        debug!(
            run_id = %self.run_id,
            hosts = self.trackers.len(),
            hop_limit = self.config.hop_limit,
            loop_count = %self.config.loop_count,
            "Starting trace batch"
        );

        for slot in 0..self.trackers.len() {
            self.advance(slot).await;
        }

        let stop = self.stop.clone();
        while self.is_open() {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!(run_id = %self.run_id, "Stop requested");
                    self.close().await;
                }
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    let key = expired.key();
                    self.on_timer(expired.into_inner(), key).await;
                }
                read = self.source.read(&mut self.buffer) => match read {
                    Ok(n) => self.on_packet(n).await,
                    Err(e) if e.is_retryable() => {
                        trace!(error = %e, "Retryable read error");
                    }
                    Err(e) => {
                        warn!(error = %e, "Response socket failed, closing batch");
                        self.close().await;
                        return Err(e);
                    }
                },
            }
        }

        let results = self.results();
        if self.completed == self.trackers.len() {
            Ok(BatchOutcome::Completed(results))
        } else {
            Ok(BatchOutcome::Stopped(results))
        }
    }

    /// Like [`trace`](Self::trace), and runs `callback` once with the final
    /// results when every host finishes. It never runs for a stopped batch
    /// or in infinite mode.
    pub async fn trace_with<F>(
        &mut self,
        hosts: &[Host],
        callback: F,
    ) -> Result<BatchOutcome, TracerouteError>
    where
        F: FnOnce(&BatchResults) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self.trace(hosts).await
    }

    /// Cancels all timers and closes both sockets. Returns false if the batch
    /// was already closed.
    pub async fn close(&mut self) -> bool {
        if self.state == BatchState::Closed {
            return false;
        }
        self.state = BatchState::Closed;

        self.timers.clear();
        for tracker in &mut self.trackers {
            tracker.take_timeout();
        }

        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "Failed to close probe socket");
        }
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close response socket");
        }

        debug!(
            run_id = %self.run_id,
            completed = self.completed,
            hosts = self.trackers.len(),
            "Trace batch closed"
        );
        true
    }

    /// Snapshot of every host's current results, in host order.
    pub fn results(&self) -> BatchResults {
        BatchResults {
            run_id: self.run_id,
            hop_limit: self.config.hop_limit,
            loop_count: self.config.loop_count,
            traces: self.trackers.iter().map(Tracker::snapshot).collect(),
        }
    }

    fn start(&mut self, hosts: &[Host]) -> Result<(), TracerouteError> {
        match self.state {
            BatchState::Ready => {}
            BatchState::Running => {
                return Err(TracerouteError::Internal("batch is already tracing".into()))
            }
            BatchState::Closed => {
                return Err(TracerouteError::Internal("batch is closed".into()))
            }
        }
        self.config.validate_host_count(hosts.len())?;

        let too_many = || TracerouteError::TooManyHosts {
            hosts: hosts.len(),
            available: self.config.available_slots(),
        };
        let mut trackers = Vec::with_capacity(hosts.len());
        for (index, host) in hosts.iter().enumerate() {
            let slot = u16::try_from(index).map_err(|_| too_many())?;
            let port = ProbeIdentity { host_slot: slot, hop: 0 }
                .destination_port(self.config.base_port)
                .ok_or_else(too_many)?;
            trackers.push(Tracker::new(slot, host.clone(), port));
        }

        self.trackers = trackers;
        self.completed = 0;
        self.state = BatchState::Running;
        Ok(())
    }

    /// Sends the next probe for `slot`, or closes its loop once the hop limit
    /// is passed. A probe that cannot be sent is recorded as lost and the
    /// next hop goes out right away.
    async fn advance(&mut self, slot: usize) {
        let hop_limit = self.config.hop_limit;

        while self.is_open() {
            let Some(hop) = self.trackers[slot].next_hop(hop_limit) else {
                self.complete_loop(slot).await;
                return;
            };

            let tracker = &self.trackers[slot];
            let host_slot = tracker.slot();
            let destination = tracker.destination();
            let payload = encode_probe(hop);

            trace!(host_slot, hop, destination = %destination, "Sending UDP probe");

            match self.sink.send_probe(&payload, hop, destination).await {
                Ok(()) => {
                    let key = self.timers.insert(
                        TimerEvent::ProbeTimeout {
                            slot: host_slot,
                            hop,
                        },
                        self.config.probe_timeout,
                    );
                    self.trackers[slot].mark_sent(Instant::now(), key);
                    return;
                }
                Err(e) => {
                    warn!(host_slot, hop, error = %e, "Failed to send probe, recording hop as lost");
                    self.trackers[slot].record_timeout();
                }
            }
        }
    }

    async fn on_timer(&mut self, event: TimerEvent, key: Key) {
        match event {
            TimerEvent::ProbeTimeout { slot, hop } => {
                let tracker = &mut self.trackers[usize::from(slot)];
                if !tracker.expire_timeout(key) {
                    trace!(host_slot = slot, hop, "Ignored stale probe timeout");
                    return;
                }
                trace!(host_slot = slot, hop, "Probe timed out");
                tracker.record_timeout();
                self.advance(usize::from(slot)).await;
            }
            TimerEvent::NextLoop { slot } => {
                let tracker = &mut self.trackers[usize::from(slot)];
                trace!(
                    host_slot = slot,
                    loop_index = tracker.loops_completed() + 1,
                    "Starting next loop"
                );
                tracker.reset();
                self.advance(usize::from(slot)).await;
            }
        }
    }

    async fn on_packet(&mut self, len: usize) {
        let response = match decode_response(&self.buffer[..len], self.config.base_port) {
            Ok(response) => response,
            Err(TracerouteError::NotTraceResponse {
                icmp_type,
                icmp_code,
            }) => {
                trace!(
                    kind = %IcmpKind::from_type(icmp_type),
                    code = icmp_code,
                    "Ignored non-traceroute ICMP packet"
                );
                return;
            }
            Err(e) => {
                debug!(error = %e, "Failed to parse packet");
                return;
            }
        };

        if let Some(slot) = self.route(&response) {
            self.on_response(slot, response.responder).await;
        }
    }

    /// Finds the tracker a response belongs to. It must name a known host
    /// slot, quote that host's address, and answer the hop the tracker is
    /// waiting on.
    fn route(&self, response: &TraceResponse) -> Option<usize> {
        let ProbeIdentity { host_slot, hop } = response.identity;

        let Some(tracker) = self.trackers.get(usize::from(host_slot)) else {
            debug!(host_slot, hop, kind = %response.kind, "Ignored response for unknown host slot");
            return None;
        };
        if response.destination != tracker.host().addr {
            trace!(
                expected = %tracker.host().addr,
                actual = %response.destination,
                "Ignored ICMP packet with different destination"
            );
            return None;
        }
        if !tracker.is_awaiting(hop) {
            trace!(
                host_slot,
                hop,
                current_hop = tracker.current_hop(),
                state = ?tracker.state(),
                "Ignored stale response"
            );
            return None;
        }

        trace!(
            host_slot,
            hop,
            responder = %response.responder,
            kind = %response.kind,
            "Matched response"
        );
        Some(usize::from(host_slot))
    }

    async fn on_response(&mut self, slot: usize, responder: Ipv4Addr) {
        if let Some(key) = self.trackers[slot].take_timeout() {
            self.timers.remove(&key);
        }

        if self.trackers[slot].record_response(responder, Instant::now()) {
            self.complete_loop(slot).await;
        } else {
            self.advance(slot).await;
        }
    }

    async fn complete_loop(&mut self, slot: usize) {
        let tracker = &mut self.trackers[slot];
        if tracker.is_finished() {
            return;
        }

        let outcome = tracker.complete_loop(self.config.loop_count);
        let report = LoopReport {
            host_slot: tracker.slot(),
            loop_index: tracker.loops_completed(),
            trace: tracker.snapshot(),
        };
        debug!(
            host = %report.trace.name,
            host_slot = report.host_slot,
            loop_index = report.loop_index,
            hops = report.trace.steps.len(),
            reached = report.trace.reached_destination(),
            "Loop complete"
        );
        self.publish(report);

        match outcome {
            LoopOutcome::Restart => {
                let host_slot = self.trackers[slot].slot();
                self.timers.insert(
                    TimerEvent::NextLoop { slot: host_slot },
                    self.config.inter_loop_delay,
                );
            }
            LoopOutcome::Finished => {
                self.completed += 1;
                if self.completed == self.trackers.len() {
                    self.finish().await;
                }
            }
        }
    }

    fn publish(&mut self, report: LoopReport) {
        if let Some(tx) = &self.loop_reports {
            if tx.send(report).is_err() {
                trace!("Loop report receiver dropped");
                self.loop_reports = None;
            }
        }
    }

    async fn finish(&mut self) {
        if !self.close().await {
            return;
        }
        let results = self.results();
        if let Some(callback) = self.callback.take() {
            callback(&results);
        }
    }
}

impl fmt::Debug for TraceBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceBatch")
            .field("config", &self.config)
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("trackers", &self.trackers.len())
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

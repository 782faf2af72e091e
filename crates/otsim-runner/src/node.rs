//! Per-node bookkeeping.
//!
//! A [`Node`] is the dispatcher's record of one external node process: its
//! virtual clock, addresses and role as last reported, its ping and joiner
//! histories, its induced-failure controller, and the socket endpoint the
//! process speaks from. Radio state lives separately in the dispatcher's
//! radio-node map.

use std::collections::VecDeque;
use std::net::SocketAddr;

use otsim_common::{
    ExtAddr, JoinerState, NodeId, NodeMode, NodeRole, Rloc16, SimTime, INVALID_EXT_ADDR,
    INVALID_RLOC16, MAX_PING_DELAY_US,
};
use otsim_event::status::CoapStatus;
use tracing::debug;

use crate::failure::{FailTime, FailureController};

/// Bounded history length for ping, joiner, and coap records.
const RESULT_HISTORY_LIMIT: usize = 1000;

/// An outstanding ping request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    /// Firmware send time, microseconds.
    pub timestamp_us: u64,
    /// Destination address text.
    pub dst: String,
    /// Payload size, bytes.
    pub data_size: u16,
}

/// A finished (answered or expired) ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResult {
    /// Destination address text.
    pub dst: String,
    /// Payload size, bytes.
    pub data_size: u16,
    /// Round-trip delay, microseconds; equals [`MAX_PING_DELAY_US`] for
    /// timeouts.
    pub delay_us: u64,
}

impl PingResult {
    /// Whether this entry records an expiry instead of a reply.
    pub fn is_timeout(&self) -> bool {
        self.delay_us >= MAX_PING_DELAY_US
    }
}

/// A finished commissioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinerResult {
    /// When the session opened.
    pub start_time: SimTime,
    /// When the session closed (back to idle).
    pub end_time: SimTime,
    /// When the joiner reached the joined state, if it did.
    pub joined_time: Option<SimTime>,
}

impl JoinerResult {
    /// Whether the attempt succeeded.
    pub fn succeeded(&self) -> bool {
        self.joined_time.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct JoinerSession {
    start_time: SimTime,
    joined_time: Option<SimTime>,
}

/// The dispatcher's record of one simulated node.
#[derive(Debug)]
pub struct Node {
    /// Node id, unique in this simulation.
    pub id: NodeId,
    /// Firmware random seed, drawn from the node-seed stream at creation;
    /// the supervisor passes it to the node process.
    pub seed: u32,
    /// The node's virtual clock; advances with every event sent to it.
    pub cur_time: SimTime,
    /// When the node was created.
    pub create_time: SimTime,

    /// Last reported extended address.
    pub ext_addr: ExtAddr,
    /// Last reported rloc16.
    pub rloc16: Rloc16,
    /// Last reported partition id.
    pub partition_id: u32,
    /// Last reported device role.
    pub role: NodeRole,
    /// Last reported MLE mode.
    pub mode: NodeMode,
    /// Last reported joiner state.
    pub joiner_state: JoinerState,

    /// Induced-failure state.
    pub failure_ctrl: FailureController,
    /// Socket address of the node process, once it has registered.
    pub peer: Option<SocketAddr>,
    /// Last I/O error talking to the node process.
    pub last_error: Option<String>,

    msg_id: u64,
    failed: bool,
    pending_pings: VecDeque<PingRequest>,
    ping_results: VecDeque<PingResult>,
    joiner_session: Option<JoinerSession>,
    joiner_results: VecDeque<JoinerResult>,
    coap_events: VecDeque<CoapStatus>,
    /// Earliest failure wake already sitting in the send queue, to avoid
    /// flooding it with duplicates.
    scheduled_failure_wake: Option<SimTime>,
}

impl Node {
    /// Create the record for a new node.
    pub fn new(id: NodeId, seed: u32, create_time: SimTime, fail_time: FailTime) -> Self {
        Node {
            id,
            seed,
            cur_time: create_time,
            create_time,
            ext_addr: INVALID_EXT_ADDR,
            rloc16: INVALID_RLOC16,
            partition_id: 0,
            role: NodeRole::Disabled,
            mode: NodeMode::full(),
            joiner_state: JoinerState::Idle,
            failure_ctrl: FailureController::new(fail_time),
            peer: None,
            last_error: None,
            msg_id: 0,
            failed: false,
            pending_pings: VecDeque::new(),
            ping_results: VecDeque::new(),
            joiner_session: None,
            joiner_results: VecDeque::new(),
            coap_events: VecDeque::new(),
            scheduled_failure_wake: None,
        }
    }

    /// Next per-node message id, monotonic.
    pub fn next_msg_id(&mut self) -> u64 {
        self.msg_id += 1;
        self.msg_id
    }

    /// Whether the node is in the induced-failure state.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Enter the failed state. Returns `true` on the edge, `false` if
    /// already failed.
    pub fn fail(&mut self) -> bool {
        let edge = !self.failed;
        self.failed = true;
        edge
    }

    /// Leave the failed state. Returns `true` on the edge.
    pub fn recover(&mut self) -> bool {
        let edge = self.failed;
        self.failed = false;
        edge
    }

    /// Whether a failure wake at `wake` still needs to be queued, and
    /// record it if so.
    pub fn needs_failure_wake(&mut self, wake: SimTime) -> bool {
        if wake.is_ever() {
            return false;
        }
        match self.scheduled_failure_wake {
            Some(scheduled) if scheduled <= wake && scheduled > self.cur_time => false,
            _ => {
                self.scheduled_failure_wake = Some(wake);
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // Ping bookkeeping
    // ------------------------------------------------------------------

    /// The node fired off a ping request.
    pub fn on_ping_request(&mut self, timestamp_us: u64, dst: &str, data_size: u16) {
        self.pending_pings.push_back(PingRequest {
            timestamp_us,
            dst: dst.to_string(),
            data_size,
        });
        // A runaway sender must not grow the pending set without bound.
        while self.pending_pings.len() > RESULT_HISTORY_LIMIT {
            self.pending_pings.pop_front();
        }
    }

    /// The node saw a ping reply; match it against the outstanding
    /// requests. `now` is the dispatcher's current virtual time.
    pub fn on_ping_reply(&mut self, now: SimTime, timestamp_us: u64, dst: &str) -> Option<u64> {
        self.expire_pings(now);
        let pos = self
            .pending_pings
            .iter()
            .position(|p| p.timestamp_us == timestamp_us && p.dst == dst)?;
        let request = self.pending_pings.remove(pos).expect("position just found");
        let delay_us = now.as_micros().saturating_sub(request.timestamp_us);
        self.push_ping_result(PingResult {
            dst: request.dst,
            data_size: request.data_size,
            delay_us,
        });
        Some(delay_us)
    }

    /// Expire outstanding requests past the ping deadline. Returns how many
    /// expired.
    pub fn expire_pings(&mut self, now: SimTime) -> usize {
        let deadline = now.as_micros().saturating_sub(MAX_PING_DELAY_US);
        let mut expired = 0;
        while let Some(front) = self.pending_pings.front() {
            if front.timestamp_us >= deadline {
                break;
            }
            let request = self.pending_pings.pop_front().expect("front just peeked");
            debug!(node = self.id, dst = %request.dst, "ping request timed out");
            self.push_ping_result(PingResult {
                dst: request.dst,
                data_size: request.data_size,
                delay_us: MAX_PING_DELAY_US,
            });
            expired += 1;
        }
        expired
    }

    fn push_ping_result(&mut self, result: PingResult) {
        self.ping_results.push_back(result);
        while self.ping_results.len() > RESULT_HISTORY_LIMIT {
            self.ping_results.pop_front();
        }
    }

    /// Finished pings, oldest first.
    pub fn ping_results(&self) -> impl Iterator<Item = &PingResult> {
        self.ping_results.iter()
    }

    /// Outstanding ping count (for tests and status displays).
    pub fn pending_ping_count(&self) -> usize {
        self.pending_pings.len()
    }

    // ------------------------------------------------------------------
    // Joiner bookkeeping
    // ------------------------------------------------------------------

    /// The node reported a joiner-state change; drive the session record.
    pub fn on_joiner_state(&mut self, now: SimTime, state: JoinerState) {
        let previous = self.joiner_state;
        self.joiner_state = state;

        match state {
            JoinerState::Idle => {
                if let Some(session) = self.joiner_session.take() {
                    self.joiner_results.push_back(JoinerResult {
                        start_time: session.start_time,
                        end_time: now,
                        joined_time: session.joined_time,
                    });
                    while self.joiner_results.len() > RESULT_HISTORY_LIMIT {
                        self.joiner_results.pop_front();
                    }
                }
            }
            JoinerState::Joined => {
                if let Some(session) = self.joiner_session.as_mut() {
                    session.joined_time.get_or_insert(now);
                } else {
                    debug!(node = self.id, ?previous, "joined without an open session");
                }
            }
            _ => {
                if self.joiner_session.is_none() {
                    self.joiner_session = Some(JoinerSession {
                        start_time: now,
                        joined_time: None,
                    });
                }
            }
        }
    }

    /// Finished joiner sessions, oldest first.
    pub fn joiner_results(&self) -> impl Iterator<Item = &JoinerResult> {
        self.joiner_results.iter()
    }

    // ------------------------------------------------------------------
    // CoAP observations
    // ------------------------------------------------------------------

    /// Record a coap status observation.
    pub fn on_coap(&mut self, status: CoapStatus) {
        self.coap_events.push_back(status);
        while self.coap_events.len() > RESULT_HISTORY_LIMIT {
            self.coap_events.pop_front();
        }
    }

    /// Recorded coap observations, oldest first.
    pub fn coap_events(&self) -> impl Iterator<Item = &CoapStatus> {
        self.coap_events.iter()
    }
}

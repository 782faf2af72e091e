//! The virtual-time dispatcher.
//!
//! One thread owns all simulation state: the global clock, every node
//! record, the alarm manager, the send queue, the radio model, and the
//! address indexes. External input arrives over three channels only — node
//! events decoded by the socket reader, opaque tasks posted by hosting
//! code, and go-requests that advance virtual time — so no lock protects
//! any of it.
//!
//! The scheduling loop per go-request:
//!
//! 1. drain posted tasks and node sockets (nodes that owe a response are
//!    "alive"; the drain blocks until they all report, with a safety
//!    timeout),
//! 2. pick the earliest pending instant across the alarm manager and the
//!    send queue (alarms win ties),
//! 3. pace against the wall clock when a speed limit is set,
//! 4. advance the clock, wake the alarm's node or dispatch the queued
//!    event, repeat until the pause time is reached.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use otsim_common::{
    rng, ExtAddr, NodeId, SimTime, BROADCAST_RLOC16, INVALID_RLOC16,
};
use otsim_event::status::StatusItem;
use otsim_event::{Event, EventType, RfSimParam, RfSimParamData};
use otsim_mac::{FrameDst, ParsedFrame};
use otsim_metrics::metric_defs as md;
use otsim_radio::{
    create_radio_model, Position, RadioModel, RadioModelParams, RadioNode, RadioNodeMap,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::addrs::AddressMaps;
use crate::alarm::AlarmManager;
use crate::callbacks::{CallbackHandler, Visualizer};
use crate::config::{NodeConfig, SimConfig};
use crate::counters::Counters;
use crate::failure::{FailTime, FailureTransition};
use crate::node::Node;
use crate::pcap::{CapturedFrame, PcapHandle, PcapMode};
use crate::queue::SendQueue;
use crate::realtime::{PacerConfig, RealTimePacer};
use crate::socket::{NodeTransport, ReaderMsg};

/// How long the dispatcher waits for an alive node before force-advancing
/// it.
const NODE_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Delays at or above 2^31 µs from a node are treated as "never".
const DELAY_FOREVER_THRESHOLD: u64 = 1 << 31;

/// Virtual-time slice driven per iteration in autogo mode.
const AUTOGO_SLICE_US: u64 = 1_000_000;

/// Errors from dispatcher operations.
#[derive(Error, Debug)]
pub enum DispatcherError {
    /// A node id is already taken.
    #[error("node {0} already exists")]
    NodeExists(NodeId),

    /// No such node.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Scenario named an unknown radio model.
    #[error(transparent)]
    UnknownRadioModel(#[from] otsim_radio::UnknownModelError),

    /// Socket setup failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// A closure posted from another thread, run on the dispatcher thread with
/// exclusive access to all state.
pub type Task = Box<dyn FnOnce(&mut Dispatcher) + Send>;

/// A request to advance virtual time.
pub struct GoRequest {
    /// How far to advance, microseconds.
    pub duration_us: u64,
    /// Signalled with the reached time when the drive completes.
    pub done: Option<Sender<SimTime>>,
}

/// Cloneable handle for threads that feed the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    task_tx: Sender<Task>,
    go_tx: Sender<GoRequest>,
    stop_tx: Sender<()>,
}

impl DispatcherHandle {
    /// Post a task; it runs on the dispatcher thread.
    pub fn post_task(&self, task: impl FnOnce(&mut Dispatcher) + Send + 'static) -> bool {
        self.task_tx.send(Box::new(task)).is_ok()
    }

    /// Advance virtual time by `duration_us` and wait for completion.
    /// Returns the virtual time reached, or `None` if the dispatcher is
    /// gone.
    pub fn go(&self, duration_us: u64) -> Option<SimTime> {
        let (done_tx, done_rx) = unbounded();
        self.go_tx
            .send(GoRequest {
                duration_us,
                done: Some(done_tx),
            })
            .ok()?;
        done_rx.recv().ok()
    }

    /// Ask the dispatcher to stop after the current drive.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

/// The central scheduler.
pub struct Dispatcher {
    config: SimConfig,
    cur_time: SimTime,
    running: bool,

    nodes: HashMap<NodeId, Node>,
    radio_nodes: RadioNodeMap,
    alarm_mgr: AlarmManager,
    send_queue: SendQueue,
    radio_model: Box<dyn RadioModel>,
    addrs: AddressMaps,
    /// Nodes the dispatcher is waiting on before time may advance.
    alive: HashSet<NodeId>,
    /// Socket address → node id, learned from node-info registration.
    peers: HashMap<SocketAddr, NodeId>,

    transport: NodeTransport,
    pcap: Option<PcapHandle>,
    pacer: RealTimePacer,
    counters: Counters,

    cbs: Box<dyn CallbackHandler>,
    vis: Box<dyn Visualizer>,

    event_rx: Receiver<ReaderMsg>,
    task_rx: Receiver<Task>,
    go_rx: Receiver<GoRequest>,
    stop_rx: Receiver<()>,
}

impl Dispatcher {
    /// Build a dispatcher from configuration. Binds the coordinator socket
    /// and seeds the random streams.
    pub fn new(
        config: SimConfig,
        cbs: Box<dyn CallbackHandler>,
        vis: Box<dyn Visualizer>,
    ) -> Result<(Dispatcher, DispatcherHandle), DispatcherError> {
        config.validate()?;
        let seed = rng::init(config.random_seed);
        info!(seed, "random streams initialized");

        let radio_model = create_radio_model(&config.radio_model, RadioModelParams::default())?;

        let (event_tx, event_rx) = unbounded();
        let transport = NodeTransport::start(config.listen_port, event_tx)?;
        info!(addr = %transport.local_addr()?, "coordinator socket bound");

        let pcap = match config.pcap {
            PcapMode::Off => None,
            mode => {
                let path = config.output_dir.join("current.pcap");
                Some(PcapHandle::start(&path, mode)?)
            }
        };

        let (task_tx, task_rx) = unbounded();
        let (go_tx, go_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let pacer = RealTimePacer::new(PacerConfig::with_speed(config.speed), SimTime::ZERO);

        let dispatcher = Dispatcher {
            config,
            cur_time: SimTime::ZERO,
            running: true,
            nodes: HashMap::new(),
            radio_nodes: RadioNodeMap::new(),
            alarm_mgr: AlarmManager::new(),
            send_queue: SendQueue::new(),
            radio_model,
            addrs: AddressMaps::new(),
            alive: HashSet::new(),
            peers: HashMap::new(),
            transport,
            pcap,
            pacer,
            counters: Counters::default(),
            cbs,
            vis,
            event_rx,
            task_rx,
            go_rx,
            stop_rx,
        };
        let handle = DispatcherHandle {
            task_tx,
            go_tx,
            stop_tx,
        };
        Ok((dispatcher, handle))
    }

    // ==================================================================
    // Accessors
    // ==================================================================

    /// Current global virtual time.
    pub fn cur_time(&self) -> SimTime {
        self.cur_time
    }

    /// Cumulative counters.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// A node record.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// A node's radio state.
    pub fn radio_node(&self, id: NodeId) -> Option<&RadioNode> {
        self.radio_nodes.get(&id)
    }

    /// The active radio model.
    pub fn radio_model(&mut self) -> &mut dyn RadioModel {
        self.radio_model.as_mut()
    }

    /// The coordinator's socket address, for launching node processes.
    pub fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    // ==================================================================
    // Run loop
    // ==================================================================

    /// Run until stopped. Consumes go-requests and tasks.
    pub fn run(&mut self) {
        while self.running {
            if self.config.autogo {
                self.poll_control();
                if self.running {
                    self.drive(GoRequest {
                        duration_us: AUTOGO_SLICE_US,
                        done: None,
                    });
                }
                continue;
            }
            crossbeam_channel::select! {
                recv(self.task_rx) -> task => match task {
                    Ok(task) => task(self),
                    Err(_) => break,
                },
                recv(self.go_rx) -> request => match request {
                    Ok(request) => self.drive(request),
                    Err(_) => break,
                },
                recv(self.stop_rx) -> _ => break,
            }
        }
        self.finish();
    }

    fn poll_control(&mut self) {
        while let Ok(task) = self.task_rx.try_recv() {
            task(self);
        }
        while let Ok(request) = self.go_rx.try_recv() {
            self.drive(request);
        }
        if self.stop_rx.try_recv().is_ok() {
            self.running = false;
        }
    }

    /// Drive virtual time forward by one go-request.
    pub fn drive(&mut self, request: GoRequest) {
        let pause_time = self.cur_time.saturating_add_micros(request.duration_us);
        debug!(%pause_time, "drive starting");

        while self.cur_time < pause_time && self.running {
            self.handle_tasks();
            if !self.running {
                break;
            }
            self.recv_events();
            let proceed = self.process_next_event(pause_time);
            if !proceed && self.alive.is_empty() {
                self.jump_to(pause_time);
            }
        }

        self.sync_all_nodes();
        if let Some(done) = request.done {
            let _ = done.send(self.cur_time);
        }
    }

    fn handle_tasks(&mut self) {
        while let Ok(task) = self.task_rx.try_recv() {
            task(self);
        }
        if self.stop_rx.try_recv().is_ok() {
            self.running = false;
        }
    }

    /// Jump idle time up to `pause_time`, respecting pacing.
    fn jump_to(&mut self, pause_time: SimTime) {
        if self.pacer.unpaced() {
            self.advance_time(pause_time);
            return;
        }
        let target = self.pacer.target_sim_time().min(pause_time);
        if target > self.cur_time {
            self.advance_time(target);
        }
        if self.cur_time < pause_time {
            std::thread::sleep(crate::realtime::MAX_SLEEP_SLICE.min(Duration::from_millis(2)));
        }
    }

    /// Drain node events. Blocks while any node still owes a response,
    /// bounded by the safety timeout.
    fn recv_events(&mut self) {
        while let Ok(msg) = self.event_rx.try_recv() {
            self.handle_reader_msg(msg);
        }
        while !self.alive.is_empty() {
            match self.event_rx.recv_timeout(NODE_RECV_TIMEOUT) {
                Ok(msg) => self.handle_reader_msg(msg),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    self.sync_alive_nodes();
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    self.alive.clear();
                }
            }
        }
    }

    /// Force-advance nodes that missed the response deadline.
    fn sync_alive_nodes(&mut self) {
        let stuck: Vec<NodeId> = self.alive.drain().collect();
        for id in stuck {
            warn!(node = id, "no response within {:?}, force-advancing", NODE_RECV_TIMEOUT);
            self.counters.node_recv_timeouts += 1;
        }
    }

    /// Send every node an alarm at the current instant so per-node clocks
    /// align with the global one.
    fn sync_all_nodes(&mut self) {
        let mut behind: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.cur_time < self.cur_time)
            .map(|(&id, _)| id)
            .collect();
        // Stable order: the failure controllers draw from a shared stream,
        // so iteration order is part of the reproducible behavior.
        behind.sort_unstable();
        for id in behind {
            self.send_node_event(id, Event::alarm(id, self.cur_time));
        }
        self.recv_events();
    }

    // ==================================================================
    // Event receipt (node → dispatcher)
    // ==================================================================

    fn handle_reader_msg(&mut self, msg: ReaderMsg) {
        match msg {
            ReaderMsg::ParseError(peer) => {
                self.counters.recv_parse_errors += 1;
                metrics::counter!(md::RECV_ERRORS.name, "kind" => "parse").increment(1);
                debug!(%peer, "undecodable datagram");
            }
            ReaderMsg::Event(peer, event) => {
                self.counters.events_received += 1;
                if event.event_type == EventType::NodeInfo {
                    self.register_peer(peer, event.node_info_id());
                    return;
                }
                let Some(&id) = self.peers.get(&peer) else {
                    self.counters.unknown_peer_events += 1;
                    metrics::counter!(md::RECV_ERRORS.name, "kind" => "unknown_peer").increment(1);
                    debug!(%peer, "event from unregistered peer");
                    return;
                };
                self.handle_recv_event(id, event);
            }
        }
    }

    fn register_peer(&mut self, peer: SocketAddr, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            self.counters.unknown_peer_events += 1;
            warn!(%peer, node = id, "node-info for unknown node");
            return;
        };
        debug!(%peer, node = id, "node process registered");
        node.peer = Some(peer);
        self.peers.insert(peer, id);
    }

    /// Process one event received from node `id`.
    pub fn handle_recv_event(&mut self, id: NodeId, mut event: Event) {
        let Some(node) = self.nodes.get_mut(&id) else {
            self.counters.unknown_peer_events += 1;
            debug!(node = id, "event from deleted node");
            return;
        };
        let node_time = node.cur_time;
        event.node_id = id;
        event.timestamp = if event.delay >= DELAY_FOREVER_THRESHOLD {
            SimTime::EVER
        } else {
            node_time.saturating_add_micros(event.delay)
        };

        // Per-type delay invariants, and monotonicity against the global
        // clock. Only uart writes and status pushes may arrive "late".
        match event.event_type {
            EventType::AlarmFired => {
                assert!(event.delay > 0, "zero-delay alarm from node {id}");
            }
            EventType::StatusPush | EventType::UartWrite => {
                assert!(
                    event.delay == 0,
                    "delayed status/uart event from node {id}"
                );
            }
            _ => {}
        }
        if !matches!(
            event.event_type,
            EventType::StatusPush | EventType::UartWrite
        ) {
            assert!(
                event.timestamp >= self.cur_time,
                "event from node {id} is in the dispatcher's past"
            );
        }

        match event.event_type {
            EventType::AlarmFired => {
                // The node finished its slice and reported its next wake.
                self.alive.remove(&id);
                self.alarm_mgr.set_timestamp(id, event.timestamp);
            }
            EventType::StatusPush => self.handle_status_push(id, &event),
            EventType::UartWrite => self.cbs.on_uart_write(id, &event.payload),
            EventType::NodeInfo => {}
            EventType::RadioLog => match event.text() {
                Ok(line) => debug!(node = id, "radio: {}", line.trim_end()),
                Err(_) => self.counters.recv_parse_errors += 1,
            },
            EventType::RadioRfSimParamRsp => self.cbs.on_rfsim_event(id, &event),
            _ => {
                // The radio family: queue for the model at its instant.
                self.send_queue.add(event);
            }
        }
    }

    fn handle_status_push(&mut self, id: NodeId, event: &Event) {
        let text = match event.text() {
            Ok(text) => text.to_string(),
            Err(e) => {
                warn!(node = id, "status push not UTF-8: {e}");
                self.counters.status_push_errors += 1;
                return;
            }
        };
        let items = match otsim_event::status::parse(&text) {
            Ok(items) => items,
            Err(e) => {
                warn!(node = id, "malformed status push: {e}");
                self.counters.status_push_errors += 1;
                return;
            }
        };
        for item in items {
            self.apply_status_item(id, item);
        }
    }

    fn apply_status_item(&mut self, id: NodeId, item: StatusItem) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        match item {
            StatusItem::Role(role) => {
                node.role = role;
                self.vis.set_node_role(id, role);
            }
            StatusItem::Rloc16(rloc16) => {
                let old = node.rloc16;
                if old == rloc16 {
                    return;
                }
                node.rloc16 = rloc16;
                if old != INVALID_RLOC16 {
                    self.addrs.remove_rloc16(id, old);
                }
                if rloc16 != INVALID_RLOC16 && rloc16 != BROADCAST_RLOC16 {
                    self.addrs.add_rloc16(id, rloc16);
                }
                self.vis.set_node_rloc16(id, rloc16);
            }
            StatusItem::PartitionId(partition_id) => {
                node.partition_id = partition_id;
                self.vis.set_node_partition_id(id, partition_id);
            }
            StatusItem::ExtAddr(ext_addr) => {
                let old = node.ext_addr;
                if old == ext_addr {
                    return;
                }
                node.ext_addr = ext_addr;
                self.addrs.set_ext_addr(id, old, ext_addr);
                self.vis.on_ext_addr_change(id, ext_addr);
            }
            StatusItem::Mode(mode) => node.mode = mode,
            StatusItem::PingRequest {
                dst,
                data_size,
                timestamp_ms,
            } => node.on_ping_request(timestamp_ms * 1000, &dst, data_size),
            StatusItem::PingReply {
                dst,
                data_size: _,
                timestamp_ms,
                hop_limit: _,
            } => {
                let now = self.cur_time;
                let expired = node.expire_pings(now);
                if let Some(delay_us) = node.on_ping_reply(now, timestamp_ms * 1000, &dst) {
                    metrics::histogram!(md::PING_DELAY.name).record(delay_us as f64);
                }
                self.counters.ping_timeouts += expired as u64;
                if expired > 0 {
                    metrics::counter!(md::PING_TIMEOUTS.name).increment(expired as u64);
                }
            }
            StatusItem::Coap(status) => node.on_coap(status),
            StatusItem::RouterAdded(addr) => self.vis.add_router_table(id, addr),
            StatusItem::RouterRemoved(addr) => self.vis.remove_router_table(id, addr),
            StatusItem::ChildAdded(addr) => self.vis.add_child_table(id, addr),
            StatusItem::ChildRemoved(addr) => self.vis.remove_child_table(id, addr),
            StatusItem::Parent(addr) => self.vis.set_parent(id, addr),
            StatusItem::Joiner(state) => {
                let now = self.cur_time;
                node.on_joiner_state(now, state);
            }
            StatusItem::Transmit {
                channel,
                dst_rloc16,
            } => {
                let dst = dst_rloc16
                    .filter(|&r| r != BROADCAST_RLOC16)
                    .and_then(|r| self.addrs.nodes_by_rloc16(r).first().copied());
                self.vis.send(id, dst, channel);
            }
            StatusItem::Unknown { key, value } => {
                self.counters.status_push_unknown += 1;
                debug!(node = id, key, value, "unknown status push key");
            }
        }
    }

    // ==================================================================
    // Event processing (dispatcher → nodes)
    // ==================================================================

    /// Process the earliest pending instant, if it lies within the pause
    /// time. Returns `false` when nothing can be processed yet.
    pub fn process_next_event(&mut self, pause_time: SimTime) -> bool {
        let next_alarm = self.alarm_mgr.next_timestamp();
        let next_send = self.send_queue.next_timestamp();
        let next = next_alarm.min(next_send);

        if !next.is_ever() {
            self.radio_model.on_next_event_time(next);
            self.cbs.on_next_event_time(next);
        }

        // Pace against the wall clock in bounded slices, staying
        // responsive between them.
        if !self.pacer.unpaced() {
            let due = next.min(pause_time);
            if let Some(slice) = self.pacer.sleep_slice(due) {
                std::thread::sleep(slice);
                return true;
            }
            if let Some(lag) = self.pacer.check_lag_warning(self.cur_time) {
                warn!(?lag, "simulation lagging behind wall clock");
            }
        }

        if next.is_ever() || next > pause_time {
            return false;
        }

        self.advance_time(next);
        self.counters.events_processed += 1;
        metrics::counter!(md::EVENTS_PROCESSED.name).increment(1);

        if next_alarm <= next_send {
            // Alarms win ties; the queued event stays for the next
            // iteration at the same instant.
            let (id, ts) = self
                .alarm_mgr
                .next_alarm()
                .expect("alarm timestamp was below ever");
            self.counters.alarms_sent += 1;
            self.send_node_event(id, Event::alarm(id, ts));
        } else {
            let event = self.send_queue.pop_next().expect("send queue was non-empty");
            debug_assert_eq!(event.timestamp, next);
            self.dispatch_queued_event(event);
        }
        true
    }

    /// Advance the global clock. Time never moves backwards.
    fn advance_time(&mut self, ts: SimTime) {
        assert!(ts >= self.cur_time, "time went backwards");
        if ts == self.cur_time {
            return;
        }
        self.cur_time = ts;
        metrics::gauge!(md::SIM_TIME.name).set(ts.as_micros() as f64);
        self.vis.advance_time(ts, self.pacer.speed());
        if let Some(stats) = self
            .pacer
            .check_periodic_stats(ts, self.counters.events_processed)
        {
            info!(
                sim_time = %stats.sim_time,
                ratio = format!("{:.2}x", stats.sim_to_realtime_ratio),
                events = stats.total_events,
                rate = format!("{:.0}/s", stats.event_rate),
                mem_mb = stats.memory_bytes / (1024 * 1024),
                "progress"
            );
        }
    }

    fn dispatch_queued_event(&mut self, event: Event) {
        if event.must_dispatch {
            match event.event_type {
                EventType::RadioTxDone => self.send_node_event(event.node_id, event),
                EventType::RadioChannelSample => {
                    let Some(radio) = self.radio_nodes.get(&event.node_id).cloned() else {
                        return;
                    };
                    let mut event = event;
                    if self.radio_model.on_event_dispatch(&radio, &radio, &mut event) {
                        self.send_node_event(radio.id, event);
                    }
                }
                EventType::RadioFrameToNode
                | EventType::RadioCommStart
                | EventType::RadioRxDone => self.dispatch_frame(event),
                other => warn!(event_type = ?other, "unroutable dispatch event"),
            }
            return;
        }

        if event.event_type == EventType::AlarmFired {
            // A failure wake scheduled by a node's failure controller.
            if self.nodes.contains_key(&event.node_id) {
                self.send_node_event(event.node_id, Event::alarm(event.node_id, event.timestamp));
            }
            return;
        }

        self.radio_model
            .handle_event(&mut self.radio_nodes, &mut self.send_queue, &event);
    }

    /// Route a frame-carrying event to its destination set.
    fn dispatch_frame(&mut self, event: Event) {
        let src_id = event.node_id;
        if self.nodes.get(&src_id).map_or(true, |n| n.is_failed()) {
            self.counters.frames_dropped_failed_node += 1;
            metrics::counter!(md::FRAMES_DROPPED.name, "reason" => "node_failed").increment(1);
            return;
        }

        let comm = event.radio_comm_data();
        // Capture at transmit time. The interference model dispatches each
        // frame twice (carrier notify at start, delivery at end); only the
        // start marks a transmission, so the end-of-air delivery is skipped
        // to keep one pcap record and one visualizer arrow per frame.
        let transmit_instant = event.event_type != EventType::RadioRxDone;
        if transmit_instant {
            if let Some(pcap) = &self.pcap {
                pcap.capture(CapturedFrame {
                    timestamp: event.timestamp,
                    channel: comm.channel,
                    rssi_dbm: comm.power_dbm,
                    psdu: event.psdu().to_vec(),
                });
            }
        }

        let frame = match ParsedFrame::parse(event.psdu()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(node = src_id, "undecodable PSDU: {e}");
                self.counters.frames_undecodable += 1;
                metrics::counter!(md::FRAMES_DROPPED.name, "reason" => "undecodable").increment(1);
                return;
            }
        };

        match frame.dst {
            FrameDst::Extended(addr) => {
                let dst = self.addrs.node_by_ext_addr(ExtAddr(addr));
                if transmit_instant {
                    self.vis.send(src_id, dst, comm.channel);
                }
                let delivered =
                    dst.is_some_and(|dst_id| self.try_deliver_frame(&event, src_id, dst_id));
                if delivered {
                    self.counters.dispatch_by_ext_addr_succ += 1;
                    metrics::counter!(md::FRAMES_DISPATCHED.name, "addressing" => "extended")
                        .increment(1);
                } else {
                    self.counters.dispatch_by_ext_addr_fail += 1;
                }
            }
            FrameDst::Short(rloc16) if rloc16 != BROADCAST_RLOC16 => {
                let dsts = self.addrs.nodes_by_rloc16(rloc16).to_vec();
                if transmit_instant {
                    self.vis.send(src_id, dsts.first().copied(), comm.channel);
                }
                let mut delivered = false;
                for dst_id in dsts {
                    delivered |= self.try_deliver_frame(&event, src_id, dst_id);
                }
                if delivered {
                    self.counters.dispatch_by_short_addr_succ += 1;
                    metrics::counter!(md::FRAMES_DISPATCHED.name, "addressing" => "short")
                        .increment(1);
                } else {
                    self.counters.dispatch_by_short_addr_fail += 1;
                }
            }
            _ => {
                // Broadcast, or no destination addressing at all.
                self.counters.dispatch_all_in_range += 1;
                metrics::counter!(md::FRAMES_DISPATCHED.name, "addressing" => "broadcast")
                    .increment(1);
                if transmit_instant {
                    self.vis.send(src_id, None, comm.channel);
                }
                let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
                ids.sort_unstable();
                for dst_id in ids {
                    self.try_deliver_frame(&event, src_id, dst_id);
                }
            }
        }
    }

    /// Deliver one frame copy to one destination, applying reachability,
    /// packet loss, and the radio model's dispatch hook.
    fn try_deliver_frame(&mut self, event: &Event, src_id: NodeId, dst_id: NodeId) -> bool {
        if dst_id == src_id {
            return false;
        }
        let Some(dst_node) = self.nodes.get(&dst_id) else {
            return false;
        };
        if dst_node.is_failed() {
            self.counters.frames_dropped_failed_node += 1;
            metrics::counter!(md::FRAMES_DROPPED.name, "reason" => "node_failed").increment(1);
            return false;
        }
        let (Some(src_radio), Some(dst_radio)) =
            (self.radio_nodes.get(&src_id), self.radio_nodes.get(&dst_id))
        else {
            return false;
        };
        if src_radio.position.distance(&dst_radio.position) > src_radio.radio_range as f64 {
            return false;
        }
        if !self.radio_model.check_radio_reachable(src_radio, dst_radio) {
            return false;
        }

        let plr = self.config.packet_loss_ratio;
        if plr > 0.0 {
            let success = (1.0 - plr).powf(event.psdu().len() as f64 / 128.0);
            if rng::unit() > success {
                self.counters.frames_dropped_packet_loss += 1;
                metrics::counter!(md::FRAMES_DROPPED.name, "reason" => "packet_loss").increment(1);
                return false;
            }
        }

        let mut copy = event.clone();
        if !self.radio_model.on_event_dispatch(src_radio, dst_radio, &mut copy) {
            return false;
        }
        self.send_node_event(dst_id, copy);
        true
    }

    /// Send an event to a node process, advancing the node's clock.
    pub fn send_node_event(&mut self, dst_id: NodeId, mut event: Event) {
        let Some(node) = self.nodes.get_mut(&dst_id) else {
            debug!(node = dst_id, "dropping event for deleted node");
            return;
        };
        debug_assert!(
            event.timestamp >= node.cur_time,
            "event for node {dst_id} is in its past"
        );
        event.node_id = dst_id;
        event.msg_id = node.next_msg_id();
        event.delay = event.timestamp.delay_since(node.cur_time);
        let advanced = event.timestamp > node.cur_time;
        node.cur_time = event.timestamp;
        let peer = node.peer;

        self.alarm_mgr.set_notified(dst_id);

        if let Some(peer) = peer {
            // A process is attached: it now owes a response before time may
            // pass this instant.
            self.alive.insert(dst_id);
            let bytes = event.serialize();
            if let Err(e) = self.transport.send_to(peer, &bytes) {
                warn!(node = dst_id, "socket write failed: {e}");
                self.counters.node_io_errors += 1;
                self.alive.remove(&dst_id);
                if let Some(node) = self.nodes.get_mut(&dst_id) {
                    node.last_error = Some(e.to_string());
                }
            }
        }

        if advanced {
            self.tick_failure(dst_id, event.timestamp);
        }
    }

    /// Run a node's failure controller at `now` and apply the outcome.
    fn tick_failure(&mut self, id: NodeId, now: SimTime) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let (transition, wake) = node.failure_ctrl.on_time_advanced(now);
        let schedule = !wake.is_ever() && node.needs_failure_wake(wake);
        self.apply_failure_transition(id, transition);
        if schedule {
            self.send_queue.add(Event::alarm(id, wake));
        }
    }

    fn apply_failure_transition(&mut self, id: NodeId, transition: FailureTransition) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        match transition {
            FailureTransition::None => {}
            FailureTransition::Failed => {
                if node.fail() {
                    info!(node = id, "node failed");
                    metrics::counter!(md::NODE_FAILURES.name, &otsim_metrics::node_label(id))
                        .increment(1);
                    self.cbs.on_node_fail(id);
                }
            }
            FailureTransition::Recovered => {
                if node.recover() {
                    info!(node = id, "node recovered");
                    metrics::counter!(md::NODE_RECOVERIES.name, &otsim_metrics::node_label(id))
                        .increment(1);
                    self.cbs.on_node_recover(id);
                }
            }
        }
    }

    // ==================================================================
    // Node lifecycle & external operations
    // ==================================================================

    /// Create a node. Returns its id.
    pub fn add_node(&mut self, config: &NodeConfig) -> Result<NodeId, DispatcherError> {
        config.validate()?;
        let id = match config.id {
            Some(id) => {
                if self.nodes.contains_key(&id) {
                    return Err(DispatcherError::NodeExists(id));
                }
                id
            }
            None => self.nodes.keys().max().map_or(1, |&max| max + 1),
        };
        let seed = rng::next_node_seed();
        let radio_range = config.radio_range.unwrap_or(self.config.radio_range);

        self.nodes
            .insert(id, Node::new(id, seed, self.cur_time, config.fail_time));
        let radio = RadioNode::new(
            id,
            Position {
                x: config.x,
                y: config.y,
                z: config.z,
            },
            radio_range,
        );
        self.radio_model.add_node(&radio);
        self.radio_nodes.insert(id, radio);
        self.alarm_mgr.add(id);
        self.vis.add_node(id, config.x, config.y, radio_range);
        metrics::gauge!(md::NODES.name).set(self.nodes.len() as f64);
        info!(node = id, seed, x = config.x, y = config.y, "node created");
        Ok(id)
    }

    /// Delete a node. No further events reach it.
    pub fn delete_node(&mut self, id: NodeId) -> Result<(), DispatcherError> {
        let node = self.nodes.remove(&id).ok_or(DispatcherError::NodeNotFound(id))?;
        if let Some(peer) = node.peer {
            self.peers.remove(&peer);
        }
        self.radio_nodes.remove(&id);
        self.radio_model.delete_node(id);
        self.alarm_mgr.delete(id);
        self.addrs.remove_node(id);
        self.alive.remove(&id);
        self.vis.delete_node(id);
        metrics::gauge!(md::NODES.name).set(self.nodes.len() as f64);
        info!(node = id, "node deleted");
        Ok(())
    }

    /// Move a node.
    pub fn set_node_position(
        &mut self,
        id: NodeId,
        x: f64,
        y: f64,
        z: f64,
    ) -> Result<(), DispatcherError> {
        let radio = self
            .radio_nodes
            .get_mut(&id)
            .ok_or(DispatcherError::NodeNotFound(id))?;
        radio.position = Position { x, y, z };
        self.vis.set_node_pos(id, x, y);
        Ok(())
    }

    /// Reconfigure a node's induced failures.
    pub fn set_node_fail_time(&mut self, id: NodeId, fail_time: FailTime) -> Result<(), DispatcherError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(DispatcherError::NodeNotFound(id))?;
        let transition = node.failure_ctrl.set_fail_time(fail_time);
        self.apply_failure_transition(id, transition);
        Ok(())
    }

    /// Set the global packet loss ratio.
    pub fn set_packet_loss_ratio(&mut self, ratio: f64) {
        self.config.packet_loss_ratio = ratio.clamp(0.0, 1.0);
    }

    /// Change simulation speed.
    pub fn set_speed(&mut self, speed: f64) {
        self.pacer.set_speed(speed, self.cur_time);
        self.vis.set_speed(speed);
    }

    /// Push a radio-simulation parameter to a node.
    pub fn set_rfsim_param(
        &mut self,
        id: NodeId,
        param: RfSimParam,
        value: i32,
    ) -> Result<(), DispatcherError> {
        if !self.nodes.contains_key(&id) {
            return Err(DispatcherError::NodeNotFound(id));
        }
        let mut event = Event::rfsim_param(
            EventType::RadioRfSimParamSet,
            id,
            RfSimParamData { param, value },
        );
        event.timestamp = self.cur_time;
        self.send_node_event(id, event);
        Ok(())
    }

    /// Ask a node for a radio-simulation parameter; the answer arrives via
    /// [`CallbackHandler::on_rfsim_event`].
    pub fn get_rfsim_param(&mut self, id: NodeId, param: RfSimParam) -> Result<(), DispatcherError> {
        if !self.nodes.contains_key(&id) {
            return Err(DispatcherError::NodeNotFound(id));
        }
        let mut event = Event::rfsim_param(
            EventType::RadioRfSimParamGet,
            id,
            RfSimParamData { param, value: 0 },
        );
        event.timestamp = self.cur_time;
        self.send_node_event(id, event);
        Ok(())
    }

    fn finish(&mut self) {
        // Run anything still queued so posted state mutations are not lost.
        while let Ok(task) = self.task_rx.try_recv() {
            task(self);
        }
        if let Some(pcap) = self.pcap.take() {
            let frames = pcap.close();
            info!(frames, "pcap closed");
        }
        let stats = self.pacer.stats();
        info!(
            sim_time = %self.cur_time,
            events = self.counters.events_processed,
            wall = ?stats.elapsed_wall,
            "dispatcher finished"
        );
    }
}

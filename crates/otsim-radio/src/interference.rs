//! The mutual-interference radio engine.
//!
//! Tracks every concurrent transmitter and energy-scan sampler per channel.
//! Overlapping transmissions on a channel mark each other as interferers;
//! at delivery time the interferer powers are summed at the destination,
//! the SIR drives a per-bit error model, and frames that lose the roll are
//! delivered with a corrupted FCS. A node that transmits while a frame
//! arrives sees the reception aborted instead.

use std::collections::{HashMap, HashSet};

use otsim_common::{rng, NodeId, SimTime};
use otsim_event::{Event, EventType, RadioError, RadioState};
use otsim_mac::garble_fcs;
use tracing::{trace, warn};

use crate::model::{EventQueue, RadioModel, RadioNodeMap};
use crate::propagation::{dbm_sum, Propagation};
use crate::stats::ChannelStatsTracker;
use crate::{packet_success_probability, ChannelStats, RadioModelParams, RadioNode};

/// One in-flight transmission.
#[derive(Debug, Clone)]
struct Transmission {
    /// Channel the transmission started on; stays the registration key even
    /// if the node hops channels mid-air.
    channel: u8,
    /// The node changed channels before the transmission finished; every
    /// listener gets the frame with an FCS error.
    channel_changed: bool,
    /// The original frame event, re-emitted as the delivery at end of air
    /// time.
    frame: Event,
}

/// One in-flight energy scan.
#[derive(Debug, Clone, Copy)]
struct Sampler {
    channel: u8,
    /// Running maximum of summed transmitter power seen during the window,
    /// dBm.
    max_dbm: f64,
}

/// Radio model with per-channel contention and SIR-driven corruption.
pub struct InterferenceModel {
    propagation: Propagation,
    stats: ChannelStatsTracker,
    /// Per channel: the nodes currently on the air.
    active_transmitters: HashMap<u8, HashSet<NodeId>>,
    /// Per transmitting node: its in-flight transmission.
    transmissions: HashMap<NodeId, Transmission>,
    /// Per transmitting node: radio-state snapshots of every transmitter
    /// that overlapped it in time on the same channel.
    interfered_by: HashMap<NodeId, HashMap<NodeId, RadioNode>>,
    /// Per sampling node: its in-flight energy scan.
    samplers: HashMap<NodeId, Sampler>,
    /// Per channel: the nodes currently sampling.
    active_samplers: HashMap<u8, HashSet<NodeId>>,
}

impl InterferenceModel {
    /// Create the model.
    pub fn new(params: RadioModelParams) -> Self {
        InterferenceModel {
            propagation: Propagation::new(params),
            stats: ChannelStatsTracker::default(),
            active_transmitters: HashMap::new(),
            transmissions: HashMap::new(),
            interfered_by: HashMap::new(),
            samplers: HashMap::new(),
            active_samplers: HashMap::new(),
        }
    }

    /// Nodes currently transmitting on `channel`. Exposed for tests and
    /// embedder introspection.
    pub fn active_transmitters(&self, channel: u8) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .active_transmitters
            .get(&channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn tx_start(&mut self, nodes: &mut RadioNodeMap, queue: &mut dyn EventQueue, event: &Event) {
        let id = event.node_id;
        let comm = event.radio_comm_data();

        let busy = self.transmissions.contains_key(&id)
            || self
                .samplers
                .get(&id)
                .is_some_and(|s| s.channel == comm.channel);
        if busy {
            // The radio is already committed; refuse the transmission.
            let mut abort = Event::tx_done(id, comm, RadioError::Abort);
            abort.timestamp = event.timestamp;
            abort.must_dispatch = true;
            queue.add(abort);
            return;
        }

        let Some(tx_node) = nodes.get(&id).cloned() else {
            warn!(node = id, "tx start from unknown radio node");
            return;
        };

        self.stats.record_tx(comm.channel, comm.duration_us);

        // Every transmitter already on this channel overlaps the new one in
        // time: mark the interference both ways, with state snapshots taken
        // at overlap start.
        let peers = self.active_transmitters.entry(comm.channel).or_default();
        let mut mine: HashMap<NodeId, RadioNode> = HashMap::new();
        for &peer in peers.iter() {
            if let Some(peer_node) = nodes.get(&peer) {
                mine.insert(peer, peer_node.clone());
            }
            self.interfered_by
                .entry(peer)
                .or_default()
                .insert(id, tx_node.clone());
        }
        peers.insert(id);
        self.interfered_by.insert(id, mine);

        self.transmissions.insert(
            id,
            Transmission {
                channel: comm.channel,
                channel_changed: false,
                frame: event.clone(),
            },
        );

        // Fold the new carrier into every running energy scan on the channel.
        let mut sampler_ids: Vec<NodeId> = self
            .active_samplers
            .get(&comm.channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        sampler_ids.sort_unstable();
        for sampler_id in sampler_ids {
            let Some(sampler_node) = nodes.get(&sampler_id) else {
                continue;
            };
            let heard = self.propagation.rssi(&tx_node, sampler_node);
            if let Some(sampler) = self.samplers.get_mut(&sampler_id) {
                sampler.max_dbm = dbm_sum(sampler.max_dbm, heard);
                if let Some(sampler_node) = nodes.get_mut(&sampler_id) {
                    sampler_node.rssi_sample_max = sampler.max_dbm;
                }
            }
        }

        if let Some(node) = nodes.get_mut(&id) {
            node.state = RadioState::Tx;
        }

        // Listeners learn of the carrier now; the frame itself lands at the
        // end of the air time.
        let mut notify = event.clone();
        notify.must_dispatch = true;
        queue.add(notify);

        let mut internal_done = Event::tx_done(id, comm, RadioError::None);
        internal_done.timestamp = event.timestamp.saturating_add_micros(comm.duration_us);
        queue.add(internal_done);
    }

    fn tx_done(&mut self, nodes: &mut RadioNodeMap, queue: &mut dyn EventQueue, event: &Event) {
        let id = event.node_id;
        let Some(tx) = self.transmissions.remove(&id) else {
            warn!(node = id, "tx done without a matching transmission");
            return;
        };
        // Unregister from the start channel; a mid-air channel change never
        // re-registered the node, so this also covers the hop case.
        if let Some(set) = self.active_transmitters.get_mut(&tx.channel) {
            set.remove(&id);
        }
        if let Some(node) = nodes.get_mut(&id) {
            node.state = RadioState::Rx;
        }

        let comm = tx.frame.radio_comm_data();
        let mut done = Event::tx_done(id, comm, RadioError::None);
        done.timestamp = event.timestamp;
        done.must_dispatch = true;
        queue.add(done);

        let mut delivery = tx.frame;
        delivery.event_type = EventType::RadioRxDone;
        delivery.timestamp = event.timestamp;
        delivery.must_dispatch = true;
        if tx.channel_changed {
            let mut c = delivery.radio_comm_data();
            c.error = RadioError::Fcs;
            delivery.set_radio_comm_data(c);
        }
        queue.add(delivery);
    }

    fn sample_start(&mut self, nodes: &mut RadioNodeMap, queue: &mut dyn EventQueue, event: &Event) {
        let id = event.node_id;
        let comm = event.radio_comm_data();
        if self.samplers.contains_key(&id) {
            warn!(node = id, "channel sample requested while one is running");
            return;
        }

        // The scan starts out hearing the noise floor plus every carrier
        // already on the channel.
        let mut max_dbm = self.propagation.params().noise_floor_dbm;
        let mut transmitter_ids: Vec<NodeId> = self
            .active_transmitters
            .get(&comm.channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        transmitter_ids.sort_unstable();
        if let Some(sampler_node) = nodes.get(&id).cloned() {
            for tx_id in transmitter_ids {
                if tx_id == id {
                    continue;
                }
                if let Some(tx_node) = nodes.get(&tx_id) {
                    max_dbm = dbm_sum(max_dbm, self.propagation.rssi(tx_node, &sampler_node));
                }
            }
        }

        self.samplers.insert(
            id,
            Sampler {
                channel: comm.channel,
                max_dbm,
            },
        );
        self.active_samplers.entry(comm.channel).or_default().insert(id);
        if let Some(node) = nodes.get_mut(&id) {
            node.rssi_sample_max = max_dbm;
        }

        let mut reply = Event::channel_sample(id, comm);
        reply.timestamp = event.timestamp.saturating_add_micros(comm.duration_us);
        reply.must_dispatch = true;
        queue.add(reply);
    }

    fn radio_state(&mut self, nodes: &mut RadioNodeMap, event: &Event) {
        let id = event.node_id;
        let data = event.radio_state_data();
        if let Some(tx) = self.transmissions.get_mut(&id) {
            if data.channel != tx.channel && !tx.channel_changed {
                trace!(node = id, from = tx.channel, to = data.channel,
                    "channel changed mid-transmission");
                tx.channel_changed = true;
            }
        }
        if let Some(node) = nodes.get_mut(&id) {
            node.apply_state(&data);
        }
    }

    /// Interference-plus-noise power at `dst` from everything that
    /// overlapped `src`'s transmission, dBm.
    fn interference_at(&mut self, src: NodeId, dst: &RadioNode) -> f64 {
        let mut total = self.propagation.params().noise_floor_dbm;
        let mut interferers: Vec<RadioNode> = self
            .interfered_by
            .get(&src)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        interferers.sort_unstable_by_key(|n| n.id);
        for interferer in &interferers {
            if interferer.id == dst.id {
                continue;
            }
            total = dbm_sum(total, self.propagation.rssi(interferer, dst));
        }
        total
    }

    fn dispatch_rx_done(&mut self, src: &RadioNode, dst: &RadioNode, event: &mut Event) -> bool {
        let rssi = self.get_tx_rssi(src, dst);
        if !self.check_radio_reachable(src, dst) {
            return false;
        }
        let mut comm = event.radio_comm_data();
        comm.power_dbm = rssi.round().clamp(i8::MIN as f64, i8::MAX as f64) as i8;

        if self.transmissions.contains_key(&dst.id) {
            // The destination radio was busy transmitting over the frame.
            comm.error = RadioError::Abort;
        } else if comm.error == RadioError::None {
            let sinr_db = rssi - self.interference_at(src.id, dst);
            let nbits = event.psdu().len() * 8;
            let psuc = packet_success_probability(sinr_db, nbits);
            if rng::unit() > psuc {
                garble_fcs(event.psdu_mut());
                comm.error = RadioError::Fcs;
                trace!(src = src.id, dst = dst.id, sinr_db, "frame corrupted by interference");
            }
        }
        event.set_radio_comm_data(comm);
        true
    }

    fn dispatch_sample_reply(&mut self, dst: &RadioNode, event: &mut Event) -> bool {
        let Some(sampler) = self.samplers.remove(&dst.id) else {
            warn!(node = dst.id, "sample reply for an unregistered sampler");
            return false;
        };
        if let Some(set) = self.active_samplers.get_mut(&sampler.channel) {
            set.remove(&dst.id);
        }
        let mut comm = event.radio_comm_data();
        comm.power_dbm = sampler
            .max_dbm
            .round()
            .clamp(i8::MIN as f64, i8::MAX as f64) as i8;
        event.set_radio_comm_data(comm);
        true
    }
}

impl RadioModel for InterferenceModel {
    fn model_name(&self) -> &'static str {
        "MutualInterference"
    }

    fn add_node(&mut self, _node: &RadioNode) {}

    fn delete_node(&mut self, id: NodeId) {
        self.transmissions.remove(&id);
        self.samplers.remove(&id);
        self.interfered_by.remove(&id);
        for set in self.active_transmitters.values_mut() {
            set.remove(&id);
        }
        for set in self.active_samplers.values_mut() {
            set.remove(&id);
        }
        for map in self.interfered_by.values_mut() {
            map.remove(&id);
        }
    }

    fn handle_event(&mut self, nodes: &mut RadioNodeMap, queue: &mut dyn EventQueue, event: &Event) {
        match event.event_type {
            EventType::RadioCommStart | EventType::RadioFrameToSim => {
                self.tx_start(nodes, queue, event)
            }
            EventType::RadioTxDone => self.tx_done(nodes, queue, event),
            EventType::RadioChannelSample => self.sample_start(nodes, queue, event),
            EventType::RadioState => self.radio_state(nodes, event),
            other => trace!(event_type = ?other, "interference model ignoring event"),
        }
    }

    fn on_event_dispatch(&mut self, src: &RadioNode, dst: &RadioNode, event: &mut Event) -> bool {
        match event.event_type {
            EventType::RadioRxDone => self.dispatch_rx_done(src, dst, event),
            EventType::RadioCommStart => {
                let rssi = self.get_tx_rssi(src, dst);
                if !self.check_radio_reachable(src, dst) {
                    return false;
                }
                let mut comm = event.radio_comm_data();
                comm.power_dbm = rssi.round().clamp(i8::MIN as f64, i8::MAX as f64) as i8;
                event.set_radio_comm_data(comm);
                true
            }
            EventType::RadioChannelSample => self.dispatch_sample_reply(dst, event),
            _ => true,
        }
    }

    fn get_tx_rssi(&mut self, src: &RadioNode, dst: &RadioNode) -> f64 {
        self.propagation.rssi(src, dst)
    }

    fn check_radio_reachable(&mut self, src: &RadioNode, dst: &RadioNode) -> bool {
        self.propagation.link_reachable(src, dst)
    }

    fn parameters(&self) -> &RadioModelParams {
        self.propagation.params()
    }

    fn parameters_mut(&mut self) -> &mut RadioModelParams {
        self.propagation.params_mut()
    }

    fn on_parameters_modified(&mut self) {
        self.propagation.clear_caches();
    }

    fn channel_stats(&self, channel: u8, now: SimTime) -> ChannelStats {
        self.stats.get(channel, now)
    }

    fn reset_channel_stats(&mut self, channel: u8, now: SimTime) {
        self.stats.reset(channel, now);
    }

    fn on_next_event_time(&mut self, ts: SimTime) {
        self.propagation.advance_time(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::VecQueue;
    use crate::Position;
    use otsim_event::RadioCommData;

    fn model() -> InterferenceModel {
        otsim_common::rng::init(42);
        InterferenceModel::new(RadioModelParams::without_fading())
    }

    fn nodes_at(positions: &[(f64, f64)]) -> RadioNodeMap {
        positions
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let id = i as NodeId + 1;
                (id, RadioNode::new(id, Position::new(x, y), 220))
            })
            .collect()
    }

    fn comm_start(node_id: NodeId, channel: u8, duration_us: u64, at: SimTime) -> Event {
        let comm = RadioCommData {
            channel,
            power_dbm: 0,
            error: RadioError::None,
            duration_us,
        };
        // A realistic short data frame with room for an FCS.
        let mut event = Event::radio_frame(
            EventType::RadioCommStart,
            node_id,
            comm,
            &[0x61, 0x88, 0x5a, 0xce, 0xfa, 0xff, 0xff, 0x00, 0xc4, 0xAA, 0xBB],
        );
        event.timestamp = at;
        event
    }

    #[test]
    fn tx_start_notifies_and_schedules_internal_done() {
        let mut m = model();
        let mut nodes = nodes_at(&[(0.0, 0.0), (50.0, 0.0)]);
        let mut q = VecQueue::default();

        let start = SimTime::from_millis(3);
        m.handle_event(&mut nodes, &mut q, &comm_start(1, 11, 4_000, start));

        assert_eq!(m.active_transmitters(11), vec![1]);
        assert_eq!(q.0.len(), 2);

        let notify = &q.0[0];
        assert_eq!(notify.event_type, EventType::RadioCommStart);
        assert!(notify.must_dispatch);
        assert_eq!(notify.timestamp, start);

        let internal = &q.0[1];
        assert_eq!(internal.event_type, EventType::RadioTxDone);
        assert!(!internal.must_dispatch);
        assert_eq!(internal.timestamp, start + 4_000);
    }

    #[test]
    fn tx_while_tx_aborts_immediately() {
        let mut m = model();
        let mut nodes = nodes_at(&[(0.0, 0.0)]);
        let mut q = VecQueue::default();

        m.handle_event(&mut nodes, &mut q, &comm_start(1, 11, 4_000, SimTime::ZERO));
        q.0.clear();
        m.handle_event(&mut nodes, &mut q, &comm_start(1, 11, 4_000, SimTime::from_micros(10)));

        assert_eq!(q.0.len(), 1);
        let abort = &q.0[0];
        assert_eq!(abort.event_type, EventType::RadioTxDone);
        assert!(abort.must_dispatch);
        assert_eq!(abort.radio_comm_data().error, RadioError::Abort);
        // The original transmission is still the registered one.
        assert_eq!(m.active_transmitters(11), vec![1]);
    }

    #[test]
    fn tx_done_emits_ok_and_delivery() {
        let mut m = model();
        let mut nodes = nodes_at(&[(0.0, 0.0), (50.0, 0.0)]);
        let mut q = VecQueue::default();

        m.handle_event(&mut nodes, &mut q, &comm_start(1, 11, 4_000, SimTime::ZERO));
        let internal = q.0.pop().unwrap();
        q.0.clear();
        m.handle_event(&mut nodes, &mut q, &internal);

        assert!(m.active_transmitters(11).is_empty());
        assert_eq!(q.0.len(), 2);
        assert_eq!(q.0[0].event_type, EventType::RadioTxDone);
        assert_eq!(q.0[0].radio_comm_data().error, RadioError::None);
        assert_eq!(q.0[1].event_type, EventType::RadioRxDone);
        assert!(q.0[1].must_dispatch);
    }

    #[test]
    fn overlapping_transmitters_interfere_mutually() {
        let mut m = model();
        // Transmitter far from the listener; the interferer sits right next
        // to the listener, so the SIR is deeply negative and corruption is
        // effectively certain.
        let mut nodes = nodes_at(&[(0.0, 0.0), (290.0, 0.0), (300.0, 0.0)]);
        let mut q = VecQueue::default();

        m.handle_event(&mut nodes, &mut q, &comm_start(1, 11, 4_000, SimTime::ZERO));
        m.handle_event(&mut nodes, &mut q, &comm_start(2, 11, 4_000, SimTime::from_micros(100)));

        assert_eq!(m.active_transmitters(11), vec![1, 2]);
        assert!(m.interfered_by[&1].contains_key(&2));
        assert!(m.interfered_by[&2].contains_key(&1));

        let src = nodes[&1].clone();
        let dst = nodes[&3].clone();
        let mut delivery = comm_start(1, 11, 4_000, SimTime::from_millis(4));
        delivery.event_type = EventType::RadioRxDone;
        let clean_psdu = delivery.psdu().to_vec();
        assert!(m.dispatch_rx_done(&src, &dst, &mut delivery));
        assert_eq!(delivery.radio_comm_data().error, RadioError::Fcs);
        assert_ne!(delivery.psdu(), &clean_psdu[..]);
    }

    #[test]
    fn clean_link_delivers_intact() {
        let mut m = model();
        let nodes = nodes_at(&[(0.0, 0.0), (50.0, 0.0)]);
        let mut q = VecQueue::default();
        let mut map = nodes.clone();
        m.handle_event(&mut map, &mut q, &comm_start(1, 11, 4_000, SimTime::ZERO));

        let mut delivery = comm_start(1, 11, 4_000, SimTime::from_millis(4));
        delivery.event_type = EventType::RadioRxDone;
        let clean_psdu = delivery.psdu().to_vec();
        assert!(m.dispatch_rx_done(&nodes[&1], &nodes[&2], &mut delivery));
        assert_eq!(delivery.radio_comm_data().error, RadioError::None);
        assert_eq!(delivery.psdu(), &clean_psdu[..]);
        // RSSI was stamped for the destination.
        assert!(delivery.radio_comm_data().power_dbm < 0);
    }

    #[test]
    fn destination_transmitting_sees_abort() {
        let mut m = model();
        let mut nodes = nodes_at(&[(0.0, 0.0), (50.0, 0.0)]);
        let mut q = VecQueue::default();

        m.handle_event(&mut nodes, &mut q, &comm_start(1, 11, 4_000, SimTime::ZERO));
        m.handle_event(&mut nodes, &mut q, &comm_start(2, 12, 4_000, SimTime::from_micros(50)));

        let mut delivery = comm_start(1, 11, 4_000, SimTime::from_millis(4));
        delivery.event_type = EventType::RadioRxDone;
        assert!(m.dispatch_rx_done(&nodes[&1].clone(), &nodes[&2].clone(), &mut delivery));
        assert_eq!(delivery.radio_comm_data().error, RadioError::Abort);
    }

    #[test]
    fn channel_change_mid_tx_marks_fcs_and_clears_channel() {
        let mut m = model();
        let mut nodes = nodes_at(&[(0.0, 0.0), (50.0, 0.0)]);
        let mut q = VecQueue::default();

        m.handle_event(&mut nodes, &mut q, &comm_start(1, 11, 4_000, SimTime::ZERO));
        let internal = q.0.pop().unwrap();
        q.0.clear();

        // The node hops to channel 12 before the transmission ends.
        let mut payload = vec![12u8, 0, (-100i8) as u8, 0, RadioState::Tx as u8];
        payload.extend_from_slice(&2_000u64.to_le_bytes());
        let state = Event {
            event_type: EventType::RadioState,
            node_id: 1,
            timestamp: SimTime::from_millis(2),
            payload,
            ..Default::default()
        };
        m.handle_event(&mut nodes, &mut q, &state);
        assert_eq!(nodes[&1].channel, 12);

        m.handle_event(&mut nodes, &mut q, &internal);

        // Channel 11's active set is empty at tx done.
        assert!(m.active_transmitters(11).is_empty());
        assert!(m.active_transmitters(12).is_empty());

        // The delivery carries an FCS error for listeners on channel 11.
        let delivery = q.0.iter().find(|e| e.event_type == EventType::RadioRxDone).unwrap();
        assert_eq!(delivery.radio_comm_data().error, RadioError::Fcs);
    }

    #[test]
    fn channel_sample_folds_in_new_carriers() {
        let mut m = model();
        let mut nodes = nodes_at(&[(0.0, 0.0), (30.0, 0.0)]);
        let mut q = VecQueue::default();

        let sample = Event {
            timestamp: SimTime::ZERO,
            ..Event::channel_sample(
                1,
                RadioCommData {
                    channel: 11,
                    power_dbm: 0,
                    error: RadioError::None,
                    duration_us: 1_000,
                },
            )
        };
        m.handle_event(&mut nodes, &mut q, &sample);
        let idle_floor = nodes[&1].rssi_sample_max;
        assert_eq!(idle_floor, m.parameters().noise_floor_dbm);

        // A nearby transmitter starts during the window.
        m.handle_event(&mut nodes, &mut q, &comm_start(2, 11, 500, SimTime::from_micros(100)));
        assert!(nodes[&1].rssi_sample_max > idle_floor);

        // The deferred reply is finalized with the running max.
        let mut reply = q.0.iter().find(|e| {
            e.event_type == EventType::RadioChannelSample && e.must_dispatch
        })
        .unwrap()
        .clone();
        let dst = nodes[&1].clone();
        assert!(m.dispatch_sample_reply(&dst, &mut reply));
        assert!(reply.radio_comm_data().power_dbm as f64 > m.parameters().noise_floor_dbm);
        assert!(m.samplers.is_empty());
    }

    #[test]
    fn delete_node_clears_all_state() {
        let mut m = model();
        let mut nodes = nodes_at(&[(0.0, 0.0), (10.0, 0.0)]);
        let mut q = VecQueue::default();
        m.handle_event(&mut nodes, &mut q, &comm_start(1, 11, 4_000, SimTime::ZERO));
        m.handle_event(&mut nodes, &mut q, &comm_start(2, 11, 4_000, SimTime::ZERO));

        m.delete_node(1);
        assert_eq!(m.active_transmitters(11), vec![2]);
        assert!(!m.transmissions.contains_key(&1));
        assert!(!m.interfered_by.contains_key(&1));
        assert!(!m.interfered_by[&2].contains_key(&1));
    }
}

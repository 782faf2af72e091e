//! The ideal radio engines: no contention, optional disc range limit.

use otsim_common::{NodeId, SimTime};
use otsim_event::{Event, EventType, RadioError, RadioState};
use tracing::trace;

use crate::model::{EventQueue, RadioModel, RadioNodeMap};
use crate::propagation::Propagation;
use crate::stats::ChannelStatsTracker;
use crate::{ChannelStats, RadioModelParams, RadioNode};

/// An interference-free radio model.
///
/// Every transmission reaches every reachable listener intact, delivered as
/// a full [`EventType::RadioFrameToNode`] at the end of its air time. In
/// plain mode all nodes hear each other at a fixed RSSI; in disc-limited
/// mode RSSI follows the propagation curve and a transmission only reaches
/// nodes inside the sender's circular radio range.
pub struct IdealModel {
    propagation: Propagation,
    stats: ChannelStatsTracker,
    disc_limited: bool,
}

impl IdealModel {
    /// Create the model. `disc_limited` selects the range-limited variant.
    pub fn new(params: RadioModelParams, disc_limited: bool) -> Self {
        IdealModel {
            propagation: Propagation::new(params),
            stats: ChannelStatsTracker::default(),
            disc_limited,
        }
    }

    fn tx_start(&mut self, nodes: &mut RadioNodeMap, queue: &mut dyn EventQueue, event: &Event) {
        let comm = event.radio_comm_data();
        self.stats.record_tx(comm.channel, comm.duration_us);
        if let Some(node) = nodes.get_mut(&event.node_id) {
            node.state = RadioState::Tx;
        }

        let done_at = event.timestamp.saturating_add_micros(comm.duration_us);

        // Full-frame delivery to listeners at end of air time.
        let mut delivery = event.clone();
        delivery.event_type = EventType::RadioFrameToNode;
        delivery.timestamp = done_at;
        delivery.must_dispatch = true;
        queue.add(delivery);

        // Success back to the transmitter at the same instant.
        let mut done = Event::tx_done(event.node_id, comm, RadioError::None);
        done.timestamp = done_at;
        done.must_dispatch = true;
        queue.add(done);
    }

    fn sample_start(&mut self, queue: &mut dyn EventQueue, event: &Event) {
        // Nobody interferes in this model; the scan sees only the noise
        // floor.
        let mut comm = event.radio_comm_data();
        comm.power_dbm = self.propagation.params().noise_floor_dbm as i8;
        let mut reply = Event::channel_sample(event.node_id, comm);
        reply.timestamp = event.timestamp.saturating_add_micros(comm.duration_us);
        reply.must_dispatch = true;
        queue.add(reply);
    }
}

impl RadioModel for IdealModel {
    fn model_name(&self) -> &'static str {
        if self.disc_limited {
            "IdealDisc"
        } else {
            "Ideal"
        }
    }

    fn add_node(&mut self, _node: &RadioNode) {}

    fn delete_node(&mut self, _id: NodeId) {}

    fn handle_event(&mut self, nodes: &mut RadioNodeMap, queue: &mut dyn EventQueue, event: &Event) {
        match event.event_type {
            EventType::RadioCommStart | EventType::RadioFrameToSim => {
                self.tx_start(nodes, queue, event)
            }
            EventType::RadioChannelSample => self.sample_start(queue, event),
            EventType::RadioState => {
                if let Some(node) = nodes.get_mut(&event.node_id) {
                    node.apply_state(&event.radio_state_data());
                }
            }
            other => trace!(event_type = ?other, "ideal model ignoring event"),
        }
    }

    fn on_event_dispatch(&mut self, src: &RadioNode, dst: &RadioNode, event: &mut Event) -> bool {
        if event.event_type != EventType::RadioFrameToNode {
            return true;
        }
        if !self.check_radio_reachable(src, dst) {
            return false;
        }
        let mut comm = event.radio_comm_data();
        comm.power_dbm = self.get_tx_rssi(src, dst).round() as i8;
        event.set_radio_comm_data(comm);
        true
    }

    fn get_tx_rssi(&mut self, src: &RadioNode, dst: &RadioNode) -> f64 {
        if self.disc_limited {
            self.propagation.rssi(src, dst)
        } else {
            self.propagation.params().fixed_rssi_dbm as f64
        }
    }

    fn check_radio_reachable(&mut self, src: &RadioNode, dst: &RadioNode) -> bool {
        if !self.disc_limited {
            return true;
        }
        src.position.distance(&dst.position) <= src.radio_range as f64
            && self.propagation.link_reachable(src, dst)
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

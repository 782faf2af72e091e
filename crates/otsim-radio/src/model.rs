//! The radio model trait and its collaborator seams.

use std::collections::HashMap;

use otsim_common::{NodeId, SimTime};
use otsim_event::Event;

use crate::{ChannelStats, RadioModelParams, RadioNode};

/// Radio state of every live node, keyed by node id.
///
/// Owned by the dispatcher and lent to the model for each callback, so the
/// model can read and mutate the state of nodes other than the event's
/// originator (interference marking, sampler updates).
pub type RadioNodeMap = HashMap<NodeId, RadioNode>;

/// Where a model schedules follow-up events.
///
/// Implemented by the dispatcher's send queue. Events added here are
/// processed in timestamp order, ties in insertion order.
pub trait EventQueue {
    /// Schedule `event` at its `timestamp`.
    fn add(&mut self, event: Event);
}

/// A pluggable radio propagation + channel-access engine.
///
/// The dispatcher owns exactly one model at a time and calls it only from
/// the dispatcher thread. Models keep per-channel and per-link state but
/// never own `RadioNode`s; those arrive by reference with each call.
pub trait RadioModel: Send {
    /// Short model name for logs and scenario files.
    fn model_name(&self) -> &'static str;

    /// A node was created.
    fn add_node(&mut self, node: &RadioNode);

    /// A node was deleted; drop it from all model state.
    fn delete_node(&mut self, id: NodeId);

    /// Handle a radio event popped from the send queue.
    ///
    /// The model may mutate node radio state and enqueue further events
    /// (transmission completions, deferred sample replies, dispatched
    /// frame deliveries marked `must_dispatch`).
    fn handle_event(&mut self, nodes: &mut RadioNodeMap, queue: &mut dyn EventQueue, event: &Event);

    /// Called before the dispatcher forwards `event` to `dst`.
    ///
    /// Returning `false` drops the delivery for this destination. The model
    /// may mutate the event: stamp the destination RSSI, mark interference
    /// errors, or corrupt the frame.
    fn on_event_dispatch(&mut self, src: &RadioNode, dst: &RadioNode, event: &mut Event) -> bool;

    /// RSSI at `dst` for a transmission from `src`, dBm.
    fn get_tx_rssi(&mut self, src: &RadioNode, dst: &RadioNode) -> f64;

    /// Whether `dst` can hear `src` under this model.
    fn check_radio_reachable(&mut self, src: &RadioNode, dst: &RadioNode) -> bool;

    /// Current parameters.
    fn parameters(&self) -> &RadioModelParams;

    /// Mutable parameters; call [`RadioModel::on_parameters_modified`]
    /// afterwards.
    fn parameters_mut(&mut self) -> &mut RadioModelParams;

    /// Parameters were changed externally; refresh derived state.
    fn on_parameters_modified(&mut self);

    /// Channel activity since the last reset, window closed at `now`.
    fn channel_stats(&self, channel: u8, now: SimTime) -> ChannelStats;

    /// Restart channel activity accounting for `channel`.
    fn reset_channel_stats(&mut self, channel: u8, now: SimTime);

    /// The dispatcher is about to advance virtual time to `ts`; age any
    /// time-variant state.
    fn on_next_event_time(&mut self, ts: SimTime);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Minimal queue for model unit tests: records adds in order.
    #[derive(Default)]
    pub struct VecQueue(pub Vec<Event>);

    impl EventQueue for VecQueue {
        fn add(&mut self, event: Event) {
            self.0.push(event);
        }
    }
}

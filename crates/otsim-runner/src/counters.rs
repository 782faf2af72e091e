//! Dispatcher counters.
//!
//! Exact event accounting, kept as plain integers so tests can assert on
//! them; the hot paths mirror the interesting ones into the `metrics`
//! facade for exporters.

/// Cumulative dispatcher statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Events received from node processes.
    pub events_received: u64,
    /// Events popped and processed (alarms + queued events).
    pub events_processed: u64,
    /// Alarm events sent to nodes.
    pub alarms_sent: u64,

    /// Frame deliveries resolved through the extended-address index.
    pub dispatch_by_ext_addr_succ: u64,
    /// Extended-address lookups that found no live, reachable node.
    pub dispatch_by_ext_addr_fail: u64,
    /// Frame deliveries resolved through the rloc16 index.
    pub dispatch_by_short_addr_succ: u64,
    /// Rloc16 lookups that found no live, reachable node.
    pub dispatch_by_short_addr_fail: u64,
    /// Broadcast dispatches (delivered to every node in range).
    pub dispatch_all_in_range: u64,

    /// Frames dropped by the global packet-loss ratio.
    pub frames_dropped_packet_loss: u64,
    /// Frames not delivered because an endpoint was failed.
    pub frames_dropped_failed_node: u64,
    /// Frames whose PSDU did not parse.
    pub frames_undecodable: u64,

    /// Datagrams that did not decode into an event.
    pub recv_parse_errors: u64,
    /// Events from sockets not bound to any node.
    pub unknown_peer_events: u64,
    /// Status-push items with unrecognized keys.
    pub status_push_unknown: u64,
    /// Malformed status pushes dropped whole.
    pub status_push_errors: u64,

    /// Ping requests expired without a reply.
    pub ping_timeouts: u64,
    /// Socket write failures towards node processes.
    pub node_io_errors: u64,
    /// Nodes force-advanced after the receive safety timeout.
    pub node_recv_timeouts: u64,
}

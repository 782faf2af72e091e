//! Outbound surfaces: the supervisor callback handler and the visualizer.
//!
//! Both traits are called on the dispatcher thread only and must not block;
//! implementations that need to do real work should hand off to their own
//! thread. The no-op implementations are the defaults for headless runs.

use otsim_common::{ExtAddr, NodeId, NodeRole, Rloc16, SimTime};
use otsim_event::Event;

/// Surface towards the process supervisor / CLI host.
pub trait CallbackHandler: Send {
    /// A node entered the induced-failure state.
    fn on_node_fail(&mut self, node_id: NodeId);

    /// A node recovered from induced failure.
    fn on_node_recover(&mut self, node_id: NodeId);

    /// A node wrote bytes to its UART.
    fn on_uart_write(&mut self, node_id: NodeId, data: &[u8]);

    /// The dispatcher computed the next event time; a hint for hosts that
    /// schedule external work against virtual time.
    fn on_next_event_time(&mut self, next: SimTime);

    /// A node answered a radio-simulation parameter get/set.
    fn on_rfsim_event(&mut self, node_id: NodeId, event: &Event);
}

/// A callback handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopCallbackHandler;

impl CallbackHandler for NopCallbackHandler {
    fn on_node_fail(&mut self, _node_id: NodeId) {}
    fn on_node_recover(&mut self, _node_id: NodeId) {}
    fn on_uart_write(&mut self, _node_id: NodeId, _data: &[u8]) {}
    fn on_next_event_time(&mut self, _next: SimTime) {}
    fn on_rfsim_event(&mut self, _node_id: NodeId, _event: &Event) {}
}

/// One-way telemetry sink for topology, motion, and frame activity.
pub trait Visualizer: Send {
    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// A node was created.
    fn add_node(&mut self, node_id: NodeId, x: f64, y: f64, radio_range: u32);
    /// A node was deleted.
    fn delete_node(&mut self, node_id: NodeId);
    /// A node moved.
    fn set_node_pos(&mut self, node_id: NodeId, x: f64, y: f64);
    /// A node's device role changed.
    fn set_node_role(&mut self, node_id: NodeId, role: NodeRole);
    /// A node's rloc16 changed.
    fn set_node_rloc16(&mut self, node_id: NodeId, rloc16: Rloc16);
    /// A node's partition changed.
    fn set_node_partition_id(&mut self, node_id: NodeId, partition_id: u32);
    /// A node attached to a parent.
    fn set_parent(&mut self, node_id: NodeId, parent: ExtAddr);
    /// A router-table entry appeared.
    fn add_router_table(&mut self, node_id: NodeId, router: ExtAddr);
    /// A router-table entry disappeared.
    fn remove_router_table(&mut self, node_id: NodeId, router: ExtAddr);
    /// A child-table entry appeared.
    fn add_child_table(&mut self, node_id: NodeId, child: ExtAddr);
    /// A child-table entry disappeared.
    fn remove_child_table(&mut self, node_id: NodeId, child: ExtAddr);
    /// A node announced a new extended address.
    fn on_ext_addr_change(&mut self, node_id: NodeId, ext_addr: ExtAddr);

    // ------------------------------------------------------------------
    // Motion
    // ------------------------------------------------------------------

    /// Virtual time advanced.
    fn advance_time(&mut self, now: SimTime, speed: f64);
    /// The requested simulation speed changed.
    fn set_speed(&mut self, speed: f64);
    /// Show a countdown (scenario theatrics).
    fn count_down(&mut self, duration_ms: u64, text: &str);
    /// Show the demo legend.
    fn show_demo_legend(&mut self, x: i32, y: i32, title: &str);

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// A frame went from `src` towards `dst` (`None` for broadcast).
    fn send(&mut self, src: NodeId, dst: Option<NodeId>, channel: u8);
}

/// A visualizer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopVisualizer;

impl Visualizer for NopVisualizer {
    fn add_node(&mut self, _node_id: NodeId, _x: f64, _y: f64, _radio_range: u32) {}
    fn delete_node(&mut self, _node_id: NodeId) {}
    fn set_node_pos(&mut self, _node_id: NodeId, _x: f64, _y: f64) {}
    fn set_node_role(&mut self, _node_id: NodeId, _role: NodeRole) {}
    fn set_node_rloc16(&mut self, _node_id: NodeId, _rloc16: Rloc16) {}
    fn set_node_partition_id(&mut self, _node_id: NodeId, _partition_id: u32) {}
    fn set_parent(&mut self, _node_id: NodeId, _parent: ExtAddr) {}
    fn add_router_table(&mut self, _node_id: NodeId, _router: ExtAddr) {}
    fn remove_router_table(&mut self, _node_id: NodeId, _router: ExtAddr) {}
    fn add_child_table(&mut self, _node_id: NodeId, _child: ExtAddr) {}
    fn remove_child_table(&mut self, _node_id: NodeId, _child: ExtAddr) {}
    fn on_ext_addr_change(&mut self, _node_id: NodeId, _ext_addr: ExtAddr) {}
    fn advance_time(&mut self, _now: SimTime, _speed: f64) {}
    fn set_speed(&mut self, _speed: f64) {}
    fn count_down(&mut self, _duration_ms: u64, _text: &str) {}
    fn show_demo_legend(&mut self, _x: i32, _y: i32, _title: &str) {}
    fn send(&mut self, _src: NodeId, _dst: Option<NodeId>, _channel: u8) {}
}

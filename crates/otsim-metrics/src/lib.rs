//! Metric declarations for the OTSIM simulator.
//!
//! Every series the dispatcher emits is declared here as a [`MetricDef`]
//! constant — a plain struct literal carrying the name, shape, help text,
//! unit, and expected label keys — so emit sites never spell a name twice
//! and exporters get full metadata from one registration pass. The
//! `metrics` facade is re-exported for convenience.
//!
//! # Example
//!
//! ```rust,ignore
//! use otsim_metrics::{metric_defs, node_label, register_metrics};
//!
//! // Once at startup, after installing a recorder.
//! register_metrics();
//!
//! // At emit sites.
//! metrics::counter!(metric_defs::FRAMES_DISPATCHED.name, &node_label(3)).increment(1);
//! ```

pub use metrics;

use std::fmt;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Shape of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing count.
    Counter,
    /// Value that moves both ways.
    Gauge,
    /// Distribution of observed values.
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        })
    }
}

/// One declared metric series.
///
/// Declared as `const` struct literals in [`metric_defs`]; nothing here is
/// built at runtime.
#[derive(Debug, Clone)]
pub struct MetricDef {
    /// Series name, e.g. `sim.frames.dispatched`.
    pub name: &'static str,
    /// Counter, gauge, or histogram.
    pub kind: MetricKind,
    /// One-line help text for exporters.
    pub help: &'static str,
    /// Unit of measurement, when one applies.
    pub unit: Option<Unit>,
    /// Label keys emit sites are expected to attach.
    pub labels: &'static [&'static str],
}

impl MetricDef {
    /// Register this series' metadata with the installed recorder.
    pub fn register(&self) {
        match self.kind {
            MetricKind::Counter => match self.unit {
                Some(unit) => describe_counter!(self.name, unit, self.help),
                None => describe_counter!(self.name, self.help),
            },
            MetricKind::Gauge => match self.unit {
                Some(unit) => describe_gauge!(self.name, unit, self.help),
                None => describe_gauge!(self.name, self.help),
            },
            MetricKind::Histogram => match self.unit {
                Some(unit) => describe_histogram!(self.name, unit, self.help),
                None => describe_histogram!(self.name, self.help),
            },
        }
    }
}

/// All metric definitions for the simulator.
pub mod metric_defs {
    use super::{MetricDef, MetricKind, Unit};

    // ========================================================================
    // Scheduler
    // ========================================================================

    /// Events received from node processes, by type.
    pub const EVENTS_RECEIVED: MetricDef = MetricDef {
        name: "sim.events.received",
        kind: MetricKind::Counter,
        help: "Events received from node processes",
        unit: Some(Unit::Count),
        labels: &["type"],
    };

    /// Events popped and processed from the send queue / alarm manager.
    pub const EVENTS_PROCESSED: MetricDef = MetricDef {
        name: "sim.events.processed",
        kind: MetricKind::Counter,
        help: "Events processed by the dispatcher",
        unit: Some(Unit::Count),
        labels: &[],
    };

    /// Current virtual time.
    pub const SIM_TIME: MetricDef = MetricDef {
        name: "sim.time_us",
        kind: MetricKind::Gauge,
        help: "Current virtual time in microseconds",
        unit: Some(Unit::Microseconds),
        labels: &[],
    };

    /// Number of live nodes.
    pub const NODES: MetricDef = MetricDef {
        name: "sim.nodes",
        kind: MetricKind::Gauge,
        help: "Number of live nodes",
        unit: Some(Unit::Count),
        labels: &[],
    };

    // ========================================================================
    // Frame dispatch
    // ========================================================================

    /// Frames delivered to destination nodes.
    pub const FRAMES_DISPATCHED: MetricDef = MetricDef {
        name: "sim.frames.dispatched",
        kind: MetricKind::Counter,
        help: "Radio frames delivered to destination nodes",
        unit: Some(Unit::Count),
        labels: &["addressing"],
    };

    /// Frames dropped before delivery.
    ///
    /// `reason` is one of `node_failed`, `undecodable`, or `packet_loss`.
    pub const FRAMES_DROPPED: MetricDef = MetricDef {
        name: "sim.frames.dropped",
        kind: MetricKind::Counter,
        help: "Radio frames dropped before delivery",
        unit: Some(Unit::Count),
        labels: &["reason"],
    };

    // ========================================================================
    // Node lifecycle
    // ========================================================================

    /// Induced node failures.
    pub const NODE_FAILURES: MetricDef = MetricDef {
        name: "sim.node.failures",
        kind: MetricKind::Counter,
        help: "Induced node failures",
        unit: Some(Unit::Count),
        labels: &["node"],
    };

    /// Node recoveries after induced failure.
    pub const NODE_RECOVERIES: MetricDef = MetricDef {
        name: "sim.node.recoveries",
        kind: MetricKind::Counter,
        help: "Node recoveries after induced failure",
        unit: Some(Unit::Count),
        labels: &["node"],
    };

    /// Ping round-trip delay.
    pub const PING_DELAY: MetricDef = MetricDef {
        name: "sim.ping.delay_us",
        kind: MetricKind::Histogram,
        help: "Ping round-trip delay in microseconds",
        unit: Some(Unit::Microseconds),
        labels: &[],
    };

    /// Pings that never saw a reply.
    pub const PING_TIMEOUTS: MetricDef = MetricDef {
        name: "sim.ping.timeouts",
        kind: MetricKind::Counter,
        help: "Ping requests expired without a reply",
        unit: Some(Unit::Count),
        labels: &[],
    };

    // ========================================================================
    // Capture & errors
    // ========================================================================

    /// Frames written to the pcap file.
    pub const PCAP_FRAMES: MetricDef = MetricDef {
        name: "sim.pcap.frames",
        kind: MetricKind::Counter,
        help: "Frames written to the pcap file",
        unit: Some(Unit::Count),
        labels: &[],
    };

    /// Frames dropped because the pcap queue was full.
    pub const PCAP_DROPPED: MetricDef = MetricDef {
        name: "sim.pcap.dropped",
        kind: MetricKind::Counter,
        help: "Frames dropped because the pcap queue was full",
        unit: Some(Unit::Count),
        labels: &[],
    };

    /// Malformed or unexpected datagrams, by kind.
    pub const RECV_ERRORS: MetricDef = MetricDef {
        name: "sim.recv.errors",
        kind: MetricKind::Counter,
        help: "Malformed or unexpected datagrams",
        unit: Some(Unit::Count),
        labels: &["kind"],
    };

    /// Every defined metric, for registration and introspection.
    pub const ALL: &[&MetricDef] = &[
        &EVENTS_RECEIVED,
        &EVENTS_PROCESSED,
        &SIM_TIME,
        &NODES,
        &FRAMES_DISPATCHED,
        &FRAMES_DROPPED,
        &NODE_FAILURES,
        &NODE_RECOVERIES,
        &PING_DELAY,
        &PING_TIMEOUTS,
        &PCAP_FRAMES,
        &PCAP_DROPPED,
        &RECV_ERRORS,
    ];
}

/// Label vector identifying a node, for node-scoped metrics.
pub fn node_label(node_id: u32) -> Vec<(&'static str, String)> {
    vec![("node", node_id.to_string())]
}

/// Register every declared metric; call once after installing a recorder
/// so exporters pick up help text and units.
pub fn register_metrics() {
    for def in metric_defs::ALL {
        def.register();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_are_consistent() {
        assert_eq!(metric_defs::FRAMES_DISPATCHED.kind, MetricKind::Counter);
        assert_eq!(metric_defs::SIM_TIME.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::PING_DELAY.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::ALL.len(), 13);

        for def in metric_defs::ALL {
            assert!(!def.name.is_empty());
            assert!(!def.help.is_empty());
            assert!(def.name.starts_with("sim."));
        }

        // Names are unique.
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|d| d.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn labelled_series_declare_their_keys() {
        assert_eq!(metric_defs::FRAMES_DROPPED.labels, &["reason"]);
        assert_eq!(metric_defs::NODE_FAILURES.labels, &["node"]);
        assert!(metric_defs::SIM_TIME.labels.is_empty());
    }

    #[test]
    fn node_label_shape() {
        let labels = node_label(7);
        assert_eq!(labels, vec![("node", "7".to_string())]);
    }

    #[test]
    fn kind_display() {
        assert_eq!(MetricKind::Counter.to_string(), "counter");
        assert_eq!(MetricKind::Gauge.to_string(), "gauge");
        assert_eq!(MetricKind::Histogram.to_string(), "histogram");
    }

    #[test]
    fn registration_walks_every_definition() {
        // No recorder installed: describe calls are no-ops, but the walk
        // must not panic for any kind/unit combination.
        register_metrics();
    }
}

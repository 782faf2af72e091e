//! OTSIM runner: the virtual-time dispatcher for external node processes.
//!
//! This crate hosts the coordinator of the simulation: node firmware runs
//! as separate POSIX processes and speaks the `otsim-event` datagram
//! protocol; everything on this side — the global clock, alarm scheduling,
//! frame routing through a radio model, failure injection, packet capture —
//! lives on one dispatcher thread.
//!
//! Embedders construct a [`Dispatcher`], keep its [`DispatcherHandle`], and
//! run the dispatcher on a dedicated thread; the handle posts tasks and
//! go-requests from anywhere.

pub mod addrs;
pub mod alarm;
pub mod callbacks;
pub mod config;
pub mod counters;
pub mod dispatcher;
pub mod failure;
pub mod node;
pub mod pcap;
pub mod queue;
pub mod realtime;
pub mod socket;

pub use callbacks::{CallbackHandler, NopCallbackHandler, NopVisualizer, Visualizer};
pub use config::{NodeConfig, SimConfig};
pub use counters::Counters;
pub use dispatcher::{Dispatcher, DispatcherError, DispatcherHandle, GoRequest, Task};
pub use failure::{FailTime, FailureController, FailureTransition};
pub use pcap::PcapMode;

pub use otsim_common::{NodeId, SimTime};

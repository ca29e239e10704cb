//! Tunnel-terminated ACL redirect engine.
//!
//! VXLAN traffic arriving on an interface with the tunterm bypass feature
//! is classified on its inner destination address. Packets that hit a
//! redirect session are decapsulated and sent along the session's
//! forwarding path; everything else continues to normal VXLAN input.
//!
//! # Architecture
//!
//! ```text
//! [control API] ──> [ControlPlane] ──> [TuntermAcl] ─┬─> [TableManager] ──> [ClassifyMain]
//!                   (sequencer)                      └─> [BindingRegistry] ──> [FeatureArc]
//!                        │
//!                        ↓ publishes
//!               [DataplaneSnapshot] ──> [WorkerPool] ──> [RedirectNode]
//! ```
//!
//! # Key Components
//!
//! - [`table::TableManager`]: classify table lifecycle and batch session
//!   replacement
//! - [`binding::BindingRegistry`]: per-interface, per-family table binding
//!   and feature toggling
//! - [`dataplane::RedirectNode`]: the per-packet redirect stage
//! - [`control::ControlPlane`]: serializes control requests and publishes
//!   dataplane snapshots
//! - [`api`]: the control messages, their codec and status codes

pub mod api;
pub mod audit;
pub mod binding;
pub mod classify;
pub mod config;
pub mod control;
pub mod dataplane;
pub mod fib;
pub mod host;
pub mod table;

pub use api::{handle_message, ApiStatus, ControlReply, ControlRequest};
pub use binding::{BindingError, BindingRegistry, InterfaceBinding};
pub use config::{ConfigError, DaemonConfig};
pub use control::{ControlPlane, DataplaneSnapshot, TuntermAcl, WorkerPool};
pub use dataplane::{NextStage, PacketBuffer, RedirectCounters, RedirectNode, RedirectOutcome};
pub use table::{TableError, TableManager, TunTermRule};

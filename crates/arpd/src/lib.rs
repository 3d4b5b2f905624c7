//! ARP Daemon topology core
//!
//! Keeps an in-memory model of ports, LAGs, VLANs and L3 interfaces in sync
//! with asicd, propagates L3 bindings down to member ports, and controls
//! per-port ARP packet capture.
//!
//! # Architecture
//!
//! ```text
//!   asicd bulk API ──▶ loader ──┐
//!                               ▼
//!   notifications ──▶ ArpDaemon ──▶ reconciler ──▶ TopologyStore
//!   queries       ──▶    │              │
//!                        │              ├──▶ L3Propagator (VLAN → LAG → port)
//!                        │              └──▶ RX controller (capture workers)
//!                        ▼
//!   ARP cache ◀── invalidations, MAC moves, rx frames, probe requests
//! ```

pub mod asicd;
pub mod capture;
pub mod config;
pub mod daemon;
pub mod error;
pub mod l3_binding;
pub mod loader;
pub mod notification;
pub mod orch;
pub mod reconciler;
pub mod topology;
pub mod types;

pub use asicd::{
    BulkPage, HwPlane, Ipv4IntfState, LagConfig, PortConfig, PortState, SnapshotPlane,
    TopologySnapshot, VlanConfig, VlanState,
};
pub use capture::{base_filter, CaptureBackend, CaptureHandle, DisabledCapture, RxPacket};
pub use config::ArpdConfig;
pub use daemon::{ArpDaemon, ServerEvent, TopologyHandle, TopologyQuery};
pub use error::{ArpdError, Result};
pub use l3_binding::{BindingChanges, L3Propagator};
pub use loader::LoadSummary;
pub use notification::{AsicdNotification, IntfOp, MacMoveNotification, NotifyKind};
pub use orch::{
    ArpEntryDelete, ProbeRequest, TopologyOrch, TopologyOrchConfig, TopologyOrchStats,
    TopologyReceivers, TopologySinks,
};
pub use reconciler::{diff_sets, MembershipDiff, VlanDiff};
pub use topology::TopologyStore;
pub use types::{L3Binding, L3Interface, L3Target, Lag, Member, Port, RxState, Tagging, Vlan};

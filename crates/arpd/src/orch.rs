//! TopologyOrch: owner of the topology store and its outbound channels.
//!
//! Handlers live in [`reconciler`](crate::reconciler) and
//! [`loader`](crate::loader); this module holds the state they share, the
//! outbound sinks, and the per-port RX controller.

use crate::capture::{base_filter, CaptureBackend, RxPacket, RxWorker};
use crate::config::{ArpdConfig, ChannelConfig};
use crate::l3_binding::BindingChanges;
use crate::notification::MacMoveNotification;
use crate::topology::TopologyStore;
use crate::types::{L3Binding, RxState};
use sonic_types::{IfIndex, MacAddress, VlanId};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Request to flush ARP cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArpEntryDelete {
    /// Entries learned on a physical port.
    ByPort(IfIndex),
    /// Entries belonging to an L3 interface.
    ByL3(IfIndex),
}

/// Request to probe an L3 interface that came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub l3_ifindex: IfIndex,
    pub ip: Ipv4Addr,
    /// Source MAC for the probe, resolved through the L3 interface's ports.
    pub mac: Option<MacAddress>,
}

/// Outbound channels fed by the topology owner.
#[derive(Debug, Clone)]
pub struct TopologySinks {
    pub arp_delete: mpsc::Sender<ArpEntryDelete>,
    pub mac_move: mpsc::Sender<MacMoveNotification>,
    pub rx: mpsc::Sender<RxPacket>,
    pub probe: mpsc::Sender<ProbeRequest>,
}

/// Receiving ends of [`TopologySinks`], handed to the ARP cache and
/// transmit components.
#[derive(Debug)]
pub struct TopologyReceivers {
    pub arp_delete: mpsc::Receiver<ArpEntryDelete>,
    pub mac_move: mpsc::Receiver<MacMoveNotification>,
    pub rx: mpsc::Receiver<RxPacket>,
    pub probe: mpsc::Receiver<ProbeRequest>,
}

impl TopologySinks {
    pub fn channel(config: &ChannelConfig) -> (Self, TopologyReceivers) {
        let (arp_delete_tx, arp_delete_rx) = mpsc::channel(config.arp_delete_queue_depth);
        let (mac_move_tx, mac_move_rx) = mpsc::channel(config.mac_move_queue_depth);
        let (rx_tx, rx_rx) = mpsc::channel(config.rx_queue_depth);
        let (probe_tx, probe_rx) = mpsc::channel(config.probe_queue_depth);
        (
            Self {
                arp_delete: arp_delete_tx,
                mac_move: mac_move_tx,
                rx: rx_tx,
                probe: probe_tx,
            },
            TopologyReceivers {
                arp_delete: arp_delete_rx,
                mac_move: mac_move_rx,
                rx: rx_rx,
                probe: probe_rx,
            },
        )
    }
}

/// Settings the orch needs from [`ArpdConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyOrchConfig {
    pub page_size: u32,
    pub port_start_marker: u32,
    pub extra_filter: String,
}

impl Default for TopologyOrchConfig {
    fn default() -> Self {
        Self::from(&ArpdConfig::default())
    }
}

impl From<&ArpdConfig> for TopologyOrchConfig {
    fn from(config: &ArpdConfig) -> Self {
        Self {
            page_size: config.bulk.page_size,
            port_start_marker: config.bulk.port_start_marker,
            extra_filter: config.capture.extra_filter.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyOrchStats {
    pub notifications: u64,
    /// Notifications dropped as malformed or inconsistent.
    pub notifications_skipped: u64,
    pub bindings_created: u64,
    pub bindings_removed: u64,
    pub invalidations: u64,
    pub captures_started: u64,
    pub captures_stopped: u64,
    pub capture_failures: u64,
    pub probes: u64,
}

pub struct TopologyOrch {
    pub(crate) config: TopologyOrchConfig,
    pub(crate) stats: TopologyOrchStats,
    pub(crate) store: TopologyStore,
    capture: Arc<dyn CaptureBackend>,
    sinks: TopologySinks,
}

impl std::fmt::Debug for TopologyOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyOrch")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .field("store", &self.store)
            .finish()
    }
}

impl TopologyOrch {
    pub fn new(
        config: TopologyOrchConfig,
        capture: Arc<dyn CaptureBackend>,
        sinks: TopologySinks,
    ) -> Self {
        Self {
            config,
            stats: TopologyOrchStats::default(),
            store: TopologyStore::new(),
            capture,
            sinks,
        }
    }

    pub fn config(&self) -> &TopologyOrchConfig {
        &self.config
    }

    pub fn stats(&self) -> &TopologyOrchStats {
        &self.stats
    }

    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    pub fn resolve_mac(&self, l3_ifindex: IfIndex) -> Option<MacAddress> {
        self.store.resolve_mac(l3_ifindex)
    }

    pub fn is_l3_capable(&self, ifindex: IfIndex) -> bool {
        self.store.is_l3_capable(ifindex)
    }

    pub fn port_binding(&self, port: IfIndex, vlan: VlanId) -> Option<L3Binding> {
        self.store
            .port(port)
            .and_then(|p| p.l3_bindings.get(&vlan))
            .copied()
    }

    pub fn rx_state(&self, port: IfIndex) -> Option<RxState> {
        self.store.port(port).map(|p| p.rx_state())
    }

    /// Folds a propagation result into the stats and sends its invalidations.
    pub(crate) async fn apply_binding_changes(&mut self, changes: BindingChanges) {
        self.stats.bindings_created += changes.bound as u64;
        self.stats.bindings_removed += changes.unbound as u64;
        for port in changes.invalidated {
            self.invalidate(ArpEntryDelete::ByPort(port)).await;
        }
    }

    pub(crate) async fn invalidate(&mut self, request: ArpEntryDelete) {
        debug!(?request, "Requesting ARP cache invalidation");
        if self.sinks.arp_delete.send(request).await.is_err() {
            warn!(?request, "ARP delete channel closed, invalidation dropped");
            return;
        }
        self.stats.invalidations += 1;
    }

    pub(crate) async fn forward_mac_move(&mut self, msg: MacMoveNotification) {
        if self.sinks.mac_move.send(msg).await.is_err() {
            warn!("MAC move channel closed, notification dropped");
        }
    }

    /// Fires a probe for `l3_ifindex` from a detached task.
    pub(crate) fn spawn_probe(&mut self, l3_ifindex: IfIndex) {
        let Some(intf) = self.store.l3_intf(l3_ifindex) else {
            debug!(%l3_ifindex, "No L3 interface to probe");
            return;
        };
        let request = ProbeRequest {
            l3_ifindex,
            ip: intf.ip(),
            mac: self.store.resolve_mac(l3_ifindex),
        };
        let probe = self.sinks.probe.clone();
        self.stats.probes += 1;
        tokio::spawn(async move {
            if probe.send(request).await.is_err() {
                debug!(%l3_ifindex, "Probe channel closed");
            }
        });
    }

    pub(crate) fn set_port_oper(&mut self, port: IfIndex, up: bool) {
        match self.store.port_mut(port) {
            Some(entry) => entry.oper_up = up,
            None => debug!(%port, up, "State change for unknown port"),
        }
    }

    /// Starts capture on an operationally up port with no worker.
    ///
    /// Open failures are logged and leave the port idle until its next
    /// oper-up transition.
    #[instrument(skip(self))]
    pub(crate) fn enable_rx(&mut self, port: IfIndex) {
        let extra = self.config.extra_filter.as_str();
        let Some(entry) = self.store.port_mut(port) else {
            debug!("Enable rx on unknown port");
            return;
        };
        if entry.rx_state() != RxState::UpIdle {
            return;
        }

        let filter = base_filter(entry.mac, extra);
        match self.capture.open(&entry.name, &filter) {
            Ok(handle) => {
                entry.rx = Some(RxWorker::spawn(port, handle, self.sinks.rx.clone()));
                self.stats.captures_started += 1;
                info!(if_name = %entry.name, %filter, "Capture started");
            }
            Err(e) => {
                self.stats.capture_failures += 1;
                warn!(if_name = %entry.name, error = %e, "Failed to open capture");
            }
        }
    }

    /// Stops capture on a port: stop request, wait for the acknowledgement,
    /// close the handle, then invalidate the port's ARP entries.
    #[instrument(skip(self))]
    pub(crate) async fn disable_rx(&mut self, port: IfIndex) {
        let Some(worker) = self.store.port_mut(port).and_then(|entry| entry.rx.take()) else {
            return;
        };

        match worker.stop().await {
            Ok(mut handle) => handle.close(),
            Err(e) => warn!(error = %e, "Receive worker exited without acknowledging"),
        }
        self.stats.captures_stopped += 1;
        debug!("Capture stopped");
        self.invalidate(ArpEntryDelete::ByPort(port)).await;
    }

    /// Stops every capture worker; used on shutdown.
    pub async fn shutdown(&mut self) {
        for port in self.store.port_indices() {
            self.disable_rx(port).await;
        }
    }
}

//! ArpDaemon: the topology owner task.
//!
//! The daemon loads the topology once, then processes notifications and
//! queries strictly in arrival order from a single channel. Other tasks talk
//! to it through a cloneable [`TopologyHandle`].

use crate::asicd::HwPlane;
use crate::error::{ArpdError, Result};
use crate::loader::LoadSummary;
use crate::notification::AsicdNotification;
use crate::orch::{TopologyOrch, TopologyOrchStats};
use crate::types::L3Binding;
use sonic_types::{IfIndex, MacAddress, VlanId};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Read-only questions answered by the owner task.
#[derive(Debug)]
pub enum TopologyQuery {
    ResolveMac {
        l3_ifindex: IfIndex,
        reply: oneshot::Sender<Option<MacAddress>>,
    },
    IsL3Capable {
        ifindex: IfIndex,
        reply: oneshot::Sender<bool>,
    },
    PortBinding {
        port: IfIndex,
        vlan: VlanId,
        reply: oneshot::Sender<Option<L3Binding>>,
    },
    Stats {
        reply: oneshot::Sender<TopologyOrchStats>,
    },
}

#[derive(Debug)]
pub enum ServerEvent {
    Notification(AsicdNotification),
    Query(TopologyQuery),
}

/// Cloneable sender side of the owner's event channel.
#[derive(Debug, Clone)]
pub struct TopologyHandle {
    events: mpsc::Sender<ServerEvent>,
}

impl TopologyHandle {
    pub async fn notify(&self, msg: AsicdNotification) -> Result<()> {
        self.send(ServerEvent::Notification(msg)).await
    }

    pub async fn resolve_mac(&self, l3_ifindex: IfIndex) -> Result<Option<MacAddress>> {
        let (reply, rx) = oneshot::channel();
        self.query(TopologyQuery::ResolveMac { l3_ifindex, reply }, rx)
            .await
    }

    pub async fn is_l3_capable(&self, ifindex: IfIndex) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.query(TopologyQuery::IsL3Capable { ifindex, reply }, rx)
            .await
    }

    pub async fn port_binding(&self, port: IfIndex, vlan: VlanId) -> Result<Option<L3Binding>> {
        let (reply, rx) = oneshot::channel();
        self.query(TopologyQuery::PortBinding { port, vlan, reply }, rx)
            .await
    }

    pub async fn stats(&self) -> Result<TopologyOrchStats> {
        let (reply, rx) = oneshot::channel();
        self.query(TopologyQuery::Stats { reply }, rx).await
    }

    async fn send(&self, event: ServerEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| ArpdError::ChannelClosed("topology event"))
    }

    async fn query<T>(&self, query: TopologyQuery, rx: oneshot::Receiver<T>) -> Result<T> {
        self.send(ServerEvent::Query(query)).await?;
        rx.await
            .map_err(|_| ArpdError::ChannelClosed("topology query reply"))
    }
}

pub struct ArpDaemon {
    orch: TopologyOrch,
    events: mpsc::Receiver<ServerEvent>,
}

impl ArpDaemon {
    pub fn new(orch: TopologyOrch, event_queue_depth: usize) -> (Self, TopologyHandle) {
        let (tx, rx) = mpsc::channel(event_queue_depth);
        (Self { orch, events: rx }, TopologyHandle { events: tx })
    }

    /// Bulk loads from `plane`, then serves events until every handle is
    /// dropped or `shutdown` resolves. Capture workers are stopped before
    /// returning the orch.
    pub async fn run<S>(mut self, plane: &dyn HwPlane, shutdown: S) -> TopologyOrch
    where
        S: Future<Output = ()>,
    {
        info!("Starting topology load");
        let summary: LoadSummary = self.orch.load_topology(plane).await;
        info!(
            ports = summary.ports,
            lags = summary.lags,
            vlans = summary.vlans,
            l3_intfs = summary.l3_intfs,
            "Processing notifications"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("All topology handles dropped");
                        break;
                    }
                },
            }
        }

        self.orch.shutdown().await;
        info!(stats = ?self.orch.stats(), "Topology owner stopped");
        self.orch
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Notification(msg) => self.orch.handle_notification(msg).await,
            ServerEvent::Query(query) => self.answer(query),
        }
    }

    fn answer(&self, query: TopologyQuery) {
        // A dropped reply receiver just means the asker gave up.
        let delivered = match query {
            TopologyQuery::ResolveMac { l3_ifindex, reply } => {
                reply.send(self.orch.resolve_mac(l3_ifindex)).is_ok()
            }
            TopologyQuery::IsL3Capable { ifindex, reply } => {
                reply.send(self.orch.is_l3_capable(ifindex)).is_ok()
            }
            TopologyQuery::PortBinding { port, vlan, reply } => {
                reply.send(self.orch.port_binding(port, vlan)).is_ok()
            }
            TopologyQuery::Stats { reply } => reply.send(self.orch.stats().clone()).is_ok(),
        };
        if !delivered {
            debug!("Query reply dropped");
        }
    }
}

//! Bulk read interface to the hardware abstraction plane (asicd).
//!
//! Every `get_bulk_*` call returns one page of at most `count` objects whose
//! marker is `>= start`, the marker to resume from, and whether more objects
//! remain. Markers are the objects' raw interface indices.

use crate::error::{ArpdError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sonic_types::IfIndex;
use std::fs;
use std::path::Path;

/// One page of a paginated bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPage<T> {
    pub items: Vec<T>,
    pub end_marker: u32,
    pub more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortState {
    pub ifindex: IfIndex,
    pub name: String,
    pub oper_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub ifindex: IfIndex,
    pub mac_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagConfig {
    pub ifindex: IfIndex,
    pub name: String,
    #[serde(default)]
    pub members: Vec<IfIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanConfig {
    pub vlan_id: u16,
    #[serde(default)]
    pub untagged: Vec<IfIndex>,
    #[serde(default)]
    pub tagged: Vec<IfIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanState {
    /// VLAN interface index (`IfIndex::vlan(vlan_id)`).
    pub ifindex: IfIndex,
    pub name: String,
    pub oper_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4IntfState {
    pub ifindex: IfIndex,
    /// CIDR notation, e.g. `10.0.0.1/24`.
    pub ip_addr: String,
    pub oper_state: String,
}

/// The paginated bulk API the loader reads from.
#[async_trait]
pub trait HwPlane: Send + Sync {
    async fn get_bulk_port_state(&self, start: u32, count: u32) -> Result<BulkPage<PortState>>;

    async fn get_bulk_port(&self, start: u32, count: u32) -> Result<BulkPage<PortConfig>>;

    async fn get_bulk_lag(&self, start: u32, count: u32) -> Result<BulkPage<LagConfig>>;

    async fn get_bulk_vlan(&self, start: u32, count: u32) -> Result<BulkPage<VlanConfig>>;

    async fn get_bulk_vlan_state(&self, start: u32, count: u32) -> Result<BulkPage<VlanState>>;

    async fn get_bulk_ipv4_intf_state(
        &self,
        start: u32,
        count: u32,
    ) -> Result<BulkPage<Ipv4IntfState>>;
}

/// A port as it appears in a topology snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPort {
    pub ifindex: IfIndex,
    pub name: String,
    #[serde(default = "default_oper_state")]
    pub oper_state: String,
    #[serde(default)]
    pub mac_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVlan {
    pub vlan_id: u16,
    pub name: String,
    #[serde(default = "default_oper_state")]
    pub oper_state: String,
    #[serde(default)]
    pub untagged: Vec<IfIndex>,
    #[serde(default)]
    pub tagged: Vec<IfIndex>,
}

/// Whole-device topology as served by [`SnapshotPlane`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    #[serde(default)]
    pub ports: Vec<SnapshotPort>,
    #[serde(default)]
    pub lags: Vec<LagConfig>,
    #[serde(default)]
    pub vlans: Vec<SnapshotVlan>,
    #[serde(default)]
    pub ipv4_intfs: Vec<Ipv4IntfState>,
}

fn default_oper_state() -> String {
    "DOWN".to_string()
}

/// Serves the bulk API from a JSON [`TopologySnapshot`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotPlane {
    snapshot: TopologySnapshot,
}

impl SnapshotPlane {
    pub fn new(snapshot: TopologySnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let snapshot = serde_json::from_str(&content).map_err(|e| {
            ArpdError::hw_plane(
                "LoadSnapshot",
                format!("{}: {}", path.display(), e),
            )
        })?;
        Ok(Self::new(snapshot))
    }

    pub fn snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }
}

/// Pages `items` keyed by raw interface index.
fn paginate<T, I>(items: I, start: u32, count: u32) -> BulkPage<T>
where
    I: IntoIterator<Item = (IfIndex, T)>,
{
    let mut keyed: Vec<(u32, T)> = items
        .into_iter()
        .map(|(idx, item)| (idx.as_u32(), item))
        .filter(|(marker, _)| *marker >= start)
        .collect();
    keyed.sort_by_key(|(marker, _)| *marker);

    let count = count as usize;
    let more = keyed.len() > count;
    keyed.truncate(count);
    let end_marker = keyed
        .last()
        .map(|(marker, _)| marker.saturating_add(1))
        .unwrap_or(start);

    BulkPage {
        items: keyed.into_iter().map(|(_, item)| item).collect(),
        end_marker,
        more,
    }
}

#[async_trait]
impl HwPlane for SnapshotPlane {
    async fn get_bulk_port_state(&self, start: u32, count: u32) -> Result<BulkPage<PortState>> {
        let items = self.snapshot.ports.iter().map(|p| {
            (
                p.ifindex,
                PortState {
                    ifindex: p.ifindex,
                    name: p.name.clone(),
                    oper_state: p.oper_state.clone(),
                },
            )
        });
        Ok(paginate(items, start, count))
    }

    async fn get_bulk_port(&self, start: u32, count: u32) -> Result<BulkPage<PortConfig>> {
        let items = self.snapshot.ports.iter().map(|p| {
            (
                p.ifindex,
                PortConfig {
                    ifindex: p.ifindex,
                    mac_addr: p.mac_addr.clone(),
                },
            )
        });
        Ok(paginate(items, start, count))
    }

    async fn get_bulk_lag(&self, start: u32, count: u32) -> Result<BulkPage<LagConfig>> {
        let items = self.snapshot.lags.iter().map(|l| (l.ifindex, l.clone()));
        Ok(paginate(items, start, count))
    }

    async fn get_bulk_vlan(&self, start: u32, count: u32) -> Result<BulkPage<VlanConfig>> {
        let items = self.snapshot.vlans.iter().map(|v| {
            (
                IfIndex::vlan(v.vlan_id),
                VlanConfig {
                    vlan_id: v.vlan_id,
                    untagged: v.untagged.clone(),
                    tagged: v.tagged.clone(),
                },
            )
        });
        Ok(paginate(items, start, count))
    }

    async fn get_bulk_vlan_state(&self, start: u32, count: u32) -> Result<BulkPage<VlanState>> {
        let items = self.snapshot.vlans.iter().map(|v| {
            let ifindex = IfIndex::vlan(v.vlan_id);
            (
                ifindex,
                VlanState {
                    ifindex,
                    name: v.name.clone(),
                    oper_state: v.oper_state.clone(),
                },
            )
        });
        Ok(paginate(items, start, count))
    }

    async fn get_bulk_ipv4_intf_state(
        &self,
        start: u32,
        count: u32,
    ) -> Result<BulkPage<Ipv4IntfState>> {
        let items = self
            .snapshot
            .ipv4_intfs
            .iter()
            .map(|intf| (intf.ifindex, intf.clone()));
        Ok(paginate(items, start, count))
    }
}

//! Startup bulk load of the topology from asicd.

use crate::asicd::{BulkPage, HwPlane, VlanState};
use crate::error::Result;
use crate::orch::TopologyOrch;
use crate::reconciler::decode_vlan_members;
use crate::types::{parse_oper_state, Lag, Port, RxState};
use sonic_types::{IfIndex, IfType, MacAddress, VlanId};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, info, instrument, warn};

/// Object counts after a bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub ports: usize,
    pub lags: usize,
    pub vlans: usize,
    pub l3_intfs: usize,
    pub capturing: usize,
}

/// Reads every page of one bulk stage. A failed read ends the stage and the
/// pages already read are kept. A zero page size or a marker that does not
/// move forward also ends the stage.
async fn fetch_all<T, F, Fut>(
    operation: &'static str,
    start: u32,
    page_size: u32,
    mut fetch: F,
) -> Vec<T>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<BulkPage<T>>>,
{
    let mut items = Vec::new();
    if page_size == 0 {
        warn!(operation, "Bulk page size is zero, skipping stage");
        return items;
    }
    let mut marker = start;
    loop {
        match fetch(marker, page_size).await {
            Ok(page) => {
                debug!(operation, marker, count = page.items.len(), more = page.more, "Read bulk page");
                items.extend(page.items);
                if !page.more {
                    break;
                }
                if page.end_marker <= marker {
                    warn!(operation, marker, end_marker = page.end_marker, "Bulk marker did not advance, ending stage");
                    break;
                }
                marker = page.end_marker;
            }
            Err(e) => {
                warn!(operation, marker, error = %e, "Bulk read failed, keeping pages already read");
                break;
            }
        }
    }
    items
}

impl TopologyOrch {
    /// Builds the store from asicd: port state, port config, LAGs, VLANs,
    /// then IPv4 interfaces, and finally arms capture on every up port.
    #[instrument(skip(self, plane))]
    pub async fn load_topology(&mut self, plane: &dyn HwPlane) -> LoadSummary {
        let page_size = self.config.page_size;
        let port_start = self.config.port_start_marker;

        let states = fetch_all("GetBulkPortState", port_start, page_size, |s, c| {
            plane.get_bulk_port_state(s, c)
        })
        .await;
        for state in states {
            if state.ifindex.if_type() != IfType::Port {
                warn!(ifindex = %state.ifindex, "Port state for non-port index");
                continue;
            }
            let mut port = Port::new(state.name);
            match parse_oper_state(&state.oper_state) {
                Some(up) => port.oper_up = up,
                None => warn!(
                    ifindex = %state.ifindex,
                    oper_state = %state.oper_state,
                    "Unknown port oper state, leaving port down"
                ),
            }
            self.store.insert_port(state.ifindex, port);
        }

        let configs = fetch_all("GetBulkPort", port_start, page_size, |s, c| {
            plane.get_bulk_port(s, c)
        })
        .await;
        for config in configs {
            let mac = match config.mac_addr.parse::<MacAddress>() {
                Ok(mac) if mac.is_zero() => {
                    debug!(ifindex = %config.ifindex, "Port has no MAC");
                    continue;
                }
                Ok(mac) => mac,
                Err(e) => {
                    warn!(ifindex = %config.ifindex, error = %e, "Ignoring port MAC");
                    continue;
                }
            };
            match self.store.port_mut(config.ifindex) {
                Some(port) => port.mac = Some(mac),
                None => debug!(ifindex = %config.ifindex, "Port config for unknown port"),
            }
        }

        let lags = fetch_all("GetBulkLag", 0, page_size, |s, c| plane.get_bulk_lag(s, c)).await;
        for config in lags {
            if config.ifindex.if_type() != IfType::Lag {
                warn!(ifindex = %config.ifindex, "LAG config for non-LAG index");
                continue;
            }
            let mut lag = Lag::new(config.name);
            for member in config.members {
                if self.store.contains_port(member) {
                    lag.ports.insert(member);
                } else {
                    warn!(lag = %config.ifindex, port = %member, "Dropping unknown LAG member");
                }
            }
            self.store.insert_lag(config.ifindex, lag);
        }

        self.load_vlans(plane, page_size).await;

        let intfs = fetch_all("GetBulkIPv4IntfState", 0, page_size, |s, c| {
            plane.get_bulk_ipv4_intf_state(s, c)
        })
        .await;
        for intf in intfs {
            self.ipv4_intf_create(intf.ifindex, &intf.ip_addr).await;
            let up = parse_oper_state(&intf.oper_state);
            match (self.store.l3_intf_mut(intf.ifindex), up) {
                (Some(l3), Some(up)) => l3.oper_up = up,
                (Some(_), None) => warn!(
                    ifindex = %intf.ifindex,
                    oper_state = %intf.oper_state,
                    "Unknown L3 oper state, leaving interface down"
                ),
                (None, _) => {}
            }
        }

        for port in self.store.port_indices() {
            self.enable_rx(port);
        }

        let summary = LoadSummary {
            ports: self.store.ports().count(),
            lags: self.store.lags().count(),
            vlans: self.store.vlans().count(),
            l3_intfs: self.store.l3_intfs().count(),
            capturing: self
                .store
                .ports()
                .filter(|(_, p)| p.rx_state() == RxState::UpCapturing)
                .count(),
        };
        info!(?summary, "Topology loaded");
        self.store.dump();
        summary
    }

    /// VLAN config and state are read separately and joined by VLAN
    /// interface index.
    async fn load_vlans(&mut self, plane: &dyn HwPlane, page_size: u32) {
        let configs = fetch_all("GetBulkVlan", 0, page_size, |s, c| plane.get_bulk_vlan(s, c)).await;
        let states = fetch_all("GetBulkVlanState", 0, page_size, |s, c| {
            plane.get_bulk_vlan_state(s, c)
        })
        .await;
        let mut names: HashMap<IfIndex, VlanState> =
            states.into_iter().map(|s| (s.ifindex, s)).collect();

        for config in configs {
            let Ok(vid) = VlanId::new(config.vlan_id) else {
                warn!(vlan_id = config.vlan_id, "Skipping VLAN with invalid id");
                continue;
            };
            let name = match names.remove(&IfIndex::vlan(config.vlan_id)) {
                Some(state) => state.name,
                None => {
                    warn!(%vid, "No VLAN state for configured VLAN");
                    String::new()
                }
            };
            let (untagged, tagged) =
                decode_vlan_members(config.vlan_id, &config.untagged, &config.tagged);
            self.apply_vlan_membership(vid, &name, untagged, tagged).await;
        }

        for ifindex in names.keys() {
            debug!(%ifindex, "VLAN state without config");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asicd::{
        Ipv4IntfState, LagConfig, SnapshotPlane, SnapshotPort, SnapshotVlan, TopologySnapshot,
    };
    use crate::capture::DisabledCapture;
    use crate::config::ChannelConfig;
    use crate::error::ArpdError;
    use crate::orch::{TopologyOrchConfig, TopologyReceivers, TopologySinks};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn orch_with_page_size(page_size: u32) -> (TopologyOrch, TopologyReceivers) {
        let (sinks, receivers) = TopologySinks::channel(&ChannelConfig::default());
        let config = TopologyOrchConfig {
            page_size,
            ..Default::default()
        };
        let orch = TopologyOrch::new(config, Arc::new(DisabledCapture), sinks);
        (orch, receivers)
    }

    fn snapshot() -> TopologySnapshot {
        let port = |id: u32, state: &str| SnapshotPort {
            ifindex: IfIndex::new(IfType::Port, id),
            name: format!("Ethernet{}", id),
            oper_state: state.to_string(),
            mac_addr: format!("00:aa:00:00:00:{:02x}", id),
        };
        TopologySnapshot {
            ports: vec![port(1, "UP"), port(2, "DOWN"), port(3, "BOGUS")],
            lags: vec![LagConfig {
                ifindex: IfIndex::new(IfType::Lag, 1),
                name: "PortChannel1".to_string(),
                members: vec![IfIndex::new(IfType::Port, 1), IfIndex::new(IfType::Port, 7)],
            }],
            vlans: vec![SnapshotVlan {
                vlan_id: 10,
                name: "Vlan10".to_string(),
                oper_state: "UP".to_string(),
                untagged: vec![IfIndex::new(IfType::Lag, 1)],
                tagged: vec![IfIndex::new(IfType::Port, 2)],
            }],
            ipv4_intfs: vec![
                Ipv4IntfState {
                    ifindex: IfIndex::vlan(10),
                    ip_addr: "10.0.0.1/24".to_string(),
                    oper_state: "UP".to_string(),
                },
                Ipv4IntfState {
                    ifindex: IfIndex::new(IfType::Port, 3),
                    ip_addr: "garbage".to_string(),
                    oper_state: "UP".to_string(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_load_from_snapshot() {
        let (mut orch, _rx) = orch_with_page_size(1);
        let plane = SnapshotPlane::new(snapshot());

        let summary = orch.load_topology(&plane).await;
        assert_eq!(
            summary,
            LoadSummary {
                ports: 3,
                lags: 1,
                vlans: 1,
                l3_intfs: 1,
                capturing: 0,
            }
        );

        let p1 = IfIndex::new(IfType::Port, 1);
        let store = orch.store();
        assert!(store.port(p1).unwrap().oper_up);
        assert!(!store.port(IfIndex::new(IfType::Port, 3)).unwrap().oper_up);
        assert_eq!(
            store.port(p1).unwrap().mac,
            Some("00:aa:00:00:00:01".parse().unwrap())
        );
        assert_eq!(store.lag(IfIndex::new(IfType::Lag, 1)).unwrap().ports.len(), 1);
        assert_eq!(store.vlan(IfIndex::vlan(10)).unwrap().name, "Vlan10");

        let vid = VlanId::new(10).unwrap();
        let binding = orch.port_binding(p1, vid).unwrap();
        assert_eq!(binding.lag, Some(IfIndex::new(IfType::Lag, 1)));
        assert!(orch.port_binding(IfIndex::new(IfType::Port, 2), vid).is_some());
        assert!(store.l3_intf(IfIndex::vlan(10)).unwrap().oper_up);
        assert_eq!(orch.stats().capture_failures, 1);
    }

    #[tokio::test]
    async fn test_zero_mac_left_unset() {
        let mut snap = snapshot();
        snap.ports[1].mac_addr = "00:00:00:00:00:00".to_string();
        let (mut orch, _rx) = orch_with_page_size(10);
        orch.load_topology(&SnapshotPlane::new(snap)).await;

        let store = orch.store();
        assert_eq!(store.port(IfIndex::new(IfType::Port, 2)).unwrap().mac, None);
        assert!(store.port(IfIndex::new(IfType::Port, 1)).unwrap().mac.is_some());
    }

    #[tokio::test]
    async fn test_zero_page_size_skips_stages() {
        let (mut orch, _rx) = orch_with_page_size(0);
        let summary = orch.load_topology(&SnapshotPlane::new(snapshot())).await;
        assert_eq!(summary, LoadSummary::default());
    }

    #[tokio::test]
    async fn test_fetch_all_stops_on_stalled_marker() {
        let mut calls = 0;
        let items = fetch_all("GetBulkLag", 5, 2, |start, _count| {
            calls += 1;
            async move {
                Ok::<_, ArpdError>(BulkPage {
                    items: vec![start],
                    end_marker: start,
                    more: true,
                })
            }
        })
        .await;
        assert_eq!(items, vec![5]);
        assert_eq!(calls, 1);
    }
}

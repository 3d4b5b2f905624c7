//! Incremental reconciliation of asicd notifications.
//!
//! Handlers run to completion one at a time on the owner task. Inconsistent
//! input (unknown indices, malformed addresses) is logged and skipped; no
//! handler error reaches the event loop.

use crate::l3_binding::L3Propagator;
use crate::notification::{AsicdNotification, IntfOp, NotifyKind};
use crate::orch::{ArpEntryDelete, TopologyOrch};
use crate::types::{L3Interface, L3Target, Lag, Member, Tagging, Vlan};
use sonic_types::{IfIndex, IfType, Ipv4IntfAddr, VlanId};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Old-versus-new membership difference. Unchanged members are in neither
/// list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> MembershipDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn diff_sets<T: Ord + Copy>(old: &BTreeSet<T>, new: &BTreeSet<T>) -> MembershipDiff<T> {
    MembershipDiff {
        added: new.difference(old).copied().collect(),
        removed: old.difference(new).copied().collect(),
    }
}

/// The four disjoint lists a VLAN membership update produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanDiff {
    pub untagged: MembershipDiff<Member>,
    pub tagged: MembershipDiff<Member>,
}

impl VlanDiff {
    pub fn compute(old: &Vlan, untagged: &BTreeSet<Member>, tagged: &BTreeSet<Member>) -> Self {
        Self {
            untagged: diff_sets(&old.untagged, untagged),
            tagged: diff_sets(&old.tagged, tagged),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.untagged.is_empty() && self.tagged.is_empty()
    }
}

/// Decodes a notification's member lists. Indices that are neither ports nor
/// LAGs are dropped, and a member listed both ways stays untagged.
pub fn decode_vlan_members(
    vlan_id: u16,
    untagged: &[IfIndex],
    tagged: &[IfIndex],
) -> (BTreeSet<Member>, BTreeSet<Member>) {
    let decode = |list: &[IfIndex]| -> BTreeSet<Member> {
        list.iter()
            .filter_map(|idx| {
                let member = Member::decode(*idx);
                if member.is_none() {
                    warn!(vlan_id, member = %idx, "Ignoring VLAN member that is not a port or LAG");
                }
                member
            })
            .collect()
    };

    let untagged = decode(untagged);
    let mut tagged = decode(tagged);
    tagged.retain(|member| {
        let dup = untagged.contains(member);
        if dup {
            warn!(vlan_id, member = %member.ifindex(), "Member listed tagged and untagged, keeping untagged");
        }
        !dup
    });
    (untagged, tagged)
}

impl TopologyOrch {
    /// Applies one asicd notification.
    #[instrument(skip(self, msg), fields(kind = msg.label()))]
    pub async fn handle_notification(&mut self, msg: AsicdNotification) {
        self.stats.notifications += 1;
        debug!(%msg, "Processing notification");

        match msg {
            AsicdNotification::Vlan {
                kind,
                vlan_id,
                name,
                untagged,
                tagged,
            } => match kind {
                NotifyKind::Create | NotifyKind::Update => {
                    self.vlan_update(vlan_id, &name, &untagged, &tagged).await
                }
                NotifyKind::Delete => self.vlan_delete(vlan_id).await,
            },
            AsicdNotification::Lag {
                kind,
                ifindex,
                name,
                members,
            } => match kind {
                NotifyKind::Create | NotifyKind::Update => {
                    self.lag_update(ifindex, &name, &members).await
                }
                NotifyKind::Delete => self.lag_delete(ifindex).await,
            },
            AsicdNotification::Ipv4Intf {
                op,
                ifindex,
                ip_addr,
            } => match op {
                IntfOp::Create => self.ipv4_intf_create(ifindex, &ip_addr).await,
                IntfOp::Delete => self.ipv4_intf_delete(ifindex).await,
            },
            AsicdNotification::L2State { ifindex, up } => self.l2_state_change(ifindex, up).await,
            AsicdNotification::L3State { ifindex, up } => self.l3_state_change(ifindex, up).await,
            AsicdNotification::MacMove(msg) => self.forward_mac_move(msg).await,
        }
    }

    /// VLAN create or update: diff the membership, apply removals then
    /// additions, and cascade bindings when the VLAN carries an address.
    pub async fn vlan_update(
        &mut self,
        vlan_id: u16,
        name: &str,
        untagged: &[IfIndex],
        tagged: &[IfIndex],
    ) {
        let Ok(vid) = VlanId::new(vlan_id) else {
            warn!(vlan_id, "Ignoring notification for invalid VLAN id");
            self.stats.notifications_skipped += 1;
            return;
        };
        let (untagged, tagged) = decode_vlan_members(vlan_id, untagged, tagged);
        self.apply_vlan_membership(vid, name, untagged, tagged).await;
    }

    pub(crate) async fn apply_vlan_membership(
        &mut self,
        vid: VlanId,
        name: &str,
        untagged: BTreeSet<Member>,
        tagged: BTreeSet<Member>,
    ) {
        let vlan_idx = IfIndex::vlan(vid.as_u16());

        let diff = {
            if self.store.vlan(vlan_idx).is_none() {
                info!(%vid, vlan_name = name, "Creating VLAN");
                self.store.insert_vlan(vlan_idx, Vlan::new(name));
            }
            let Some(entry) = self.store.vlan_mut(vlan_idx) else {
                return;
            };
            if !name.is_empty() {
                entry.name = name.to_string();
            }
            let diff = VlanDiff::compute(entry, &untagged, &tagged);
            if diff.is_empty() {
                debug!(%vid, "VLAN membership unchanged");
                return;
            }

            for member in diff.untagged.removed.iter().chain(&diff.tagged.removed) {
                entry.untagged.remove(member);
                entry.tagged.remove(member);
            }
            entry.untagged.extend(diff.untagged.added.iter().copied());
            entry.tagged.extend(diff.tagged.added.iter().copied());
            diff
        };

        let lag_changes = [
            (&diff.untagged.removed, Tagging::Untagged, false),
            (&diff.tagged.removed, Tagging::Tagged, false),
            (&diff.untagged.added, Tagging::Untagged, true),
            (&diff.tagged.added, Tagging::Tagged, true),
        ];
        for (members, tagging, add) in lag_changes {
            for member in members.iter() {
                if let Member::Lag(lag) = member {
                    if add {
                        self.store.lag_register_vlan(*lag, vid, tagging);
                    } else {
                        self.store.lag_unregister_vlan(*lag, vid, tagging);
                    }
                }
            }
        }

        debug!(%vid, ?diff, "VLAN membership updated");

        if !self.store.is_l3_capable(vlan_idx) {
            return;
        }
        let mut prop = L3Propagator::new(&mut self.store);
        for member in &diff.untagged.removed {
            prop.unbind_member(vlan_idx, vid, *member, Tagging::Untagged);
        }
        for member in &diff.tagged.removed {
            prop.unbind_member(vlan_idx, vid, *member, Tagging::Tagged);
        }
        for member in &diff.untagged.added {
            prop.bind_member(vlan_idx, vid, *member, Tagging::Untagged);
        }
        for member in &diff.tagged.added {
            prop.bind_member(vlan_idx, vid, *member, Tagging::Tagged);
        }
        let changes = prop.finish();
        self.apply_binding_changes(changes).await;
    }

    /// Removes a VLAN and every member, unbinding member ports first if the
    /// VLAN carries an address.
    pub async fn vlan_delete(&mut self, vlan_id: u16) {
        let Ok(vid) = VlanId::new(vlan_id) else {
            warn!(vlan_id, "Ignoring delete for invalid VLAN id");
            self.stats.notifications_skipped += 1;
            return;
        };
        let vlan_idx = IfIndex::vlan(vlan_id);
        let Some(members) = self
            .store
            .vlan(vlan_idx)
            .map(|vlan| vlan.members().collect::<Vec<_>>())
        else {
            debug!(%vid, "Delete for unknown VLAN");
            return;
        };

        if self.store.is_l3_capable(vlan_idx) {
            let mut prop = L3Propagator::new(&mut self.store);
            for (member, tagging) in &members {
                prop.unbind_member(vlan_idx, vid, *member, *tagging);
            }
            let changes = prop.finish();
            self.apply_binding_changes(changes).await;
        }

        for (member, tagging) in members {
            if let Member::Lag(lag) = member {
                self.store.lag_unregister_vlan(lag, vid, tagging);
            }
        }
        self.store.remove_vlan(vlan_idx);
        info!(%vid, "Deleted VLAN");
    }

    /// L3 scopes a LAG's member ports are bound under: the LAG's own address
    /// at the reserved VLAN, or else each addressed VLAN the LAG carries.
    fn lag_l3_scopes(&self, lag: IfIndex) -> Vec<(IfIndex, VlanId, Tagging)> {
        if self.store.is_l3_capable(lag) {
            return vec![(lag, VlanId::RESERVED, Tagging::Untagged)];
        }
        let Some(entry) = self.store.lag(lag) else {
            return Vec::new();
        };
        entry
            .vlans
            .iter()
            .map(|vid| (IfIndex::vlan(vid.as_u16()), *vid, entry.tagging_for(*vid)))
            .filter(|(vlan_idx, _, _)| self.store.is_l3_capable(*vlan_idx))
            .collect()
    }

    /// LAG create or update: diff the port set and bind or unbind the
    /// changed ports in every L3 scope of the LAG.
    pub async fn lag_update(&mut self, ifindex: IfIndex, name: &str, members: &[IfIndex]) {
        if ifindex.if_type() != IfType::Lag {
            warn!(%ifindex, "LAG notification for non-LAG index");
            self.stats.notifications_skipped += 1;
            return;
        }

        let new_ports: BTreeSet<IfIndex> = members
            .iter()
            .copied()
            .filter(|port| {
                let known = port.if_type() == IfType::Port && self.store.contains_port(*port);
                if !known {
                    warn!(lag = %ifindex, %port, "Dropping unknown LAG member");
                }
                known
            })
            .collect();

        if self.store.lag(ifindex).is_none() {
            info!(lag = %ifindex, lag_name = name, "Creating LAG");
            self.store.insert_lag(ifindex, Lag::new(name));
            self.store.lag_adopt_vlans(ifindex);
        }
        let Some(entry) = self.store.lag_mut(ifindex) else {
            return;
        };
        if !name.is_empty() {
            entry.name = name.to_string();
        }
        let diff = diff_sets(&entry.ports, &new_ports);
        if diff.is_empty() {
            debug!(lag = %ifindex, "LAG membership unchanged");
            return;
        }
        entry.ports = new_ports;
        debug!(lag = %ifindex, ?diff, "LAG membership updated");

        let scopes = self.lag_l3_scopes(ifindex);
        if scopes.is_empty() {
            return;
        }
        let mut prop = L3Propagator::new(&mut self.store);
        for (l3, vid, tagging) in &scopes {
            for port in &diff.removed {
                prop.unbind(*l3, *vid, Some(ifindex), *port, *tagging);
            }
        }
        for (l3, vid, tagging) in &scopes {
            for port in &diff.added {
                prop.bind(*l3, *vid, Some(ifindex), *port, *tagging);
            }
        }
        let changes = prop.finish();
        self.apply_binding_changes(changes).await;
    }

    /// Removes a LAG, unbinding its ports in every L3 scope first.
    pub async fn lag_delete(&mut self, ifindex: IfIndex) {
        let Some(ports) = self
            .store
            .lag(ifindex)
            .map(|lag| lag.ports.iter().copied().collect::<Vec<_>>())
        else {
            debug!(lag = %ifindex, "Delete for unknown LAG");
            return;
        };

        let scopes = self.lag_l3_scopes(ifindex);
        if !scopes.is_empty() {
            let mut prop = L3Propagator::new(&mut self.store);
            for (l3, vid, tagging) in &scopes {
                for port in &ports {
                    prop.unbind(*l3, *vid, Some(ifindex), *port, *tagging);
                }
            }
            let changes = prop.finish();
            self.apply_binding_changes(changes).await;
        }

        self.store.remove_lag(ifindex);
        info!(lag = %ifindex, "Deleted LAG");
    }

    /// Records an IPv4 interface and binds every port it reaches.
    #[instrument(skip(self))]
    pub async fn ipv4_intf_create(&mut self, ifindex: IfIndex, ip_addr: &str) {
        let addr: Ipv4IntfAddr = match ip_addr.parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "Dropping IPv4 interface with malformed address");
                self.stats.notifications_skipped += 1;
                return;
            }
        };
        let Some(target) = L3Target::decode(ifindex) else {
            warn!("IPv4 interface on unsupported interface type");
            self.stats.notifications_skipped += 1;
            return;
        };

        let name = match target {
            L3Target::Vlan { ifindex, .. } => self.store.vlan(ifindex).map(|v| v.name.clone()),
            L3Target::Lag(idx) => self.store.lag(idx).map(|l| l.name.clone()),
            L3Target::Port(idx) => self.store.port(idx).map(|p| p.name.clone()),
        }
        .unwrap_or_default();
        let oper_up = self
            .store
            .l3_intf(ifindex)
            .map(|intf| intf.oper_up)
            .unwrap_or(false);

        self.store.insert_l3_intf(
            ifindex,
            L3Interface {
                target,
                addr,
                name: name.clone(),
                oper_up,
            },
        );

        let mut prop = L3Propagator::new(&mut self.store);
        prop.bind_l3(ifindex);
        let changes = prop.finish();
        info!(intf_name = %name, %addr, bound = changes.bound, "Created IPv4 interface");
        self.apply_binding_changes(changes).await;
    }

    /// Unbinds every port the interface reaches, invalidating each once, and
    /// removes the interface.
    #[instrument(skip(self))]
    pub async fn ipv4_intf_delete(&mut self, ifindex: IfIndex) {
        if !self.store.is_l3_capable(ifindex) {
            debug!("Delete for unknown IPv4 interface");
            return;
        }

        let mut prop = L3Propagator::new(&mut self.store);
        prop.unbind_l3(ifindex);
        let changes = prop.finish();
        let unbound = changes.unbound;
        self.apply_binding_changes(changes).await;

        self.store.remove_l3_intf(ifindex);
        info!(unbound, "Deleted IPv4 interface");
    }

    /// L3 down flushes the interface's ARP entries before marking it down;
    /// L3 up marks it up and fires a probe.
    #[instrument(skip(self))]
    pub async fn l3_state_change(&mut self, ifindex: IfIndex, up: bool) {
        if !self.store.is_l3_capable(ifindex) {
            debug!("State change for unknown L3 interface");
            self.stats.notifications_skipped += 1;
            return;
        }

        if up {
            if let Some(intf) = self.store.l3_intf_mut(ifindex) {
                intf.oper_up = true;
            }
            self.spawn_probe(ifindex);
        } else {
            self.invalidate(ArpEntryDelete::ByL3(ifindex)).await;
            if let Some(intf) = self.store.l3_intf_mut(ifindex) {
                intf.oper_up = false;
            }
        }
    }

    /// Port down stops capture before marking the port down; port up marks
    /// it up before starting capture. Other interface types are ignored.
    #[instrument(skip(self))]
    pub async fn l2_state_change(&mut self, ifindex: IfIndex, up: bool) {
        if ifindex.if_type() != IfType::Port {
            debug!("Ignoring L2 state change for non-port interface");
            return;
        }

        if up {
            self.set_port_oper(ifindex, true);
            self.enable_rx(ifindex);
        } else {
            self.disable_rx(ifindex).await;
            self.set_port_oper(ifindex, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DisabledCapture;
    use crate::config::ChannelConfig;
    use crate::orch::{TopologyOrchConfig, TopologyReceivers, TopologySinks};
    use crate::types::Port;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn port(id: u32) -> IfIndex {
        IfIndex::new(IfType::Port, id)
    }

    fn lag(id: u32) -> IfIndex {
        IfIndex::new(IfType::Lag, id)
    }

    fn set(members: &[Member]) -> BTreeSet<Member> {
        members.iter().copied().collect()
    }

    fn orch_with_ports(count: u32) -> (TopologyOrch, TopologyReceivers) {
        let (sinks, receivers) = TopologySinks::channel(&ChannelConfig::default());
        let mut orch = TopologyOrch::new(
            TopologyOrchConfig::default(),
            Arc::new(DisabledCapture),
            sinks,
        );
        for id in 1..=count {
            orch.store
                .insert_port(port(id), Port::new(format!("Ethernet{}", id)));
        }
        (orch, receivers)
    }

    fn drain(rx: &mut TopologyReceivers) -> Vec<ArpEntryDelete> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.arp_delete.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_diff_sets() {
        let old: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let new: BTreeSet<u32> = [2, 3, 4].into_iter().collect();
        let diff = diff_sets(&old, &new);
        assert_eq!(diff.removed, vec![1]);
        assert_eq!(diff.added, vec![4]);
        assert!(diff_sets(&new, &new).is_empty());
    }

    #[test]
    fn test_vlan_diff_four_lists() {
        let mut old = Vlan::new("Vlan10");
        old.untagged = set(&[Member::Port(port(1)), Member::Port(port(2))]);
        old.tagged = set(&[Member::Lag(lag(1))]);

        let diff = VlanDiff::compute(
            &old,
            &set(&[Member::Port(port(2)), Member::Port(port(3))]),
            &set(&[Member::Port(port(1))]),
        );
        assert_eq!(diff.untagged.removed, vec![Member::Port(port(1))]);
        assert_eq!(diff.untagged.added, vec![Member::Port(port(3))]);
        assert_eq!(diff.tagged.removed, vec![Member::Lag(lag(1))]);
        assert_eq!(diff.tagged.added, vec![Member::Port(port(1))]);
    }

    #[test]
    fn test_decode_vlan_members_untagged_wins() {
        let (untagged, tagged) = decode_vlan_members(
            10,
            &[port(1), IfIndex::vlan(20)],
            &[port(1), port(2)],
        );
        assert_eq!(untagged, set(&[Member::Port(port(1))]));
        assert_eq!(tagged, set(&[Member::Port(port(2))]));
    }

    #[tokio::test]
    async fn test_vlan_update_registers_lags() {
        let (mut orch, _rx) = orch_with_ports(2);
        orch.lag_update(lag(1), "PortChannel1", &[port(1), port(2)]).await;

        orch.vlan_update(10, "Vlan10", &[lag(1)], &[]).await;
        let vid = VlanId::new(10).unwrap();
        let entry = orch.store.lag(lag(1)).unwrap();
        assert_eq!(entry.untagged_vlan, vid);
        assert!(entry.vlans.contains(&vid));

        orch.vlan_update(10, "Vlan10", &[], &[lag(1)]).await;
        let entry = orch.store.lag(lag(1)).unwrap();
        assert_eq!(entry.untagged_vlan, VlanId::RESERVED);
        assert!(entry.vlans.contains(&vid));

        orch.vlan_delete(10).await;
        assert!(orch.store.lag(lag(1)).unwrap().vlans.is_empty());
        assert!(orch.store.vlan(IfIndex::vlan(10)).is_none());
    }

    #[tokio::test]
    async fn test_invalid_vlan_id_is_skipped() {
        let (mut orch, _rx) = orch_with_ports(1);
        orch.vlan_update(0, "Vlan0", &[port(1)], &[]).await;
        orch.vlan_delete(4095).await;
        assert_eq!(orch.store.vlans().count(), 0);
        assert_eq!(orch.stats().notifications_skipped, 2);
    }

    #[tokio::test]
    async fn test_lag_update_drops_unknown_members() {
        let (mut orch, _rx) = orch_with_ports(2);
        orch.lag_update(lag(1), "PortChannel1", &[port(1), port(9), lag(2)])
            .await;
        let ports: Vec<_> = orch.store.lag(lag(1)).unwrap().ports.iter().copied().collect();
        assert_eq!(ports, vec![port(1)]);
    }

    #[tokio::test]
    async fn test_l3_lag_membership_change_binds_at_reserved_vlan() {
        let (mut orch, mut rx) = orch_with_ports(3);
        orch.lag_update(lag(1), "PortChannel1", &[port(1), port(2)]).await;
        orch.ipv4_intf_create(lag(1), "192.168.0.1/30").await;
        assert!(drain(&mut rx).is_empty());

        orch.lag_update(lag(1), "", &[port(2), port(3)]).await;
        assert_eq!(drain(&mut rx), vec![ArpEntryDelete::ByPort(port(1))]);
        assert!(orch.port_binding(port(1), VlanId::RESERVED).is_none());
        let binding = orch.port_binding(port(3), VlanId::RESERVED).unwrap();
        assert_eq!(binding.l3_ifindex, lag(1));
        assert_eq!(binding.lag, Some(lag(1)));
        assert_eq!(orch.store.lag(lag(1)).unwrap().name, "PortChannel1");
    }

    #[tokio::test]
    async fn test_lag_delete_unbinds_ports() {
        let (mut orch, mut rx) = orch_with_ports(2);
        orch.lag_update(lag(1), "PortChannel1", &[port(1), port(2)]).await;
        orch.vlan_update(10, "Vlan10", &[], &[lag(1)]).await;
        orch.ipv4_intf_create(IfIndex::vlan(10), "10.0.0.1/24").await;

        orch.lag_delete(lag(1)).await;
        assert_eq!(
            drain(&mut rx),
            vec![ArpEntryDelete::ByPort(port(1)), ArpEntryDelete::ByPort(port(2))]
        );
        assert!(orch.store.lag(lag(1)).is_none());
    }

    #[tokio::test]
    async fn test_ipv4_create_malformed_address_dropped() {
        let (mut orch, _rx) = orch_with_ports(1);
        orch.ipv4_intf_create(port(1), "10.0.0.300/24").await;
        orch.ipv4_intf_create(IfIndex::new(IfType::Loopback, 1), "1.1.1.1/32")
            .await;
        assert!(!orch.is_l3_capable(port(1)));
        assert_eq!(orch.stats().notifications_skipped, 2);
    }

    #[tokio::test]
    async fn test_ipv4_create_on_port_and_delete() {
        let (mut orch, mut rx) = orch_with_ports(1);
        orch.ipv4_intf_create(port(1), "172.16.0.1/16").await;
        assert!(orch.is_l3_capable(port(1)));
        assert_eq!(orch.store.l3_intf(port(1)).unwrap().name, "Ethernet1");
        assert!(orch.port_binding(port(1), VlanId::RESERVED).is_some());

        orch.ipv4_intf_delete(port(1)).await;
        assert!(!orch.is_l3_capable(port(1)));
        assert_eq!(drain(&mut rx), vec![ArpEntryDelete::ByPort(port(1))]);
        assert_eq!(orch.stats().bindings_removed, 1);
    }

    #[tokio::test]
    async fn test_l3_state_down_flushes_then_marks_down() {
        let (mut orch, mut rx) = orch_with_ports(1);
        orch.ipv4_intf_create(port(1), "172.16.0.1/16").await;
        orch.l3_state_change(port(1), true).await;
        assert!(orch.store.l3_intf(port(1)).unwrap().oper_up);
        let probe = rx.probe.recv().await.unwrap();
        assert_eq!(probe.l3_ifindex, port(1));
        assert_eq!(probe.ip, "172.16.0.1".parse::<std::net::Ipv4Addr>().unwrap());

        orch.l3_state_change(port(1), false).await;
        assert_eq!(drain(&mut rx), vec![ArpEntryDelete::ByL3(port(1))]);
        assert!(!orch.store.l3_intf(port(1)).unwrap().oper_up);
    }

    #[tokio::test]
    async fn test_l2_state_ignores_non_ports() {
        let (mut orch, _rx) = orch_with_ports(1);
        orch.l2_state_change(lag(1), true).await;
        orch.l2_state_change(port(1), true).await;
        assert!(orch.store.port(port(1)).unwrap().oper_up);
        orch.l2_state_change(port(1), false).await;
        assert!(!orch.store.port(port(1)).unwrap().oper_up);
    }
}

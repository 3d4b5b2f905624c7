//! L3 binding propagation through VLAN → LAG → port.
//!
//! An [`L3Propagator`] borrows the store for the duration of one handler,
//! applies binds and unbinds, and collects the ports whose ARP entries must be
//! invalidated. Each port is invalidated at most once per propagator.

use crate::topology::TopologyStore;
use crate::types::{L3Binding, L3Target, Member, Tagging};
use sonic_types::{IfIndex, VlanId};
use std::collections::BTreeSet;
use tracing::debug;

/// Net effect of one propagation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingChanges {
    pub bound: usize,
    pub unbound: usize,
    /// Ports needing a by-port ARP invalidation, in index order.
    pub invalidated: Vec<IfIndex>,
}

impl BindingChanges {
    pub fn is_empty(&self) -> bool {
        self.bound == 0 && self.unbound == 0 && self.invalidated.is_empty()
    }
}

/// A port reached by a cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CascadeTarget {
    port: IfIndex,
    lag: Option<IfIndex>,
    tagging: Tagging,
}

pub struct L3Propagator<'a> {
    store: &'a mut TopologyStore,
    invalidated: BTreeSet<IfIndex>,
    bound: usize,
    unbound: usize,
}

impl<'a> L3Propagator<'a> {
    pub fn new(store: &'a mut TopologyStore) -> Self {
        Self {
            store,
            invalidated: BTreeSet::new(),
            bound: 0,
            unbound: 0,
        }
    }

    /// Upserts `port`'s binding for `vlan` from the L3 interface's current
    /// address. Untagged binds also set the port's untagged VLAN.
    pub fn bind(
        &mut self,
        l3: IfIndex,
        vlan: VlanId,
        lag: Option<IfIndex>,
        port: IfIndex,
        tagging: Tagging,
    ) {
        let Some(intf) = self.store.l3_intf(l3) else {
            debug!(%l3, %port, "Bind skipped, no such L3 interface");
            return;
        };
        let binding = L3Binding {
            l3_ifindex: l3,
            ip: intf.ip(),
            netmask: intf.netmask(),
            lag,
        };

        let Some(entry) = self.store.port_mut(port) else {
            debug!(%l3, %port, "Bind skipped, no such port");
            return;
        };
        if tagging == Tagging::Untagged {
            entry.untagged_vlan = vlan;
        }
        entry.l3_bindings.insert(vlan, binding);
        self.bound += 1;
        debug!(%l3, %vlan, %port, tagging = tagging.as_str(), ip = %binding.ip, "Bound port");
    }

    /// Removes `port`'s binding for `vlan`. The port is queued for
    /// invalidation only if a binding existed.
    pub fn unbind(
        &mut self,
        l3: IfIndex,
        vlan: VlanId,
        lag: Option<IfIndex>,
        port: IfIndex,
        tagging: Tagging,
    ) {
        let Some(entry) = self.store.port_mut(port) else {
            debug!(%l3, %port, "Unbind skipped, no such port");
            return;
        };
        if tagging == Tagging::Untagged && entry.untagged_vlan == vlan {
            entry.untagged_vlan = VlanId::RESERVED;
        }
        if entry.l3_bindings.remove(&vlan).is_some() {
            self.unbound += 1;
            self.invalidated.insert(port);
            debug!(%l3, %vlan, ?lag, %port, tagging = tagging.as_str(), "Unbound port");
        }
    }

    /// Binds every port reachable through a VLAN member.
    pub fn bind_member(&mut self, l3: IfIndex, vlan: VlanId, member: Member, tagging: Tagging) {
        for target in self.member_targets(member, tagging) {
            self.bind(l3, vlan, target.lag, target.port, target.tagging);
        }
    }

    pub fn unbind_member(&mut self, l3: IfIndex, vlan: VlanId, member: Member, tagging: Tagging) {
        for target in self.member_targets(member, tagging) {
            self.unbind(l3, vlan, target.lag, target.port, target.tagging);
        }
    }

    /// Binds every port reachable from the L3 interface's target.
    pub fn bind_l3(&mut self, l3: IfIndex) {
        let Some(target) = self.store.l3_intf(l3).map(|intf| intf.target) else {
            return;
        };
        let vlan = target.vlan_id();
        for t in self.l3_targets(target) {
            self.bind(l3, vlan, t.lag, t.port, t.tagging);
        }
    }

    /// Mirror of [`bind_l3`](Self::bind_l3).
    pub fn unbind_l3(&mut self, l3: IfIndex) {
        let Some(target) = self.store.l3_intf(l3).map(|intf| intf.target) else {
            return;
        };
        let vlan = target.vlan_id();
        for t in self.l3_targets(target) {
            self.unbind(l3, vlan, t.lag, t.port, t.tagging);
        }
    }

    pub fn finish(self) -> BindingChanges {
        BindingChanges {
            bound: self.bound,
            unbound: self.unbound,
            invalidated: self.invalidated.into_iter().collect(),
        }
    }

    fn member_targets(&self, member: Member, tagging: Tagging) -> Vec<CascadeTarget> {
        let lag = match member {
            Member::Port(_) => None,
            Member::Lag(idx) => Some(idx),
        };
        self.store
            .member_ports(member)
            .into_iter()
            .map(|port| CascadeTarget { port, lag, tagging })
            .collect()
    }

    /// Ports reached from an L3 target, VLAN members first then LAG member
    /// ports, deduplicated by port.
    fn l3_targets(&self, target: L3Target) -> Vec<CascadeTarget> {
        let raw: Vec<CascadeTarget> = match target {
            L3Target::Vlan { ifindex, .. } => match self.store.vlan(ifindex) {
                Some(vlan) => vlan
                    .members()
                    .flat_map(|(member, tagging)| self.member_targets(member, tagging))
                    .collect(),
                None => Vec::new(),
            },
            L3Target::Lag(idx) => self.member_targets(Member::Lag(idx), Tagging::Untagged),
            L3Target::Port(idx) => self.member_targets(Member::Port(idx), Tagging::Untagged),
        };

        let mut seen = BTreeSet::new();
        raw.into_iter().filter(|t| seen.insert(t.port)).collect()
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::consts::*;
use crate::debug::Debug;
use crate::error::Error;
use crate::southbound::{
    FlowAction, FlowMatch, FlowMod, FlowModCommand, Ipv4Dst, Port, SwitchId,
    SwitchRef,
};

// Key identifying the forwarding rule of one multicast group on one switch.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct FlowKey {
    pub switch_id: SwitchId,
    pub group: Ipv4Addr,
}

// One installed forwarding rule: traffic for `group` entering `src_port` is
// flooded to every port in `dst_ports`.
//
// A flow entry is alive iff its destination set is non-empty; an empty entry
// is removed from the manager's collection instead of being reinstalled.
#[derive(Debug)]
pub struct FlowEntry {
    switch: SwitchRef,
    group: Ipv4Addr,
    src_port: Port,
    dst_ports: BTreeSet<Port>,
    idle_timeout: u16,
}

// Owner of all flow entries installed by this subsystem.
//
// The single mutex makes the three flow operations mutually exclusive: the
// underlying forwarding primitive replaces a rule by deleting and recreating
// it, and no concurrent writer may observe the gap in between.
#[derive(Debug)]
pub struct FlowManager {
    flows: Mutex<BTreeMap<FlowKey, FlowEntry>>,
    idle_timeout: u16,
}

// ===== impl FlowEntry =====

impl FlowEntry {
    fn new(
        switch: SwitchRef,
        group: Ipv4Addr,
        src_port: Port,
        dst_port: Port,
        idle_timeout: u16,
    ) -> FlowEntry {
        FlowEntry {
            switch,
            group,
            src_port,
            dst_ports: [dst_port].into(),
            idle_timeout,
        }
    }

    fn contains_dst_port(&self, port: Port) -> bool {
        self.dst_ports.contains(&port)
    }

    fn add_dst_port(&mut self, port: Port) -> bool {
        self.dst_ports.insert(port)
    }

    fn remove_dst_port(&mut self, port: Port) -> bool {
        self.dst_ports.remove(&port)
    }

    fn is_alive(&self) -> bool {
        !self.dst_ports.is_empty()
    }

    // Materializes this entry as a flow table operation.
    pub(crate) fn flow_mod(&self, command: FlowModCommand) -> FlowMod {
        let pattern = FlowMatch {
            in_port: Some(self.src_port),
            eth_type: ETHERTYPE_IPV4,
            ip_proto: None,
            ipv4_dst: Some(Ipv4Dst::Exact(self.group)),
        };
        let actions = match command {
            FlowModCommand::Delete => vec![],
            FlowModCommand::Add | FlowModCommand::Modify => self
                .dst_ports
                .iter()
                .map(|port| FlowAction::Output(*port))
                .collect(),
        };
        FlowMod {
            command,
            pattern,
            actions,
            priority: GROUP_FLOW_PRIORITY,
            cookie: APP_COOKIE,
            idle_timeout: self.idle_timeout,
            hard_timeout: FLOW_HARD_TIMEOUT,
        }
    }

    // Writes this entry to the switch. Failures are logged and otherwise
    // swallowed; the in-memory state stays authoritative and the next
    // mutation of the same key resynchronizes the switch.
    fn write(&self, command: FlowModCommand) {
        let flow_mod = self.flow_mod(command);
        if let Err(error) = self.switch.write_flow(&flow_mod) {
            Error::SwitchWrite(self.switch.id(), error).log();
        }
    }

    fn install(&self) {
        Debug::FlowInstall(
            self.switch.id(),
            self.group,
            self.src_port,
            &self.dst_ports,
        )
        .log();
        self.write(FlowModCommand::Add);
    }

    fn remove(&self) {
        self.write(FlowModCommand::Delete);
    }
}

// ===== impl FlowManager =====

impl FlowManager {
    pub fn new(idle_timeout: u16) -> FlowManager {
        FlowManager {
            flows: Mutex::new(BTreeMap::new()),
            idle_timeout,
        }
    }

    // Adds `dst_port` to the fan-out of (switch, group), creating and
    // installing the flow entry if this is its first destination.
    //
    // The forwarding primitive replaces the whole action list, so growing an
    // existing entry removes the installed rule and reinstalls it with the
    // cumulative destination set.
    pub fn add_flow(
        &self,
        switch: &SwitchRef,
        src_port: Port,
        dst_port: Port,
        group: Ipv4Addr,
    ) {
        let mut flows = self.flows.lock().unwrap();
        let key = FlowKey {
            switch_id: switch.id(),
            group,
        };
        match flows.entry(key) {
            Entry::Occupied(mut entry) => {
                let flow = entry.get_mut();
                if !flow.contains_dst_port(dst_port) {
                    flow.remove();
                    flow.add_dst_port(dst_port);
                    flow.install();
                }
            }
            Entry::Vacant(entry) => {
                let flow = FlowEntry::new(
                    switch.clone(),
                    group,
                    src_port,
                    dst_port,
                    self.idle_timeout,
                );
                flow.install();
                entry.insert(flow);
            }
        }
    }

    // Removes `dst_port` from the fan-out of (switch, group). When the last
    // destination goes away the entry is deleted outright; an empty rule is
    // never reinstalled.
    pub fn remove_flow(
        &self,
        switch_id: SwitchId,
        dst_port: Port,
        group: Ipv4Addr,
    ) {
        let mut flows = self.flows.lock().unwrap();
        let key = FlowKey { switch_id, group };
        if let Some(flow) = flows.get_mut(&key) {
            if flow.contains_dst_port(dst_port) {
                Debug::FlowUninstall(switch_id, group, dst_port).log();
                flow.remove();
                flow.remove_dst_port(dst_port);
                if flow.is_alive() {
                    flow.install();
                } else {
                    flows.remove(&key);
                }
            }
        }
    }

    // Deletes the whole (switch, group) entry regardless of how many
    // destinations it has. Used when a transmitter disappears and its entire
    // fan-out must go away at once.
    pub fn remove_all_flows(&self, switch_id: SwitchId, group: Ipv4Addr) {
        let mut flows = self.flows.lock().unwrap();
        let key = FlowKey { switch_id, group };
        if let Some(flow) = flows.remove(&key) {
            Debug::FlowTeardown(switch_id, group).log();
            flow.remove();
        }
    }

    // Returns the current destination set of (switch, group), if a flow entry
    // exists for it.
    pub fn dst_ports(
        &self,
        switch_id: SwitchId,
        group: Ipv4Addr,
    ) -> Option<BTreeSet<Port>> {
        let flows = self.flows.lock().unwrap();
        let key = FlowKey { switch_id, group };
        flows.get(&key).map(|flow| flow.dst_ports.clone())
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::southbound::testing::MockSwitch;

    fn flow_entry() -> (Arc<MockSwitch>, FlowEntry) {
        let switch = MockSwitch::new(1);
        let entry = FlowEntry::new(
            switch.clone(),
            Ipv4Addr::new(239, 1, 1, 1),
            Port(1),
            Port(2),
            180,
        );
        (switch, entry)
    }

    #[test]
    fn flow_mod_add() {
        let (_, mut entry) = flow_entry();
        entry.add_dst_port(Port(3));

        let flow_mod = entry.flow_mod(FlowModCommand::Add);
        assert_eq!(flow_mod.command, FlowModCommand::Add);
        assert_eq!(flow_mod.pattern.in_port, Some(Port(1)));
        assert_eq!(flow_mod.pattern.eth_type, ETHERTYPE_IPV4);
        assert_eq!(
            flow_mod.pattern.ipv4_dst,
            Some(Ipv4Dst::Exact(Ipv4Addr::new(239, 1, 1, 1)))
        );
        assert_eq!(
            flow_mod.actions,
            vec![FlowAction::Output(Port(2)), FlowAction::Output(Port(3))]
        );
        assert_eq!(flow_mod.priority, GROUP_FLOW_PRIORITY);
        assert_eq!(flow_mod.cookie, APP_COOKIE);
        assert_eq!(flow_mod.idle_timeout, 180);
        assert_eq!(flow_mod.hard_timeout, FLOW_HARD_TIMEOUT);
    }

    #[test]
    fn flow_mod_modify_replaces_action_list() {
        let (_, mut entry) = flow_entry();
        entry.add_dst_port(Port(4));
        entry.remove_dst_port(Port(2));

        let flow_mod = entry.flow_mod(FlowModCommand::Modify);
        assert_eq!(flow_mod.command, FlowModCommand::Modify);
        assert_eq!(flow_mod.actions, vec![FlowAction::Output(Port(4))]);
    }

    #[test]
    fn flow_mod_delete_has_no_actions() {
        let (_, entry) = flow_entry();
        let flow_mod = entry.flow_mod(FlowModCommand::Delete);
        assert_eq!(flow_mod.command, FlowModCommand::Delete);
        assert!(flow_mod.actions.is_empty());
        // The match must be identical to the one the rule was installed
        // with, or the switch won't find it.
        assert_eq!(flow_mod.pattern, entry.flow_mod(FlowModCommand::Add).pattern);
    }

    #[test]
    fn dst_ports_are_unique() {
        let (_, mut entry) = flow_entry();
        assert!(!entry.add_dst_port(Port(2)));
        assert!(entry.add_dst_port(Port(3)));
        assert_eq!(entry.dst_ports.len(), 2);
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use tracing::debug;

use crate::host::HostKey;
use crate::manager::Role;
use crate::packet::Packet;
use crate::southbound::{Port, SwitchId};

// Multicast snooping debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    SwitchConfigured(SwitchId),
    PacketRx(SwitchId, Port, &'a Packet),
    HostAdd(Role, &'a HostKey, Ipv4Addr),
    HostRefresh(Role, &'a HostKey),
    HostRemove(Role, &'a HostKey),
    HostEvict(Role, &'a HostKey, u32),
    QueryTx(&'a HostKey),
    FlowInstall(SwitchId, Ipv4Addr, Port, &'a BTreeSet<Port>),
    FlowUninstall(SwitchId, Ipv4Addr, Port),
    FlowTeardown(SwitchId, Ipv4Addr),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::SwitchConfigured(switch_id) => {
                debug!(%switch_id, "{}", self);
            }
            Debug::PacketRx(switch_id, port, packet) => {
                let data = serde_json::to_string(&packet).unwrap();
                debug!(%switch_id, %port, %data, "{}", self);
            }
            Debug::HostAdd(role, key, ip) => {
                debug!(%role, switch_id = %key.switch_id, port = %key.port,
                    mac = %key.mac, group = %key.group, %ip, "{}", self);
            }
            Debug::HostRefresh(role, key)
            | Debug::HostRemove(role, key) => {
                debug!(%role, switch_id = %key.switch_id, port = %key.port,
                    mac = %key.mac, group = %key.group, "{}", self);
            }
            Debug::HostEvict(role, key, age) => {
                debug!(%role, switch_id = %key.switch_id, port = %key.port,
                    mac = %key.mac, group = %key.group, %age, "{}", self);
            }
            Debug::QueryTx(key) => {
                debug!(switch_id = %key.switch_id, port = %key.port,
                    group = %key.group, "{}", self);
            }
            Debug::FlowInstall(switch_id, group, src_port, dst_ports) => {
                debug!(%switch_id, %group, %src_port, ?dst_ports, "{}", self);
            }
            Debug::FlowUninstall(switch_id, group, dst_port) => {
                debug!(%switch_id, %group, %dst_port, "{}", self);
            }
            Debug::FlowTeardown(switch_id, group) => {
                debug!(%switch_id, %group, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SwitchConfigured(..) => {
                write!(f, "default rules installed")
            }
            Debug::PacketRx(..) => {
                write!(f, "packet")
            }
            Debug::HostAdd(..) => {
                write!(f, "host added")
            }
            Debug::HostRefresh(..) => {
                write!(f, "host refreshed")
            }
            Debug::HostRemove(..) => {
                write!(f, "host removed")
            }
            Debug::HostEvict(..) => {
                write!(f, "host aged out")
            }
            Debug::QueryTx(..) => {
                write!(f, "membership query")
            }
            Debug::FlowInstall(..) => {
                write!(f, "flow installed")
            }
            Debug::FlowUninstall(..) => {
                write!(f, "flow destination removed")
            }
            Debug::FlowTeardown(..) => {
                write!(f, "flow torn down")
            }
        }
    }
}

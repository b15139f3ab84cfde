//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use mcast_utils::mac_addr::MacAddr;
use serde::Serialize;

use crate::consts::*;
use crate::error::Error;
use crate::packet::encap::{self, EthernetHdr, Ipv4Hdr};
use crate::packet::Packet;
use crate::southbound::{Port, SwitchId, SwitchRef};

// Identity of a tracked host: the source IP is deliberately not part of it,
// so a host that renumbers keeps its membership state.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct HostKey {
    pub switch_id: SwitchId,
    pub port: Port,
    pub mac: MacAddr,
    pub group: Ipv4Addr,
}

// Membership association of one host: (group, switch, port). Knows how to
// render an outbound membership query for that association.
#[derive(Debug)]
pub struct QueryEntry {
    group: Ipv4Addr,
    group_mac: MacAddr,
    switch: SwitchRef,
    port: Port,
}

// One tracked host (transmitter or listener).
#[derive(Debug)]
pub struct HostEntry {
    mac: MacAddr,
    ip: Ipv4Addr,
    // Seconds since the last sighting, incremented by the aging sweep.
    age: u32,
    created: DateTime<Utc>,
    query: QueryEntry,
}

// External representation of a tracked host.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HostView {
    pub mac: String,
    pub ip: String,
    pub group: String,
    pub switch_id: String,
    pub port_id: u32,
    pub active_time: u32,
}

// ===== impl QueryEntry =====

impl QueryEntry {
    pub(crate) fn new(
        group: Ipv4Addr,
        switch: SwitchRef,
        port: Port,
    ) -> QueryEntry {
        QueryEntry {
            group,
            group_mac: MacAddr::multicast_for_v4(group),
            switch,
            port,
        }
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    pub fn switch(&self) -> &SwitchRef {
        &self.switch
    }

    pub fn port(&self) -> Port {
        self.port
    }

    // Builds a group-specific membership query, encapsulates it in IPv4 and
    // Ethernet, and transmits it toward this host's port.
    pub(crate) fn send_query(
        &self,
        max_response_time: u32,
        router_mac: MacAddr,
        router_ip: Ipv4Addr,
    ) -> Result<(), Error> {
        // Max response time is carried in tenths of a second on the wire.
        let max_resp_time =
            u8::try_from(max_response_time.saturating_mul(10))
                .unwrap_or(u8::MAX);
        let packet = Packet::new_query(self.group, max_resp_time);

        let eth_hdr = EthernetHdr {
            dst: self.group_mac,
            src: router_mac,
            ethertype: ETHERTYPE_IPV4,
        };
        let ip_hdr = Ipv4Hdr {
            src: router_ip,
            dst: self.group,
            protocol: IP_PROTO_IGMP,
            ttl: QUERY_TTL,
        };
        let frame = encap::encapsulate(&eth_hdr, &ip_hdr, packet.encode());

        self.switch.send_packet(self.port, &frame).map_err(|error| {
            Error::PacketSend(self.switch.id(), self.port, error)
        })
    }
}

// ===== impl HostEntry =====

impl HostEntry {
    pub(crate) fn new(
        switch: SwitchRef,
        port: Port,
        mac: MacAddr,
        ip: Ipv4Addr,
        group: Ipv4Addr,
    ) -> HostEntry {
        HostEntry {
            mac,
            ip,
            age: 0,
            created: Utc::now(),
            query: QueryEntry::new(group, switch, port),
        }
    }

    // Resets the age and picks up an address change, keeping the identity.
    pub(crate) fn refresh(&mut self, ip: Ipv4Addr) {
        if self.ip != ip {
            self.ip = ip;
        }
        self.age = 0;
    }

    pub(crate) fn bump_age(&mut self) -> u32 {
        self.age += 1;
        self.age
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn query(&self) -> &QueryEntry {
        &self.query
    }

    pub(crate) fn view(&self, key: &HostKey) -> HostView {
        HostView {
            mac: self.mac.to_string(),
            ip: self.ip.to_string(),
            group: key.group.to_string(),
            switch_id: key.switch_id.to_string(),
            port_id: key.port.0,
            active_time: self.age,
        }
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use ipnetwork::Ipv4Network;

// Application ID carried in the top bits of every flow cookie, so rules
// installed by this subsystem can be identified and filtered.
pub const APP_ID: u64 = 10;
pub const APP_ID_BITS: u32 = 12;
pub const APP_COOKIE: u64 = (APP_ID & ((1 << APP_ID_BITS) - 1)) << (64 - APP_ID_BITS);

// Flow rule priorities. Group-specific flows must win over the catch-all
// rules that punt multicast traffic to the controller.
pub const DEFAULT_RULE_PRIORITY: u16 = 10;
pub const GROUP_FLOW_PRIORITY: u16 = 20;

// The default catch-all rules never expire; group flows use the configured
// idle timeout and no hard timeout.
pub const DEFAULT_RULE_IDLE_TIMEOUT: u16 = 0;
pub const FLOW_HARD_TIMEOUT: u16 = 0;

// EtherType for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

// IPv4 protocol number for IGMP.
pub const IP_PROTO_IGMP: u8 = 2;

// The IPv4 multicast address block (224.0.0.0/4).
pub static MULTICAST_NET: Lazy<Ipv4Network> = Lazy::new(|| {
    Ipv4Network::new(Ipv4Addr::new(224, 0, 0, 0), 4).unwrap()
});

// IGMPv2 Leave Group messages are addressed to the all-routers group.
pub const LEAVE_GROUP_DST: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);

// TTL of encapsulated membership queries (link-local only).
pub const QUERY_TTL: u8 = 1;

// Period of the host aging sweep, in seconds.
pub const SWEEP_INTERVAL: u64 = 1;

// Grace period granted to an in-flight sweep when stopping a host manager,
// in seconds.
pub const STOP_GRACE_PERIOD: u64 = 5;

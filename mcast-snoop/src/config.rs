//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use mcast_utils::mac_addr::MacAddr;
use serde::Deserialize;

// Default configuration values.
const DFLT_ROUTER_MAC: MacAddr =
    MacAddr::new([0x00, 0x50, 0x56, 0xaa, 0xaa, 0xaa]);
const DFLT_ROUTER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);
const DFLT_FLOW_IDLE_TIMEOUT: u16 = 180;
const DFLT_TRANSMITTER_MAX_AGE: u32 = 300;
const DFLT_QUERY_INTERVAL: u32 = 125;
const DFLT_MAX_RESPONSE_TIME: u32 = 10;
const DFLT_QUERY_FREQUENCY: u32 = 1;

// Engine configuration.
//
// All timing values are in seconds and must be strictly positive; they are
// validated when the host managers are constructed.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // Source MAC address of generated membership queries.
    pub router_mac: MacAddr,
    // Source IP address of generated membership queries.
    pub router_ip: Ipv4Addr,
    // Idle timeout applied to group-specific flow rules.
    pub flow_idle_timeout: u16,
    // Seconds without traffic before a transmitter is evicted.
    pub transmitter_max_age: u32,
    // Seconds without a report before a listener starts being queried.
    pub query_interval: u32,
    // Response window granted to queried listeners before eviction.
    pub max_response_time: u32,
    // Seconds between repeated queries to an idle listener.
    pub query_frequency: u32,
}

// ===== impl Config =====

impl Default for Config {
    fn default() -> Config {
        Config {
            router_mac: DFLT_ROUTER_MAC,
            router_ip: DFLT_ROUTER_IP,
            flow_idle_timeout: DFLT_FLOW_IDLE_TIMEOUT,
            transmitter_max_age: DFLT_TRANSMITTER_MAX_AGE,
            query_interval: DFLT_QUERY_INTERVAL,
            max_response_time: DFLT_MAX_RESPONSE_TIME,
            query_frequency: DFLT_QUERY_FREQUENCY,
        }
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//
//
// Boundary to the underlying switch/forwarding layer. The engine only ever
// talks to switches through the `Switch` trait; the concrete OpenFlow (or
// other) transport lives in the host application.
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use mcast_utils::mac_addr::MacAddr;
use serde::{Deserialize, Serialize};

// Switch datapath identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SwitchId(pub u64);

// Switch port identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Port(pub u32);

// Match half of a flow rule.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct FlowMatch {
    pub in_port: Option<Port>,
    pub eth_type: u16,
    pub ip_proto: Option<u8>,
    pub ipv4_dst: Option<Ipv4Dst>,
}

// IPv4 destination match, exact or masked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Ipv4Dst {
    Exact(Ipv4Addr),
    Masked(Ipv4Network),
}

// Action half of a flow rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum FlowAction {
    Output(Port),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum FlowModCommand {
    Add,
    Modify,
    Delete,
}

// One flow table operation, ready to be written to a switch.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct FlowMod {
    pub command: FlowModCommand,
    pub pattern: FlowMatch,
    pub actions: Vec<FlowAction>,
    pub priority: u16,
    pub cookie: u64,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
}

// Abstraction of one attached switch.
pub trait Switch: Send + Sync + std::fmt::Debug {
    // Datapath identifier of this switch.
    fn id(&self) -> SwitchId;

    // Writes a flow table operation to the switch.
    fn write_flow(&self, flow_mod: &FlowMod) -> Result<(), std::io::Error>;

    // Transmits a raw frame out of the given port.
    fn send_packet(&self, port: Port, data: &[u8])
    -> Result<(), std::io::Error>;
}

pub type SwitchRef = Arc<dyn Switch>;

// ===== impl SwitchId =====

impl std::fmt::Display for SwitchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ===== impl Port =====

impl Port {
    // Logical port addressing the controller itself (OpenFlow convention).
    pub const CONTROLLER: Port = Port(0xffff_fffd);
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Port::CONTROLLER {
            write!(f, "controller")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ===== testing support =====

#[cfg(feature = "testing")]
pub mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    // In-memory switch that records every write, used by the test suite in
    // place of a real forwarding backend.
    #[derive(Debug, Default)]
    pub struct MockSwitch {
        id: u64,
        pub flow_mods: Mutex<Vec<FlowMod>>,
        pub packets: Mutex<Vec<(Port, Vec<u8>)>>,
        pub fail_writes: AtomicBool,
    }

    impl MockSwitch {
        pub fn new(id: u64) -> Arc<MockSwitch> {
            Arc::new(MockSwitch {
                id,
                ..Default::default()
            })
        }

        // Makes all subsequent flow writes and packet transmissions fail.
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::Relaxed);
        }

        pub fn flow_mods(&self) -> Vec<FlowMod> {
            self.flow_mods.lock().unwrap().clone()
        }

        pub fn packets(&self) -> Vec<(Port, Vec<u8>)> {
            self.packets.lock().unwrap().clone()
        }
    }

    impl Switch for MockSwitch {
        fn id(&self) -> SwitchId {
            SwitchId(self.id)
        }

        fn write_flow(
            &self,
            flow_mod: &FlowMod,
        ) -> Result<(), std::io::Error> {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(std::io::Error::other("flow write failed"));
            }
            self.flow_mods.lock().unwrap().push(flow_mod.clone());
            Ok(())
        }

        fn send_packet(
            &self,
            port: Port,
            data: &[u8],
        ) -> Result<(), std::io::Error> {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(std::io::Error::other("packet send failed"));
            }
            self.packets.lock().unwrap().push((port, data.to_vec()));
            Ok(())
        }
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::Error;
use crate::events::{self, PacketDisposition};
use crate::flow::FlowManager;
use crate::host::HostView;
use crate::manager::HostManager;
use crate::southbound::{Port, SwitchId, SwitchRef};

// One multicast snooping engine: the two host managers, the flow manager
// they share, and the set of switches already carrying the default rules.
#[derive(Debug)]
pub struct Instance {
    pub config: Config,
    pub transmitters: Arc<HostManager>,
    pub listeners: Arc<HostManager>,
    pub flow_manager: Arc<FlowManager>,
    pub configured_switches: Mutex<BTreeSet<SwitchId>>,
    pub statistics: Statistics,
}

// Frame classification counters.
#[derive(Debug, Default)]
pub struct Statistics {
    pub frames_rx: Counter,
    pub data_frames_rx: Counter,
    pub reports_rx: Counter,
    pub leaves_rx: Counter,
    pub frames_dropped: Counter,
}

// Monotonic counter shared by the packet processing paths.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

// ===== impl Instance =====

impl Instance {
    // Creates an engine from the given configuration, validating it in the
    // process. The aging machinery isn't running yet; see `start`.
    pub fn new(config: Config) -> Result<Instance, Error> {
        let flow_manager =
            Arc::new(FlowManager::new(config.flow_idle_timeout));
        let transmitters = HostManager::transmitter(
            config.transmitter_max_age,
            flow_manager.clone(),
            config.router_mac,
            config.router_ip,
        )?;
        let listeners = HostManager::listener(
            config.query_interval,
            config.max_response_time,
            config.query_frequency,
            flow_manager.clone(),
            config.router_mac,
            config.router_ip,
        )?;
        transmitters.register_peer(&listeners);
        listeners.register_peer(&transmitters);

        Ok(Instance {
            config,
            transmitters,
            listeners,
            flow_manager,
            configured_switches: Mutex::new(BTreeSet::new()),
            statistics: Statistics::default(),
        })
    }

    // Starts the periodic aging sweeps of both host managers.
    pub fn start(&self) {
        self.transmitters.start_machine();
        self.listeners.start_machine();
    }

    // Stops the aging sweeps, waiting for in-flight passes to finish.
    pub async fn stop(&self) {
        self.transmitters.stop_machine().await;
        self.listeners.stop_machine().await;
    }

    // Processes one frame punted to the controller.
    pub fn process_frame(
        &self,
        switch: &SwitchRef,
        port: Port,
        data: &[u8],
    ) -> PacketDisposition {
        events::process_frame(self, switch, port, data)
    }

    pub fn list_transmitters(&self) -> Vec<HostView> {
        self.transmitters.hosts()
    }

    pub fn list_listeners(&self) -> Vec<HostView> {
        self.listeners.hosts()
    }

    pub fn list_transmitters_by_group(
        &self,
        group: Ipv4Addr,
    ) -> Vec<HostView> {
        self.transmitters.hosts_by_group(group)
    }

    pub fn list_listeners_by_group(&self, group: Ipv4Addr) -> Vec<HostView> {
        self.listeners.hosts_by_group(group)
    }
}

// ===== impl Counter =====

impl Counter {
    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::Duration;

use mcast_utils::mac_addr::MacAddr;
use mcast_utils::task::IntervalTask;

use crate::consts::*;
use crate::debug::Debug;
use crate::error::{Error, TimerParam};
use crate::flow::FlowManager;
use crate::host::{HostEntry, HostKey, HostView};
use crate::southbound::{Port, SwitchId, SwitchRef};
use crate::tasks;

// The two kinds of hosts the engine tracks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Transmitter,
    Listener,
}

// Role-specific aging behavior, applied once per second to every entry.
#[derive(Clone, Copy, Debug)]
enum Policy {
    // Transmitters are evicted silently once their age reaches the limit.
    Transmitter { max_age: u32 },
    // Listeners are probed with membership queries during the response
    // window before the eviction deadline; a report resets the age.
    Listener {
        query_interval: u32,
        max_response_time: u32,
        query_frequency: u32,
    },
}

// Tracks one population of hosts (transmitters or listeners) and keeps the
// flow table consistent with it.
//
// The two managers of an engine are cross-registered as peers: a host
// addition on one side consults the other side's ports to compute the flow
// fan-out.
#[derive(Debug)]
pub struct HostManager {
    role: Role,
    policy: Policy,
    hosts: RwLock<BTreeMap<HostKey, HostEntry>>,
    // Copy-on-write snapshot of the key set, swapped at the end of every
    // write-locked mutation. Cross-manager lookups read this instead of
    // `hosts`: each manager calls into its peer while holding its own write
    // lock, and taking the peer's entry-set lock there would let the two
    // managers wait on each other.
    keys: Mutex<Arc<BTreeSet<HostKey>>>,
    peer: OnceLock<Weak<HostManager>>,
    flow_manager: Arc<FlowManager>,
    // Source addresses of generated membership queries.
    router_mac: MacAddr,
    router_ip: Ipv4Addr,
    sweeper: Mutex<Option<IntervalTask>>,
}

// ===== impl Role =====

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Transmitter => write!(f, "transmitter"),
            Role::Listener => write!(f, "listener"),
        }
    }
}

// ===== impl HostManager =====

impl HostManager {
    // Creates a manager for multicast transmitters.
    pub fn transmitter(
        max_age: u32,
        flow_manager: Arc<FlowManager>,
        router_mac: MacAddr,
        router_ip: Ipv4Addr,
    ) -> Result<Arc<HostManager>, Error> {
        if max_age == 0 {
            return Err(Error::InvalidMaxAge(max_age));
        }

        Ok(Arc::new(HostManager {
            role: Role::Transmitter,
            policy: Policy::Transmitter { max_age },
            hosts: Default::default(),
            keys: Default::default(),
            peer: OnceLock::new(),
            flow_manager,
            router_mac,
            router_ip,
            sweeper: Mutex::new(None),
        }))
    }

    // Creates a manager for multicast listeners.
    //
    // All three timing parameters are validated together so a single error
    // reports everything that is wrong with the configuration.
    pub fn listener(
        query_interval: u32,
        max_response_time: u32,
        query_frequency: u32,
        flow_manager: Arc<FlowManager>,
        router_mac: MacAddr,
        router_ip: Ipv4Addr,
    ) -> Result<Arc<HostManager>, Error> {
        let mut invalid = Vec::new();
        if query_interval == 0 {
            invalid.push(TimerParam::QueryInterval);
        }
        if max_response_time == 0 {
            invalid.push(TimerParam::MaxResponseTime);
        }
        if query_frequency == 0 {
            invalid.push(TimerParam::QueryFrequency);
        }
        if !invalid.is_empty() {
            return Err(Error::InvalidTimers(invalid));
        }

        Ok(Arc::new(HostManager {
            role: Role::Listener,
            policy: Policy::Listener {
                query_interval,
                max_response_time,
                query_frequency,
            },
            hosts: Default::default(),
            keys: Default::default(),
            peer: OnceLock::new(),
            flow_manager,
            router_mac,
            router_ip,
            sweeper: Mutex::new(None),
        }))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    // Registers the manager of the opposite role. Must be called exactly
    // once on each manager before any host is added.
    pub fn register_peer(&self, peer: &Arc<HostManager>) {
        let _ = self.peer.set(Arc::downgrade(peer));
    }

    fn peer(&self) -> Option<Arc<HostManager>> {
        self.peer.get().and_then(Weak::upgrade)
    }

    // Records a sighting of a host. An existing entry has its age reset (and
    // its address updated); a new entry additionally updates the flow table
    // by pairing the host with every known peer on the same (switch, group).
    //
    // Returns whether the host is new.
    pub fn add_or_refresh(
        &self,
        switch: &SwitchRef,
        port: Port,
        mac: MacAddr,
        ip: Ipv4Addr,
        group: Ipv4Addr,
    ) -> bool {
        let mut hosts = self.hosts.write().unwrap();
        let key = HostKey {
            switch_id: switch.id(),
            port,
            mac,
            group,
        };
        let added = match hosts.entry(key) {
            Entry::Occupied(mut entry) => {
                Debug::HostRefresh(self.role, &key).log();
                entry.get_mut().refresh(ip);
                false
            }
            Entry::Vacant(entry) => {
                Debug::HostAdd(self.role, &key, ip).log();
                entry.insert(HostEntry::new(
                    switch.clone(),
                    port,
                    mac,
                    ip,
                    group,
                ));
                true
            }
        };
        if added {
            self.update_keys(&hosts);
        }
        // A transmitter sighting re-asserts its fan-out toward the current
        // listener set.
        if added || self.role == Role::Transmitter {
            self.connect_peers(switch, port, group);
        }
        added
    }

    // Rebuilds the key snapshot. Called with the write lock held, after
    // every mutation that changes the key set.
    fn update_keys(&self, hosts: &BTreeMap<HostKey, HostEntry>) {
        *self.keys.lock().unwrap() = Arc::new(hosts.keys().copied().collect());
    }

    // Pairs a newly added host with the peers already known on the same
    // (switch, group), creating or extending the corresponding flow entry.
    fn connect_peers(&self, switch: &SwitchRef, port: Port, group: Ipv4Addr) {
        let Some(peer) = self.peer() else {
            return;
        };
        let peer_ports = peer.ports_for_group(switch.id(), group);
        match self.role {
            // New transmitter: fan out to every known listener.
            Role::Transmitter => {
                for dst_port in peer_ports {
                    self.flow_manager.add_flow(switch, port, dst_port, group);
                }
            }
            // New listener: join the fan-out of every known transmitter.
            Role::Listener => {
                for src_port in peer_ports {
                    self.flow_manager.add_flow(switch, src_port, port, group);
                }
            }
        }
    }

    // Removes a host explicitly (e.g. when a listener announces departure),
    // undoing its contribution to the flow table.
    pub fn remove(&self, key: &HostKey) {
        let mut hosts = self.hosts.write().unwrap();
        if hosts.remove(key).is_some() {
            self.update_keys(&hosts);
            Debug::HostRemove(self.role, key).log();
            self.disconnect(key);
        }
    }

    fn disconnect(&self, key: &HostKey) {
        match self.role {
            // A transmitter takes its whole fan-out with it.
            Role::Transmitter => {
                self.flow_manager.remove_all_flows(key.switch_id, key.group);
            }
            Role::Listener => {
                self.flow_manager.remove_flow(
                    key.switch_id,
                    key.port,
                    key.group,
                );
            }
        }
    }

    // Ports on which this manager currently tracks hosts of the given group.
    //
    // Reads the key snapshot rather than the entry set, so the peer manager
    // can call this while holding its own write lock.
    pub fn ports_for_group(
        &self,
        switch_id: SwitchId,
        group: Ipv4Addr,
    ) -> BTreeSet<Port> {
        let keys = self.keys.lock().unwrap().clone();
        keys.iter()
            .filter(|key| key.switch_id == switch_id && key.group == group)
            .map(|key| key.port)
            .collect()
    }

    // External views of all tracked hosts.
    pub fn hosts(&self) -> Vec<HostView> {
        let hosts = self.hosts.read().unwrap();
        hosts.iter().map(|(key, entry)| entry.view(key)).collect()
    }

    // External views of the hosts of one group.
    pub fn hosts_by_group(&self, group: Ipv4Addr) -> Vec<HostView> {
        let hosts = self.hosts.read().unwrap();
        hosts
            .iter()
            .filter(|(key, _)| key.group == group)
            .map(|(key, entry)| entry.view(key))
            .collect()
    }

    // One aging pass: every entry's age is incremented, then the role policy
    // is applied. Evictions and their flow updates happen under the same
    // write lock, so readers never observe a host without its flows or vice
    // versa. Queries go out after the removal batch.
    pub fn sweep(&self) {
        let mut hosts = self.hosts.write().unwrap();

        let mut evict = Vec::new();
        let mut query = Vec::new();
        for (key, entry) in hosts.iter_mut() {
            let age = entry.bump_age();
            match self.policy {
                Policy::Transmitter { max_age } => {
                    if age >= max_age {
                        evict.push((*key, age));
                    }
                }
                Policy::Listener {
                    query_interval,
                    max_response_time,
                    query_frequency,
                } => {
                    if age >= query_interval.saturating_add(max_response_time)
                    {
                        evict.push((*key, age));
                    } else if age >= query_interval
                        && (age - query_interval) % query_frequency == 0
                    {
                        // Idle listener: probe it for liveness during the
                        // response window.
                        query.push(*key);
                    }
                }
            }
        }

        let evicted = !evict.is_empty();
        for (key, age) in evict {
            Debug::HostEvict(self.role, &key, age).log();
            hosts.remove(&key);
            self.disconnect(&key);
        }
        if evicted {
            self.update_keys(&hosts);
        }

        let Policy::Listener {
            max_response_time, ..
        } = self.policy
        else {
            return;
        };
        for key in query {
            if let Some(entry) = hosts.get(&key) {
                Debug::QueryTx(&key).log();
                if let Err(error) = entry.query().send_query(
                    max_response_time,
                    self.router_mac,
                    self.router_ip,
                ) {
                    error.log();
                }
            }
        }
    }

    // Starts the periodic aging sweep. Restarting an already running machine
    // replaces the previous sweeper.
    pub fn start_machine(self: &Arc<HostManager>) {
        let sweeper = tasks::age_sweep(self);
        *self.sweeper.lock().unwrap() = Some(sweeper);
    }

    // Stops the periodic aging sweep, letting an in-flight pass finish
    // within the grace period.
    pub async fn stop_machine(&self) {
        let sweeper = self.sweeper.lock().unwrap().take();
        if let Some(sweeper) = sweeper {
            sweeper
                .stop(Duration::from_secs(STOP_GRACE_PERIOD))
                .await;
        }
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use const_addrs::ip4;
use maplit::btreeset;
use mcast_snoop::config::Config;
use mcast_snoop::consts::*;
use mcast_snoop::error::{Error, TimerParam};
use mcast_snoop::events::PacketDisposition;
use mcast_snoop::host::HostKey;
use mcast_snoop::instance::Instance;
use mcast_snoop::packet::encap::{self, EthernetHdr, Ipv4Hdr};
use mcast_snoop::packet::{
    IgmpV2Message, LeaveGroupV2, MembershipReportV2, Packet, PacketType,
};
use mcast_snoop::southbound::testing::MockSwitch;
use mcast_snoop::southbound::{
    FlowAction, FlowMod, FlowModCommand, Ipv4Dst, Port, SwitchId, SwitchRef,
};
use mcast_utils::mac_addr::MacAddr;

// ===== helpers =====

fn mac(last: u8) -> MacAddr {
    MacAddr::new([0x00, 0x00, 0x5e, 0x00, 0x00, last])
}

fn igmp_frame(
    src_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    packet: &Packet,
) -> Vec<u8> {
    let eth_hdr = EthernetHdr {
        dst: MacAddr::multicast_for_v4(dst_ip),
        src: src_mac,
        ethertype: ETHERTYPE_IPV4,
    };
    let ip_hdr = Ipv4Hdr {
        src: src_ip,
        dst: dst_ip,
        protocol: IP_PROTO_IGMP,
        ttl: 1,
    };
    encap::encapsulate(&eth_hdr, &ip_hdr, packet.encode()).to_vec()
}

fn report_frame(
    src_mac: MacAddr,
    src_ip: Ipv4Addr,
    group: Ipv4Addr,
) -> Vec<u8> {
    let packet = Packet::Report(MembershipReportV2(IgmpV2Message {
        igmp_type: PacketType::MembershipReportV2Type,
        max_resp_time: 0,
        checksum: 0,
        group_addr: group,
    }));
    igmp_frame(src_mac, src_ip, group, &packet)
}

fn leave_frame(
    src_mac: MacAddr,
    src_ip: Ipv4Addr,
    group: Ipv4Addr,
    dst_ip: Ipv4Addr,
) -> Vec<u8> {
    let packet = Packet::Leave(LeaveGroupV2(IgmpV2Message {
        igmp_type: PacketType::LeaveGroupV2Type,
        max_resp_time: 0,
        checksum: 0,
        group_addr: group,
    }));
    igmp_frame(src_mac, src_ip, dst_ip, &packet)
}

fn data_frame(
    src_mac: MacAddr,
    src_ip: Ipv4Addr,
    group: Ipv4Addr,
) -> Vec<u8> {
    let eth_hdr = EthernetHdr {
        dst: MacAddr::multicast_for_v4(group),
        src: src_mac,
        ethertype: ETHERTYPE_IPV4,
    };
    let ip_hdr = Ipv4Hdr {
        src: src_ip,
        dst: group,
        protocol: 17,
        ttl: 16,
    };
    encap::encapsulate(&eth_hdr, &ip_hdr, Bytes::from_static(b"payload"))
        .to_vec()
}

fn group_flow_mods(switch: &MockSwitch) -> Vec<FlowMod> {
    switch
        .flow_mods()
        .into_iter()
        .filter(|flow_mod| flow_mod.priority == GROUP_FLOW_PRIORITY)
        .collect()
}

// ===== switch bring-up =====

#[test]
fn test_default_rules_installed_once() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();

    instance.process_frame(&sw, Port(1), &data_frame(
        mac(1),
        ip4!("10.0.0.1"),
        ip4!("239.1.1.1"),
    ));
    instance.process_frame(&sw, Port(2), &data_frame(
        mac(2),
        ip4!("10.0.0.2"),
        ip4!("239.1.1.2"),
    ));

    let defaults: Vec<_> = switch
        .flow_mods()
        .into_iter()
        .filter(|flow_mod| flow_mod.priority == DEFAULT_RULE_PRIORITY)
        .collect();
    assert_eq!(defaults.len(), 2);
    for flow_mod in &defaults {
        assert_eq!(flow_mod.command, FlowModCommand::Add);
        assert_eq!(flow_mod.cookie, APP_COOKIE);
        assert_eq!(
            flow_mod.actions,
            vec![FlowAction::Output(Port::CONTROLLER)]
        );
    }
    assert_eq!(defaults[0].pattern.ip_proto, Some(IP_PROTO_IGMP));
    assert!(matches!(
        defaults[1].pattern.ipv4_dst,
        Some(Ipv4Dst::Masked(_))
    ));
}

#[test]
fn test_default_rules_per_switch() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch1 = MockSwitch::new(1);
    let switch2 = MockSwitch::new(2);
    let sw1: SwitchRef = switch1.clone();
    let sw2: SwitchRef = switch2.clone();

    let frame = data_frame(mac(1), ip4!("10.0.0.1"), ip4!("239.1.1.1"));
    instance.process_frame(&sw1, Port(1), &frame);
    instance.process_frame(&sw2, Port(1), &frame);

    assert_eq!(switch1.flow_mods().len(), 2);
    assert_eq!(switch2.flow_mods().len(), 2);
}

// ===== frame classification =====

#[test]
fn test_transmitter_disposition() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();

    let frame = data_frame(mac(1), ip4!("10.0.0.1"), ip4!("239.1.1.1"));

    // Only the first frame of a new transmitter is passed on.
    let disposition = instance.process_frame(&sw, Port(1), &frame);
    assert_eq!(disposition, PacketDisposition::Continue);
    let disposition = instance.process_frame(&sw, Port(1), &frame);
    assert_eq!(disposition, PacketDisposition::Stop);

    let transmitters = instance.list_transmitters();
    assert_eq!(transmitters.len(), 1);
    assert_eq!(transmitters[0].active_time, 0);
    assert_eq!(transmitters[0].group, "239.1.1.1");
}

#[test]
fn test_igmp_consumed() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();

    let frame = report_frame(mac(2), ip4!("10.0.0.2"), ip4!("239.1.1.1"));
    let disposition = instance.process_frame(&sw, Port(2), &frame);
    assert_eq!(disposition, PacketDisposition::Stop);
    assert_eq!(instance.list_listeners().len(), 1);
}

#[test]
fn test_unrelated_frames_pass_through() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();

    // Unicast destination MAC.
    let eth_hdr = EthernetHdr {
        dst: mac(9),
        src: mac(1),
        ethertype: ETHERTYPE_IPV4,
    };
    let ip_hdr = Ipv4Hdr {
        src: ip4!("10.0.0.1"),
        dst: ip4!("10.0.0.9"),
        protocol: 17,
        ttl: 16,
    };
    let frame =
        encap::encapsulate(&eth_hdr, &ip_hdr, Bytes::from_static(b"x"));
    let disposition = instance.process_frame(&sw, Port(1), &frame);
    assert_eq!(disposition, PacketDisposition::Continue);

    // Multicast MAC but non-multicast IP destination.
    let eth_hdr = EthernetHdr {
        dst: MacAddr::multicast_for_v4(ip4!("239.1.1.1")),
        src: mac(1),
        ethertype: ETHERTYPE_IPV4,
    };
    let ip_hdr = Ipv4Hdr {
        src: ip4!("10.0.0.1"),
        dst: ip4!("10.0.0.9"),
        protocol: 17,
        ttl: 16,
    };
    let frame =
        encap::encapsulate(&eth_hdr, &ip_hdr, Bytes::from_static(b"x"));
    let disposition = instance.process_frame(&sw, Port(1), &frame);
    assert_eq!(disposition, PacketDisposition::Continue);

    assert!(instance.list_transmitters().is_empty());
    assert!(instance.list_listeners().is_empty());
}

#[test]
fn test_malformed_igmp_dropped() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();

    let mut frame = report_frame(mac(2), ip4!("10.0.0.2"), ip4!("239.1.1.1"));
    // Corrupt the IGMP checksum.
    let len = frame.len();
    frame[len - 6] ^= 0xff;

    let disposition = instance.process_frame(&sw, Port(2), &frame);
    assert_eq!(disposition, PacketDisposition::Stop);
    assert!(instance.list_listeners().is_empty());
    assert_eq!(instance.statistics.frames_dropped.get(), 1);
}

// ===== flow lifecycle =====

#[test]
fn test_flow_lifecycle() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    // Transmitter on port 1.
    instance.process_frame(&sw, Port(1), &data_frame(
        mac(1),
        ip4!("10.0.0.1"),
        group,
    ));
    assert_eq!(instance.flow_manager.dst_ports(SwitchId(1), group), None);

    // First listener on port 2.
    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
    ));
    assert_eq!(
        instance.flow_manager.dst_ports(SwitchId(1), group),
        Some(btreeset! {Port(2)})
    );
    let flow_mods = group_flow_mods(&switch);
    assert_eq!(flow_mods.len(), 1);
    assert_eq!(flow_mods[0].pattern.in_port, Some(Port(1)));
    assert_eq!(
        flow_mods[0].pattern.ipv4_dst,
        Some(Ipv4Dst::Exact(group))
    );

    // Second listener on port 3 extends the fan-out; the rule is replaced.
    instance.process_frame(&sw, Port(3), &report_frame(
        mac(3),
        ip4!("10.0.0.3"),
        group,
    ));
    assert_eq!(
        instance.flow_manager.dst_ports(SwitchId(1), group),
        Some(btreeset! {Port(2), Port(3)})
    );
    let flow_mods = group_flow_mods(&switch);
    assert_eq!(flow_mods.len(), 3);
    assert_eq!(flow_mods[1].command, FlowModCommand::Delete);
    assert_eq!(flow_mods[2].command, FlowModCommand::Add);
    assert_eq!(
        flow_mods[2].actions,
        vec![FlowAction::Output(Port(2)), FlowAction::Output(Port(3))]
    );

    // A repeated report refreshes the listener without touching the rule.
    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
    ));
    assert_eq!(group_flow_mods(&switch).len(), 3);

    // First listener leaves.
    instance.process_frame(&sw, Port(2), &leave_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
        LEAVE_GROUP_DST,
    ));
    assert_eq!(
        instance.flow_manager.dst_ports(SwitchId(1), group),
        Some(btreeset! {Port(3)})
    );

    // Last listener leaves; the rule is deleted and never reinstalled.
    instance.process_frame(&sw, Port(3), &leave_frame(
        mac(3),
        ip4!("10.0.0.3"),
        group,
        LEAVE_GROUP_DST,
    ));
    assert_eq!(instance.flow_manager.dst_ports(SwitchId(1), group), None);
    let flow_mods = group_flow_mods(&switch);
    assert_eq!(
        flow_mods.last().map(|flow_mod| flow_mod.command),
        Some(FlowModCommand::Delete)
    );
    assert!(instance.list_listeners().is_empty());
}

#[test]
fn test_listener_before_transmitter() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
    ));
    assert_eq!(instance.flow_manager.dst_ports(SwitchId(1), group), None);

    // Transmitter shows up later and is paired with the waiting listener.
    instance.process_frame(&sw, Port(1), &data_frame(
        mac(1),
        ip4!("10.0.0.1"),
        group,
    ));
    assert_eq!(
        instance.flow_manager.dst_ports(SwitchId(1), group),
        Some(btreeset! {Port(2)})
    );
}

#[test]
fn test_leave_wrong_destination_ignored() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
    ));

    // Leave addressed to the group itself instead of all-routers.
    instance.process_frame(&sw, Port(2), &leave_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
        group,
    ));
    assert_eq!(instance.list_listeners().len(), 1);
}

// ===== aging =====

#[test]
fn test_listener_requery_and_eviction() {
    let config = Config {
        query_interval: 2,
        max_response_time: 2,
        query_frequency: 1,
        ..Default::default()
    };
    let instance = Instance::new(config).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    instance.process_frame(&sw, Port(1), &data_frame(
        mac(1),
        ip4!("10.0.0.1"),
        group,
    ));
    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
    ));

    // Ages 1 and 2: the listener reaches the query window at 2.
    instance.listeners.sweep();
    assert!(switch.packets().is_empty());
    instance.listeners.sweep();
    assert_eq!(switch.packets().len(), 1);

    // The query is a well-formed group-specific membership query.
    let (port, frame) = switch.packets().remove(0);
    assert_eq!(port, Port(2));
    let mut buf = Bytes::copy_from_slice(&frame);
    let eth_hdr = EthernetHdr::decode(&mut buf).unwrap();
    assert_eq!(eth_hdr.dst, MacAddr::multicast_for_v4(group));
    let ip_hdr = Ipv4Hdr::decode(&mut buf).unwrap();
    assert_eq!(ip_hdr.dst, group);
    assert_eq!(ip_hdr.protocol, IP_PROTO_IGMP);
    match Packet::decode(&mut buf).unwrap() {
        Packet::Query(query) => {
            assert_eq!(query.0.group_addr, group);
            // Wire units are tenths of a second.
            assert_eq!(query.0.max_resp_time, 20);
        }
        packet => panic!("unexpected packet: {packet:?}"),
    }

    // Age 3: still querying. Age 4: eviction, taking the flow along.
    instance.listeners.sweep();
    assert_eq!(switch.packets().len(), 2);
    instance.listeners.sweep();
    assert!(instance.list_listeners().is_empty());
    assert_eq!(instance.flow_manager.dst_ports(SwitchId(1), group), None);
}

#[test]
fn test_extreme_timer_values() {
    let config = Config {
        query_interval: 1,
        max_response_time: u32::MAX,
        query_frequency: 1,
        ..Default::default()
    };
    let instance = Instance::new(config).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
    ));

    // The eviction deadline saturates instead of wrapping around, so the
    // listener is queried but never evicted.
    instance.listeners.sweep();
    instance.listeners.sweep();
    assert_eq!(instance.list_listeners().len(), 1);
    assert_eq!(switch.packets().len(), 2);

    // The wire field saturates at its 8-bit ceiling.
    let (_, frame) = switch.packets().remove(0);
    let mut buf = Bytes::copy_from_slice(&frame);
    EthernetHdr::decode(&mut buf).unwrap();
    Ipv4Hdr::decode(&mut buf).unwrap();
    match Packet::decode(&mut buf).unwrap() {
        Packet::Query(query) => {
            assert_eq!(query.0.max_resp_time, u8::MAX);
        }
        packet => panic!("unexpected packet: {packet:?}"),
    }
}

#[test]
fn test_report_resets_age() {
    let config = Config {
        query_interval: 2,
        max_response_time: 2,
        query_frequency: 1,
        ..Default::default()
    };
    let instance = Instance::new(config).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    let report = report_frame(mac(2), ip4!("10.0.0.2"), group);
    instance.process_frame(&sw, Port(2), &report);

    instance.listeners.sweep();
    instance.listeners.sweep();
    instance.listeners.sweep();
    assert_eq!(instance.list_listeners()[0].active_time, 3);

    // The host answers a query; its age starts over.
    instance.process_frame(&sw, Port(2), &report);
    assert_eq!(instance.list_listeners()[0].active_time, 0);
    instance.listeners.sweep();
    assert_eq!(instance.list_listeners().len(), 1);
}

#[test]
fn test_transmitter_eviction_tears_down_flow() {
    let config = Config {
        transmitter_max_age: 3,
        ..Default::default()
    };
    let instance = Instance::new(config).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    instance.process_frame(&sw, Port(1), &data_frame(
        mac(1),
        ip4!("10.0.0.1"),
        group,
    ));
    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
    ));
    instance.process_frame(&sw, Port(3), &report_frame(
        mac(3),
        ip4!("10.0.0.3"),
        group,
    ));
    assert_eq!(
        instance.flow_manager.dst_ports(SwitchId(1), group),
        Some(btreeset! {Port(2), Port(3)})
    );

    instance.transmitters.sweep();
    instance.transmitters.sweep();
    assert_eq!(instance.list_transmitters().len(), 1);

    // The whole fan-out disappears with the transmitter.
    instance.transmitters.sweep();
    assert!(instance.list_transmitters().is_empty());
    assert_eq!(instance.flow_manager.dst_ports(SwitchId(1), group), None);

    // Listeners age independently and are still tracked.
    assert_eq!(instance.list_listeners().len(), 2);
}

// ===== configuration =====

#[test]
fn test_invalid_max_age() {
    let config = Config {
        transmitter_max_age: 0,
        ..Default::default()
    };
    let error = Instance::new(config).unwrap_err();
    assert!(matches!(error, Error::InvalidMaxAge(0)));
}

#[test]
fn test_invalid_timers_aggregated() {
    let config = Config {
        query_interval: 0,
        max_response_time: 0,
        query_frequency: 0,
        ..Default::default()
    };
    let error = Instance::new(config).unwrap_err();
    match error {
        Error::InvalidTimers(params) => {
            assert_eq!(
                params,
                vec![
                    TimerParam::QueryInterval,
                    TimerParam::MaxResponseTime,
                    TimerParam::QueryFrequency,
                ]
            );
        }
        error => panic!("unexpected error: {error:?}"),
    }
}

// ===== failure handling =====

#[test]
fn test_switch_write_failures_are_swallowed() {
    let instance = Instance::new(Config::default()).unwrap();
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    switch.fail_writes(true);
    instance.process_frame(&sw, Port(1), &data_frame(
        mac(1),
        ip4!("10.0.0.1"),
        group,
    ));
    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        group,
    ));

    // The in-memory state stays authoritative.
    assert_eq!(instance.list_transmitters().len(), 1);
    assert_eq!(instance.list_listeners().len(), 1);
    assert_eq!(
        instance.flow_manager.dst_ports(SwitchId(1), group),
        Some(btreeset! {Port(2)})
    );
    assert!(switch.flow_mods().is_empty());
}

// ===== concurrency =====

#[test]
fn test_concurrent_transmitter_and_listener_updates() {
    let instance = Arc::new(Instance::new(Config::default()).unwrap());
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();
    let group = ip4!("239.1.1.1");

    instance.transmitters.add_or_refresh(
        &sw,
        Port(1),
        mac(1),
        ip4!("10.0.0.1"),
        group,
    );

    // One thread keeps refreshing the transmitter, which re-runs its
    // fan-out against the listener side on every sighting; the other keeps
    // adding and removing a listener, which consults the transmitter side.
    // Both must finish: if either manager blocked on the other's lock while
    // holding its own, the two threads would wait on each other forever.
    let (done_tx, done_rx) = mpsc::channel();
    let transmitters = instance.transmitters.clone();
    let tx_sw = sw.clone();
    let tx_done = done_tx.clone();
    thread::spawn(move || {
        for _ in 0..20_000 {
            transmitters.add_or_refresh(
                &tx_sw,
                Port(1),
                mac(1),
                ip4!("10.0.0.1"),
                group,
            );
        }
        let _ = tx_done.send(());
    });
    let listeners = instance.listeners.clone();
    thread::spawn(move || {
        let key = HostKey {
            switch_id: SwitchId(1),
            port: Port(2),
            mac: mac(2),
            group,
        };
        for _ in 0..20_000 {
            listeners.add_or_refresh(
                &sw,
                Port(2),
                mac(2),
                ip4!("10.0.0.2"),
                group,
            );
            listeners.remove(&key);
        }
        let _ = done_tx.send(());
    });

    for _ in 0..2 {
        done_rx
            .recv_timeout(Duration::from_secs(60))
            .expect("worker threads stalled");
    }
    assert_eq!(instance.list_transmitters().len(), 1);
    assert!(instance.list_listeners().is_empty());
}

// ===== lifecycle =====

#[tokio::test(start_paused = true)]
async fn test_machine_start_stop() {
    let instance = Arc::new(Instance::new(Config::default()).unwrap());
    let switch = MockSwitch::new(1);
    let sw: SwitchRef = switch.clone();

    instance.start();
    instance.process_frame(&sw, Port(2), &report_frame(
        mac(2),
        ip4!("10.0.0.2"),
        ip4!("239.1.1.1"),
    ));

    // Let the sweepers tick a few times.
    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
    }
    assert!(instance.list_listeners()[0].active_time >= 1);

    instance.stop().await;

    // No further aging happens once the machines are stopped.
    let age = instance.list_listeners()[0].active_time;
    tokio::time::advance(Duration::from_secs(5)).await;
    tokio::task::yield_now().await;
    assert_eq!(instance.list_listeners()[0].active_time, age);
}

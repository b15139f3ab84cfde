//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::Bytes;

use crate::consts::*;
use crate::debug::Debug;
use crate::error::Error;
use crate::host::HostKey;
use crate::instance::Instance;
use crate::packet::encap::{EthernetHdr, Ipv4Hdr};
use crate::packet::Packet;
use crate::southbound::{
    FlowAction, FlowMatch, FlowMod, FlowModCommand, Ipv4Dst, Port, SwitchRef,
};

// What the caller should do with a frame after the engine has seen it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketDisposition {
    // Hand the frame to the next processing stage (e.g. unicast forwarding).
    Continue,
    // The frame was consumed; no further processing.
    Stop,
}

// ===== frame processing =====

// Entry point for frames punted to the controller.
//
// Any switch seen here gets its default catch-all rules first, then the
// frame is classified. Frames the engine doesn't care about pass through
// untouched.
pub(crate) fn process_frame(
    instance: &Instance,
    switch: &SwitchRef,
    port: Port,
    data: &[u8],
) -> PacketDisposition {
    configure_switch(instance, switch);
    instance.statistics.frames_rx.increment();

    let mut buf = Bytes::copy_from_slice(data);
    let eth_hdr = match EthernetHdr::decode(&mut buf) {
        Ok(eth_hdr) => eth_hdr,
        Err(error) => {
            Error::FrameDecode(switch.id(), error).log();
            return PacketDisposition::Continue;
        }
    };
    if eth_hdr.ethertype != ETHERTYPE_IPV4 || !eth_hdr.dst.is_multicast() {
        return PacketDisposition::Continue;
    }

    let ip_hdr = match Ipv4Hdr::decode(&mut buf) {
        Ok(ip_hdr) => ip_hdr,
        Err(error) => {
            Error::FrameDecode(switch.id(), error).log();
            return PacketDisposition::Continue;
        }
    };
    if !MULTICAST_NET.contains(ip_hdr.dst) {
        return PacketDisposition::Continue;
    }

    if ip_hdr.protocol == IP_PROTO_IGMP {
        // Membership signaling is always consumed here.
        process_igmp(instance, switch, port, &eth_hdr, &ip_hdr, buf);
        PacketDisposition::Stop
    } else {
        // Multicast data: the sender is a transmitter. Only the first frame
        // of a new transmitter is passed on, so the downstream forwarding
        // stage sees it while the group flows converge.
        instance.statistics.data_frames_rx.increment();
        let added = instance.transmitters.add_or_refresh(
            switch,
            port,
            eth_hdr.src,
            ip_hdr.src,
            ip_hdr.dst,
        );
        if added {
            PacketDisposition::Continue
        } else {
            PacketDisposition::Stop
        }
    }
}

// Handles one IGMP message. Malformed messages are dropped with a warning;
// message types other than v2 reports and leaves are ignored.
fn process_igmp(
    instance: &Instance,
    switch: &SwitchRef,
    port: Port,
    eth_hdr: &EthernetHdr,
    ip_hdr: &Ipv4Hdr,
    mut buf: Bytes,
) {
    let packet = match Packet::decode(&mut buf) {
        Ok(packet) => packet,
        Err(error) => {
            instance.statistics.frames_dropped.increment();
            Error::FrameDecode(switch.id(), error).log();
            return;
        }
    };
    Debug::PacketRx(switch.id(), port, &packet).log();

    match packet {
        Packet::Report(..) => {
            instance.statistics.reports_rx.increment();
            instance.listeners.add_or_refresh(
                switch,
                port,
                eth_hdr.src,
                ip_hdr.src,
                packet.group_addr(),
            );
        }
        // Leave Group messages are only honored when addressed to the
        // all-routers group, as RFC 2236 requires.
        Packet::Leave(..) if ip_hdr.dst == LEAVE_GROUP_DST => {
            instance.statistics.leaves_rx.increment();
            let key = HostKey {
                switch_id: switch.id(),
                port,
                mac: eth_hdr.src,
                group: packet.group_addr(),
            };
            instance.listeners.remove(&key);
        }
        Packet::Leave(..) => (),
        // Queries come from this engine itself (or another querier) and
        // carry no membership information.
        Packet::Query(..) => (),
    }
}

// ===== switch bring-up =====

// Installs the default catch-all rules on a switch the first time it is
// seen. The set of configured switches is kept under its own lock so two
// concurrent frames from a new switch can't both install the rules.
fn configure_switch(instance: &Instance, switch: &SwitchRef) {
    let mut configured = instance.configured_switches.lock().unwrap();
    if configured.insert(switch.id()) {
        install_default_rules(switch);
        Debug::SwitchConfigured(switch.id()).log();
    }
}

// Two permanent low-priority rules: IGMP traffic and any remaining multicast
// traffic are punted to the controller. Group-specific flows outrank both.
fn install_default_rules(switch: &SwitchRef) {
    let patterns = [
        FlowMatch {
            in_port: None,
            eth_type: ETHERTYPE_IPV4,
            ip_proto: Some(IP_PROTO_IGMP),
            ipv4_dst: None,
        },
        FlowMatch {
            in_port: None,
            eth_type: ETHERTYPE_IPV4,
            ip_proto: None,
            ipv4_dst: Some(Ipv4Dst::Masked(*MULTICAST_NET)),
        },
    ];
    for pattern in patterns {
        let flow_mod = FlowMod {
            command: FlowModCommand::Add,
            pattern,
            actions: vec![FlowAction::Output(Port::CONTROLLER)],
            priority: DEFAULT_RULE_PRIORITY,
            cookie: APP_COOKIE,
            idle_timeout: DEFAULT_RULE_IDLE_TIMEOUT,
            hard_timeout: FLOW_HARD_TIMEOUT,
        };
        if let Err(error) = switch.write_flow(&flow_mod) {
            Error::SwitchWrite(switch.id(), error).log();
        }
    }
}

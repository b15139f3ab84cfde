//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod encap;

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use mcast_utils::bytes::{BytesExt, BytesMutExt};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// Offset of the checksum field within an IGMP message.
const CKSUM_RANGE: std::ops::Range<usize> = 2..4;

// IGMP Packet Type.
//
// IANA registry:
// https://www.iana.org/assignments/igmp-type-numbers/igmp-type-numbers.xhtml#igmp-type-numbers-2
#[derive(Clone, Copy, Debug, Eq, Hash, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PacketType {
    MembershipQueryType = 0x11,
    MembershipReportV1Type = 0x12,
    MembershipReportV2Type = 0x16,
    LeaveGroupV2Type = 0x17,
}

//
// IGMPv2 message format (RFC 2236, section 2).
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |      Type     | Max Resp Time |           Checksum            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Group Address                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// The max response time field is meaningful only in membership queries and
// is measured in tenths of a second.
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IgmpV2Message {
    pub igmp_type: PacketType,
    pub max_resp_time: u8,
    pub checksum: u16,
    pub group_addr: Ipv4Addr,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MembershipQuery(pub IgmpV2Message);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MembershipReportV2(pub IgmpV2Message);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LeaveGroupV2(pub IgmpV2Message);

// IGMPv2 packets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Packet {
    Query(MembershipQuery),
    Report(MembershipReportV2),
    Leave(LeaveGroupV2),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    InsufficientData,
    InvalidChecksum,
    InvalidVersion(u8),
    UnknownPacketType(u8),
}

// ===== helper functions =====

fn update_cksum(buf: &mut BytesMut) {
    let mut cksum = Checksum::new();
    cksum.add_bytes(buf);
    buf[CKSUM_RANGE].copy_from_slice(&cksum.checksum());
}

fn verify_cksum(data: &[u8]) -> DecodeResult<()> {
    let mut cksum = Checksum::new();
    cksum.add_bytes(data);
    if cksum.checksum() != [0, 0] {
        return Err(DecodeError::InvalidChecksum);
    }
    Ok(())
}

// ===== impl IgmpV2Message =====

impl IgmpV2Message {
    pub const LENGTH: usize = 8;

    fn decode(buf: &mut Bytes, expected: PacketType) -> DecodeResult<Self> {
        let buf_orig = buf.clone();

        if buf.len() < Self::LENGTH {
            return Err(DecodeError::InsufficientData);
        }

        let pkt_type = buf.get_u8();
        let pkt_type = match PacketType::from_u8(pkt_type) {
            Some(pkt_type) => pkt_type,
            None => return Err(DecodeError::UnknownPacketType(pkt_type)),
        };
        if pkt_type != expected {
            return Err(DecodeError::UnknownPacketType(pkt_type as u8));
        }

        let max_resp_time = buf.get_u8();
        let checksum = buf.get_u16();

        // The checksum covers the whole 8-byte message. Anything past it is
        // link-layer padding and must be ignored.
        verify_cksum(&buf_orig.as_ref()[..Self::LENGTH])?;

        let group_addr = buf.get_ipv4();

        Ok(IgmpV2Message {
            igmp_type: pkt_type,
            max_resp_time,
            checksum,
            group_addr,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.igmp_type as u8);
        buf.put_u8(self.max_resp_time);
        buf.put_u16(0);
        buf.put_ipv4(&self.group_addr);

        update_cksum(buf);
    }
}

// ===== impl Packet =====

impl Packet {
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.len() < IgmpV2Message::LENGTH {
            return Err(DecodeError::InsufficientData);
        }

        let pkt_type = buf.as_ref()[0];
        let pkt_type = match PacketType::from_u8(pkt_type) {
            Some(pkt_type) => pkt_type,
            None => return Err(DecodeError::UnknownPacketType(pkt_type)),
        };

        let packet = match pkt_type {
            PacketType::MembershipQueryType => Packet::Query(
                MembershipQuery(IgmpV2Message::decode(buf, pkt_type)?),
            ),
            PacketType::MembershipReportV2Type => Packet::Report(
                MembershipReportV2(IgmpV2Message::decode(buf, pkt_type)?),
            ),
            PacketType::LeaveGroupV2Type => Packet::Leave(LeaveGroupV2(
                IgmpV2Message::decode(buf, pkt_type)?,
            )),
            // Version 1 reports aren't modeled.
            PacketType::MembershipReportV1Type => {
                return Err(DecodeError::UnknownPacketType(pkt_type as u8));
            }
        };

        Ok(packet)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(IgmpV2Message::LENGTH);

        match self {
            Packet::Query(MembershipQuery(msg))
            | Packet::Report(MembershipReportV2(msg))
            | Packet::Leave(LeaveGroupV2(msg)) => {
                msg.encode(&mut buf);
            }
        }

        buf.freeze()
    }

    // Builds a membership query for the given group.
    //
    // `max_resp_time` is in tenths of a second, as carried on the wire.
    pub fn new_query(group_addr: Ipv4Addr, max_resp_time: u8) -> Packet {
        Packet::Query(MembershipQuery(IgmpV2Message {
            igmp_type: PacketType::MembershipQueryType,
            max_resp_time,
            checksum: 0,
            group_addr,
        }))
    }

    pub fn group_addr(&self) -> Ipv4Addr {
        match self {
            Packet::Query(MembershipQuery(msg))
            | Packet::Report(MembershipReportV2(msg))
            | Packet::Leave(LeaveGroupV2(msg)) => msg.group_addr,
        }
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InsufficientData => {
                write!(f, "insufficient data")
            }
            DecodeError::InvalidChecksum => {
                write!(f, "invalid checksum")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid IP version: {version}")
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "unknown packet type: {pkt_type}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//
//
// Minimal Ethernet II / IPv4 framing, used to classify inbound frames and to
// encapsulate outbound membership queries.
//

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use mcast_utils::bytes::{BytesExt, BytesMutExt};
use mcast_utils::mac_addr::MacAddr;
use serde::{Deserialize, Serialize};

use crate::packet::{DecodeError, DecodeResult};

// Offset of the checksum field within an IPv4 header.
const IP_CKSUM_RANGE: std::ops::Range<usize> = 10..12;

// Ethernet II header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct EthernetHdr {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

// IPv4 header, reduced to the fields this subsystem cares about. Options are
// skipped on decode; headers are always encoded without options.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Ipv4Hdr {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
}

// ===== impl EthernetHdr =====

impl EthernetHdr {
    pub const LENGTH: usize = 14;

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.len() < Self::LENGTH {
            return Err(DecodeError::InsufficientData);
        }

        let dst = buf.get_mac();
        let src = buf.get_mac();
        let ethertype = buf.get_u16();

        Ok(EthernetHdr {
            dst,
            src,
            ethertype,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_mac(&self.dst);
        buf.put_mac(&self.src);
        buf.put_u16(self.ethertype);
    }
}

// ===== impl Ipv4Hdr =====

impl Ipv4Hdr {
    pub const LENGTH: usize = 20;

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.len() < Self::LENGTH {
            return Err(DecodeError::InsufficientData);
        }

        let ver_ihl = buf.as_ref()[0];
        let version = ver_ihl >> 4;
        if version != 4 {
            return Err(DecodeError::InvalidVersion(version));
        }
        let hdr_len = (ver_ihl & 0x0f) as usize * 4;
        if hdr_len < Self::LENGTH || buf.len() < hdr_len {
            return Err(DecodeError::InsufficientData);
        }

        let _ver_ihl = buf.get_u8();
        let _tos = buf.get_u8();
        let _total_length = buf.get_u16();
        let _identification = buf.get_u16();
        let _flag_off = buf.get_u16();
        let ttl = buf.get_u8();
        let protocol = buf.get_u8();
        let _checksum = buf.get_u16();
        let src = buf.get_ipv4();
        let dst = buf.get_ipv4();

        // Skip options, leaving the buffer at the payload.
        buf.advance(hdr_len - Self::LENGTH);

        Ok(Ipv4Hdr {
            src,
            dst,
            protocol,
            ttl,
        })
    }

    pub fn encode(&self, payload_len: usize) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::LENGTH);

        // Version 4, header length 20 bytes.
        buf.put_u8(0x45);
        // TOS.
        buf.put_u8(0);
        buf.put_u16((Self::LENGTH + payload_len) as u16);
        // Identification.
        buf.put_u16(0);
        // Flags and fragment offset.
        buf.put_u16(0);
        buf.put_u8(self.ttl);
        buf.put_u8(self.protocol);
        // Checksum, fixed up below.
        buf.put_u16(0);
        buf.put_ipv4(&self.src);
        buf.put_ipv4(&self.dst);

        let mut cksum = Checksum::new();
        cksum.add_bytes(&buf);
        buf[IP_CKSUM_RANGE].copy_from_slice(&cksum.checksum());

        buf
    }
}

// ===== global functions =====

// Wraps a payload in IPv4 and Ethernet headers, producing wire bytes.
pub fn encapsulate(
    eth_hdr: &EthernetHdr,
    ip_hdr: &Ipv4Hdr,
    payload: Bytes,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        EthernetHdr::LENGTH + Ipv4Hdr::LENGTH + payload.len(),
    );
    eth_hdr.encode(&mut buf);
    buf.extend_from_slice(&ip_hdr.encode(payload.len()));
    buf.extend_from_slice(&payload);
    buf.freeze()
}

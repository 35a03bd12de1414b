// Packet descriptors and the Ethernet/IPv4 frame decoder.
//
// The flow table only ever sees `PacketDescriptor`s. Decoding raw frames is
// done here, at the capture edge, so the accounting core never touches wire
// bytes.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::{MacAddr, Protocol};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// Ethernet
const ETH_HLEN: usize = 14;
const ETH_DST_OFFSET: usize = 0;
const ETH_SRC_OFFSET: usize = 6;
const ETH_TYPE_OFFSET: usize = 12;
const ETHERTYPE_IPV4: u16 = 0x0800;

// IPv4
const IPV4_MIN_HLEN: usize = 20;
const IPV4_PROTO_OFFSET: usize = 9;
const IPV4_FLAGS_FRAG_OFFSET: usize = 6;
const IPV4_SRC_OFFSET: usize = 12;
const IPV4_DST_OFFSET: usize = 16;

// L4 protocol numbers
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

// TCP/UDP port header length (src_port + dst_port = 4 bytes)
const L4_PORT_HLEN: usize = 4;

// ---------------------------------------------------------------------------
// PacketDescriptor
// ---------------------------------------------------------------------------

/// One observed packet, already decoded, as consumed by the flow table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketDescriptor {
    /// Observation time in microseconds since epoch.
    pub timestamp: u64,
    pub protocol: Protocol,
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    /// Bytes to account for this packet (on-wire frame length).
    pub byte_len: u32,
    pub src_mac: Option<MacAddr>,
    pub dst_mac: Option<MacAddr>,
}

/// Current wall-clock time in microseconds since epoch.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

/// Decode an Ethernet II frame carrying IPv4 TCP or UDP.
///
/// `frame_len` is the on-wire length reported by the capture layer; it may
/// exceed `data.len()` when the capture was truncated to the snap length.
///
/// Returns `None` if the frame is:
/// - Too short (truncated at any layer)
/// - Not IPv4 (ARP, IPv6, VLAN-tagged)
/// - A non-first IPv4 fragment
/// - Carrying anything other than TCP or UDP
pub fn parse_ethernet_frame(
    data: &[u8],
    frame_len: u32,
    timestamp: u64,
) -> Option<PacketDescriptor> {
    if data.len() < ETH_HLEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([data[ETH_TYPE_OFFSET], data[ETH_TYPE_OFFSET + 1]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    let dst_mac = mac_at(data, ETH_DST_OFFSET)?;
    let src_mac = mac_at(data, ETH_SRC_OFFSET)?;

    let mut pkt = parse_ipv4(&data[ETH_HLEN..])?;
    pkt.byte_len = frame_len;
    pkt.timestamp = timestamp;
    pkt.src_mac = Some(src_mac);
    pkt.dst_mac = Some(dst_mac);
    Some(pkt)
}

fn mac_at(data: &[u8], offset: usize) -> Option<MacAddr> {
    let bytes: [u8; 6] = data.get(offset..offset + 6)?.try_into().ok()?;
    Some(MacAddr(bytes))
}

/// Parse an IPv4 packet from the start of the IP header.
fn parse_ipv4(data: &[u8]) -> Option<PacketDescriptor> {
    if data.len() < IPV4_MIN_HLEN {
        return None;
    }
    if data[0] >> 4 != 4 {
        return None;
    }

    let ihl = ((data[0] & 0x0F) as usize) * 4;
    if ihl < IPV4_MIN_HLEN || data.len() < ihl {
        return None;
    }

    let flags_frag = u16::from_be_bytes([
        data[IPV4_FLAGS_FRAG_OFFSET],
        data[IPV4_FLAGS_FRAG_OFFSET + 1],
    ]);
    if (flags_frag & 0x1FFF) != 0 {
        // Non-first fragment carries no ports.
        return None;
    }

    let protocol = match data[IPV4_PROTO_OFFSET] {
        PROTO_TCP => Protocol::Tcp,
        PROTO_UDP => Protocol::Udp,
        _ => return None,
    };

    let src_ip = Ipv4Addr::new(
        data[IPV4_SRC_OFFSET],
        data[IPV4_SRC_OFFSET + 1],
        data[IPV4_SRC_OFFSET + 2],
        data[IPV4_SRC_OFFSET + 3],
    );
    let dst_ip = Ipv4Addr::new(
        data[IPV4_DST_OFFSET],
        data[IPV4_DST_OFFSET + 1],
        data[IPV4_DST_OFFSET + 2],
        data[IPV4_DST_OFFSET + 3],
    );

    let l4 = &data[ihl..];
    if l4.len() < L4_PORT_HLEN {
        return None;
    }

    Some(PacketDescriptor {
        timestamp: 0,
        protocol,
        src_ip,
        src_port: u16::from_be_bytes([l4[0], l4[1]]),
        dst_ip,
        dst_port: u16::from_be_bytes([l4[2], l4[3]]),
        byte_len: 0,
        src_mac: None,
        dst_mac: None,
    })
}

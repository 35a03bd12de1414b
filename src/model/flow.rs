use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::model::{Locality, MacAddr, PortLabel, Protocol};
use crate::packet::PacketDescriptor;

/// Identity of one aggregate in the flow table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub port_label: PortLabel,
}

/// Accumulated bytes for one flow key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowRecord {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: Protocol,
    /// Source port of the most recent packet.
    pub src_port_label: PortLabel,
    /// Port label the record is stored under.
    pub dst_port_label: PortLabel,
    /// Microseconds since epoch of the first packet. Never updated by merges.
    pub first_seen: u64,
    pub total_bytes: u64,
    pub src_mac: Option<MacAddr>,
    pub dst_mac: Option<MacAddr>,
}

impl FlowRecord {
    pub fn new(pkt: &PacketDescriptor, dst_port_label: PortLabel) -> Self {
        Self {
            src_ip: pkt.src_ip,
            dst_ip: pkt.dst_ip,
            protocol: pkt.protocol,
            src_port_label: PortLabel::new(pkt.protocol, pkt.src_port),
            dst_port_label,
            first_seen: pkt.timestamp,
            total_bytes: u64::from(pkt.byte_len),
            src_mac: pkt.src_mac,
            dst_mac: pkt.dst_mac,
        }
    }

    /// Fold another packet of the same key into this record.
    pub fn merge(&mut self, pkt: &PacketDescriptor) {
        self.total_bytes = self.total_bytes.saturating_add(u64::from(pkt.byte_len));
        self.src_port_label = PortLabel::new(pkt.protocol, pkt.src_port);
        if pkt.src_mac.is_some() {
            self.src_mac = pkt.src_mac;
        }
        if pkt.dst_mac.is_some() {
            self.dst_mac = pkt.dst_mac;
        }
    }

    pub fn key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            port_label: self.dst_port_label,
        }
    }
}

/// Inbound/outbound byte totals for one classification pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LocalityTotals {
    pub total_inbound: u64,
    pub total_outbound: u64,
}

impl LocalityTotals {
    /// Internal and external flows do not contribute.
    pub fn add(&mut self, locality: Locality, bytes: u64) {
        match locality {
            Locality::Inbound => self.total_inbound = self.total_inbound.saturating_add(bytes),
            Locality::Outbound => self.total_outbound = self.total_outbound.saturating_add(bytes),
            Locality::Internal | Locality::External => {}
        }
    }
}

/// One exported flow, as handed to the snapshot publisher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlowRow {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: Protocol,
    pub port_label: PortLabel,
    #[serde(serialize_with = "serialize_timestamp")]
    pub first_seen: u64,
    pub total_bytes: u64,
    pub locality: Locality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_mac: Option<MacAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_mac: Option<MacAddr>,
}

impl FlowRow {
    pub fn from_record(record: &FlowRecord, locality: Locality) -> Self {
        Self {
            src_ip: record.src_ip,
            dst_ip: record.dst_ip,
            protocol: record.protocol,
            port_label: record.dst_port_label,
            first_seen: record.first_seen,
            total_bytes: record.total_bytes,
            locality,
            src_mac: record.src_mac,
            dst_mac: record.dst_mac,
        }
    }
}

/// Consistent view of the flow table plus derived totals.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Snapshot {
    #[serde(serialize_with = "serialize_timestamp")]
    pub taken_at: u64,
    pub flows: Vec<FlowRow>,
    pub totals: LocalityTotals,
    pub dropped_descriptors: u64,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Render microseconds since epoch as `YYYY-MM-DD HH:MM:SS` UTC.
pub fn format_timestamp(micros: u64) -> String {
    i64::try_from(micros)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn serialize_timestamp<S: Serializer>(micros: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*micros))
}

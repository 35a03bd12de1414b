// Offline ingestion of recorded packet descriptors.
//
// One descriptor per line, whitespace separated:
//
//   timestamp_us  proto  src_ip  src_port  dst_ip  dst_port  bytes
//
// Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::cidr;
use crate::error::NetoflowError;
use crate::model::Protocol;
use crate::packet::PacketDescriptor;
use crate::state::{FlowTable, RecordOutcome};

const FIELD_COUNT: usize = 7;

/// Counters for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: usize,
    pub created: usize,
    pub merged: usize,
    /// Zero-length descriptors rejected by the table.
    pub dropped: usize,
    /// Lines that could not be parsed.
    pub malformed: usize,
}

/// Parse one descriptor line. `line_no` is 1-based and only used in errors.
pub fn parse_descriptor_line(line: &str, line_no: usize) -> Result<PacketDescriptor, NetoflowError> {
    let malformed = |detail: String| NetoflowError::MalformedDescriptor {
        line: line_no,
        detail,
    };

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(malformed(format!(
            "expected {FIELD_COUNT} fields, found {}",
            fields.len()
        )));
    }

    let protocol = match fields[1].to_ascii_lowercase().as_str() {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        other => return Err(malformed(format!("unsupported protocol {other:?}"))),
    };

    let address = |s: &str| {
        cidr::address_to_int(s)
            .map(Ipv4Addr::from)
            .map_err(|e| malformed(e.to_string()))
    };

    Ok(PacketDescriptor {
        timestamp: number(fields[0], "timestamp", &malformed)?,
        protocol,
        src_ip: address(fields[2])?,
        src_port: number(fields[3], "src_port", &malformed)?,
        dst_ip: address(fields[4])?,
        dst_port: number(fields[5], "dst_port", &malformed)?,
        byte_len: number(fields[6], "bytes", &malformed)?,
        src_mac: None,
        dst_mac: None,
    })
}

fn number<T: FromStr>(
    s: &str,
    name: &str,
    malformed: &impl Fn(String) -> NetoflowError,
) -> Result<T, NetoflowError> {
    s.parse()
        .map_err(|_| malformed(format!("invalid {name} {s:?}")))
}

/// Feed every descriptor in `reader` into `table`.
///
/// Malformed lines are logged, counted as dropped descriptors and skipped.
/// Only a read failure of the underlying reader aborts the run.
pub fn replay<R: BufRead>(reader: R, table: &FlowTable) -> Result<ReplayStats, NetoflowError> {
    let mut stats = ReplayStats::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(NetoflowError::Input)?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        stats.lines += 1;

        match parse_descriptor_line(trimmed, idx + 1) {
            Ok(pkt) => match table.record_packet(&pkt) {
                RecordOutcome::Created => stats.created += 1,
                RecordOutcome::Merged => stats.merged += 1,
                RecordOutcome::Dropped => stats.dropped += 1,
            },
            Err(e) => {
                log::warn!("{e}");
                table.note_dropped();
                stats.malformed += 1;
            }
        }
    }

    log::debug!(
        "replay: {} lines, {} created, {} merged, {} dropped, {} malformed",
        stats.lines,
        stats.created,
        stats.merged,
        stats.dropped,
        stats.malformed
    );
    Ok(stats)
}

// Prometheus text exposition format.

use std::io::Write;

use crate::error::NetoflowError;
use crate::model::flow::{Snapshot, format_timestamp};

pub fn write_prometheus(snapshot: &Snapshot, writer: &mut impl Write) -> Result<(), NetoflowError> {
    write_header(writer, "hosts_src_dst", "Bytes per source, destination and port label", "gauge")?;
    for row in &snapshot.flows {
        writeln!(
            writer,
            "hosts_src_dst{{addr=\"{}\",port=\"{}\",first_seen=\"{}\",proto=\"{}\",locality=\"{}\"}} {}",
            escape_label(&format!("{}->{}", row.src_ip, row.dst_ip)),
            escape_label(&row.port_label.to_string()),
            escape_label(&format_timestamp(row.first_seen)),
            row.protocol,
            row.locality,
            row.total_bytes,
        )
        .map_err(NetoflowError::Serialization)?;
    }

    write_header(writer, "total_incoming", "Bytes from non-local to local networks", "gauge")?;
    writeln!(writer, "total_incoming {}", snapshot.totals.total_inbound)
        .map_err(NetoflowError::Serialization)?;

    write_header(writer, "total_outgoing", "Bytes from local to non-local networks", "gauge")?;
    writeln!(writer, "total_outgoing {}", snapshot.totals.total_outbound)
        .map_err(NetoflowError::Serialization)?;

    write_header(
        writer,
        "dropped_descriptors_total",
        "Packet descriptors rejected before accounting",
        "counter",
    )?;
    writeln!(writer, "dropped_descriptors_total {}", snapshot.dropped_descriptors)
        .map_err(NetoflowError::Serialization)?;

    Ok(())
}

fn write_header(
    writer: &mut impl Write,
    name: &str,
    help: &str,
    kind: &str,
) -> Result<(), NetoflowError> {
    writeln!(writer, "# HELP {name} {help}").map_err(NetoflowError::Serialization)?;
    writeln!(writer, "# TYPE {name} {kind}").map_err(NetoflowError::Serialization)
}

/// Escape a label value: backslash, double quote and newline.
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::model::flow::{FlowRow, LocalityTotals};
    use crate::model::{Locality, PortLabel, Protocol};

    fn render(snapshot: &Snapshot) -> String {
        let mut buf = Vec::new();
        write_prometheus(snapshot, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    // ut_prometheus_flow_line
    #[test]
    fn ut_prometheus_flow_line() {
        let snap = Snapshot {
            taken_at: 0,
            flows: vec![FlowRow {
                src_ip: Ipv4Addr::new(93, 10, 10, 1),
                dst_ip: Ipv4Addr::new(10, 0, 0, 5),
                protocol: Protocol::Tcp,
                port_label: PortLabel::new(Protocol::Tcp, 443).as_reply(),
                first_seen: 0,
                total_bytes: 2000,
                locality: Locality::Inbound,
                src_mac: None,
                dst_mac: None,
            }],
            totals: LocalityTotals {
                total_inbound: 2000,
                total_outbound: 0,
            },
            dropped_descriptors: 4,
        };
        let out = render(&snap);
        assert!(out.contains(
            "hosts_src_dst{addr=\"93.10.10.1->10.0.0.5\",port=\"reply_tcp/443\",\
             first_seen=\"1970-01-01 00:00:00\",proto=\"tcp\",locality=\"inbound\"} 2000\n"
        ));
        assert!(out.contains("total_incoming 2000\n"));
        assert!(out.contains("total_outgoing 0\n"));
        assert!(out.contains("# TYPE dropped_descriptors_total counter\n"));
        assert!(out.contains("dropped_descriptors_total 4\n"));
    }

    // ut_prometheus_empty_has_totals
    #[test]
    fn ut_prometheus_empty_has_totals() {
        let out = render(&Snapshot::empty());
        assert!(!out.contains("hosts_src_dst{"));
        assert!(out.contains("# TYPE hosts_src_dst gauge\n"));
        assert!(out.contains("total_incoming 0\n"));
    }

    // ut_escape_label
    #[test]
    fn ut_escape_label() {
        assert_eq!(escape_label("plain"), "plain");
        assert_eq!(escape_label("a\"b"), "a\\\"b");
        assert_eq!(escape_label("a\\b"), "a\\\\b");
        assert_eq!(escape_label("a\nb"), "a\\nb");
    }
}

use std::io::Write;

use crate::error::NetoflowError;
use crate::model::flow::Snapshot;

/// Write the snapshot as pretty-printed JSON.
pub fn write_json(snapshot: &Snapshot, writer: &mut impl Write) -> Result<(), NetoflowError> {
    serde_json::to_writer_pretty(&mut *writer, snapshot)
        .map_err(|e| NetoflowError::Serialization(std::io::Error::other(e.to_string())))?;
    writeln!(writer).map_err(NetoflowError::Serialization)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::model::flow::{FlowRow, LocalityTotals};
    use crate::model::{Locality, MacAddr, PortLabel, Protocol};

    fn snapshot_with_data() -> Snapshot {
        Snapshot {
            taken_at: 1_700_000_000_000_000,
            flows: vec![
                FlowRow {
                    src_ip: Ipv4Addr::new(10, 0, 0, 5),
                    dst_ip: Ipv4Addr::new(93, 10, 10, 1),
                    protocol: Protocol::Tcp,
                    port_label: PortLabel::new(Protocol::Tcp, 443),
                    first_seen: 0,
                    total_bytes: 1000,
                    locality: Locality::Outbound,
                    src_mac: Some(MacAddr([0x02, 0, 0, 0, 0, 0x01])),
                    dst_mac: None,
                },
                FlowRow {
                    src_ip: Ipv4Addr::new(93, 10, 10, 1),
                    dst_ip: Ipv4Addr::new(10, 0, 0, 5),
                    protocol: Protocol::Tcp,
                    port_label: PortLabel::new(Protocol::Tcp, 443).as_reply(),
                    first_seen: 0,
                    total_bytes: 2000,
                    locality: Locality::Inbound,
                    src_mac: None,
                    dst_mac: None,
                },
            ],
            totals: LocalityTotals {
                total_inbound: 2000,
                total_outbound: 1000,
            },
            dropped_descriptors: 3,
        }
    }

    fn render(snapshot: &Snapshot) -> serde_json::Value {
        let mut buf = Vec::new();
        write_json(snapshot, &mut buf).unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    // ut_json_empty_snapshot
    #[test]
    fn ut_json_empty_snapshot() {
        let v = render(&Snapshot::empty());
        assert_eq!(v["flows"].as_array().unwrap().len(), 0);
        assert_eq!(v["totals"]["total_inbound"], 0);
        assert_eq!(v["taken_at"], "1970-01-01 00:00:00");
    }

    // ut_json_flow_fields
    #[test]
    fn ut_json_flow_fields() {
        let v = render(&snapshot_with_data());
        let flow = &v["flows"][0];
        assert_eq!(flow["src_ip"], "10.0.0.5");
        assert_eq!(flow["dst_ip"], "93.10.10.1");
        assert_eq!(flow["protocol"], "tcp");
        assert_eq!(flow["port_label"], "tcp/443");
        assert_eq!(flow["locality"], "outbound");
        assert_eq!(flow["total_bytes"], 1000);
        assert_eq!(flow["src_mac"], "02:00:00:00:00:01");
        assert!(flow.get("dst_mac").is_none());

        assert_eq!(v["flows"][1]["port_label"], "reply_tcp/443");
        assert_eq!(v["taken_at"], "2023-11-14 22:13:20");
        assert_eq!(v["totals"]["total_outbound"], 1000);
        assert_eq!(v["dropped_descriptors"], 3);
    }
}

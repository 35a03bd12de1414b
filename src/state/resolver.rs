// Direction resolution: forward flow or reply to an earlier forward flow.

use std::net::Ipv4Addr;

use crate::model::PortLabel;
use crate::model::flow::{FlowKey, FlowRecord};
use crate::packet::PacketDescriptor;
use crate::registry::LocalNetworks;

use super::FlowMap;

/// Existence-checked three-level lookup.
pub fn lookup<'a>(
    flows: &'a FlowMap,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    label: &PortLabel,
) -> Option<&'a FlowRecord> {
    flows.get(&src)?.get(&dst)?.get(label)
}

/// Destination port label for `pkt`.
///
/// The packet is reply traffic when a record exists for the reverse key
/// (dst -> src under the packet's source port label) and the packet is
/// addressed to a configured local host. Reply traffic is labelled
/// `reply_<src label>` so all return traffic of one request lands in one
/// aggregate, whatever ephemeral port the remote end replies to.
pub fn destination_label(
    flows: &FlowMap,
    local: &LocalNetworks,
    pkt: &PacketDescriptor,
) -> PortLabel {
    let src_label = PortLabel::new(pkt.protocol, pkt.src_port);
    let reverse_exists = lookup(flows, pkt.dst_ip, pkt.src_ip, &src_label).is_some();
    if reverse_exists && local.is_configured_local_host(pkt.dst_ip) {
        src_label.as_reply()
    } else {
        PortLabel::new(pkt.protocol, pkt.dst_port)
    }
}

/// Resolve the key `pkt` is accounted under.
///
/// If nothing is stored under the plain destination label, a reply-labelled
/// record for the same pair is joined instead.
pub fn resolve(flows: &FlowMap, local: &LocalNetworks, pkt: &PacketDescriptor) -> FlowKey {
    let mut port_label = destination_label(flows, local, pkt);
    if !port_label.reply
        && lookup(flows, pkt.src_ip, pkt.dst_ip, &port_label).is_none()
        && lookup(flows, pkt.src_ip, pkt.dst_ip, &port_label.as_reply()).is_some()
    {
        port_label = port_label.as_reply();
    }
    FlowKey {
        src_ip: pkt.src_ip,
        dst_ip: pkt.dst_ip,
        port_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;

    fn pkt(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> PacketDescriptor {
        PacketDescriptor {
            timestamp: 1,
            protocol: Protocol::Tcp,
            src_ip: Ipv4Addr::from(src),
            src_port: sport,
            dst_ip: Ipv4Addr::from(dst),
            dst_port: dport,
            byte_len: 100,
            src_mac: None,
            dst_mac: None,
        }
    }

    fn insert(flows: &mut FlowMap, p: &PacketDescriptor, label: PortLabel) {
        flows
            .entry(p.src_ip)
            .or_default()
            .entry(p.dst_ip)
            .or_default()
            .insert(label, FlowRecord::new(p, label));
    }

    fn local() -> LocalNetworks {
        LocalNetworks::from_strings(&[], &["10.0.0.5/24"]).unwrap()
    }

    // ut_forward_packet_uses_destination_port
    #[test]
    fn ut_forward_packet_uses_destination_port() {
        let flows = FlowMap::default();
        let p = pkt([10, 0, 0, 5], 51000, [93, 10, 10, 1], 443);
        let key = resolve(&flows, &local(), &p);
        assert_eq!(key.port_label.to_string(), "tcp/443");
    }

    // ut_reply_to_local_host_is_collapsed
    #[test]
    fn ut_reply_to_local_host_is_collapsed() {
        let mut flows = FlowMap::default();
        let fwd = pkt([10, 0, 0, 5], 51000, [93, 10, 10, 1], 443);
        insert(&mut flows, &fwd, PortLabel::new(Protocol::Tcp, 443));

        let back = pkt([93, 10, 10, 1], 443, [10, 0, 0, 5], 51000);
        let key = resolve(&flows, &local(), &back);
        assert_eq!(key.src_ip, Ipv4Addr::new(93, 10, 10, 1));
        assert_eq!(key.dst_ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(key.port_label.to_string(), "reply_tcp/443");
    }

    // ut_reply_to_unconfigured_host_is_not_collapsed
    #[test]
    fn ut_reply_to_unconfigured_host_is_not_collapsed() {
        let mut flows = FlowMap::default();
        let fwd = pkt([10, 0, 0, 9], 51000, [93, 10, 10, 1], 443);
        insert(&mut flows, &fwd, PortLabel::new(Protocol::Tcp, 443));

        let back = pkt([93, 10, 10, 1], 443, [10, 0, 0, 9], 51000);
        let key = resolve(&flows, &local(), &back);
        assert_eq!(key.port_label.to_string(), "tcp/51000");
    }

    // ut_reply_to_loopback_is_collapsed
    #[test]
    fn ut_reply_to_loopback_is_collapsed() {
        let mut flows = FlowMap::default();
        let fwd = pkt([127, 0, 0, 1], 40000, [127, 0, 0, 2], 8080);
        insert(&mut flows, &fwd, PortLabel::new(Protocol::Tcp, 8080));

        let back = pkt([127, 0, 0, 2], 8080, [127, 0, 0, 1], 40000);
        let key = resolve(&flows, &LocalNetworks::default(), &back);
        assert_eq!(key.port_label.to_string(), "reply_tcp/8080");
    }

    // ut_no_reverse_record_means_forward
    #[test]
    fn ut_no_reverse_record_means_forward() {
        let flows = FlowMap::default();
        let back = pkt([93, 10, 10, 1], 443, [10, 0, 0, 5], 51000);
        let key = resolve(&flows, &local(), &back);
        assert_eq!(key.port_label.to_string(), "tcp/51000");
    }

    // ut_joins_existing_reply_record
    #[test]
    fn ut_joins_existing_reply_record() {
        let mut flows = FlowMap::default();
        let earlier = pkt([93, 10, 10, 1], 443, [10, 0, 0, 9], 443);
        let reply = PortLabel::new(Protocol::Tcp, 443).as_reply();
        insert(&mut flows, &earlier, reply);

        // No reverse record and dst not a configured host, so the plain
        // label is computed first, then the reply-labelled record is found.
        let next = pkt([93, 10, 10, 1], 443, [10, 0, 0, 9], 443);
        let key = resolve(&flows, &local(), &next);
        assert_eq!(key.port_label, reply);
    }

    // ut_lookup_is_existence_checked: missing levels return None, no panic
    #[test]
    fn ut_lookup_is_existence_checked() {
        let mut flows = FlowMap::default();
        let p = pkt([10, 0, 0, 5], 1, [10, 0, 0, 6], 2);
        assert!(lookup(&flows, p.src_ip, p.dst_ip, &PortLabel::new(Protocol::Tcp, 2)).is_none());
        insert(&mut flows, &p, PortLabel::new(Protocol::Tcp, 2));
        assert!(lookup(&flows, p.src_ip, p.dst_ip, &PortLabel::new(Protocol::Tcp, 2)).is_some());
        assert!(lookup(&flows, p.src_ip, p.src_ip, &PortLabel::new(Protocol::Tcp, 2)).is_none());
        assert!(lookup(&flows, p.src_ip, p.dst_ip, &PortLabel::new(Protocol::Udp, 2)).is_none());
    }
}

// Locality classification and in/out totals.

use crate::model::Locality;
use crate::model::flow::{FlowRecord, FlowRow, LocalityTotals};
use crate::registry::LocalNetworks;

use super::FlowMap;

/// Classify one flow by its endpoints.
///
/// Each endpoint gets a single any-match answer from the registry, so a flow
/// whose source sits in several overlapping local blocks is still counted once.
pub fn classify_flow(record: &FlowRecord, local: &LocalNetworks) -> Locality {
    Locality::from_endpoints(
        local.is_local_network(record.src_ip),
        local.is_local_network(record.dst_ip),
    )
}

/// Recompute in/out totals from scratch over `records`.
pub fn classify<'a, I>(records: I, local: &LocalNetworks) -> LocalityTotals
where
    I: IntoIterator<Item = &'a FlowRecord>,
{
    let mut totals = LocalityTotals::default();
    for record in records {
        totals.add(classify_flow(record, local), record.total_bytes);
    }
    totals
}

fn records(flows: &FlowMap) -> impl Iterator<Item = &FlowRecord> {
    flows
        .values()
        .flat_map(|by_dst| by_dst.values())
        .flat_map(|by_label| by_label.values())
}

/// Export rows for every record, plus totals folded through [`classify`].
pub(crate) fn export(flows: &FlowMap, local: &LocalNetworks) -> (Vec<FlowRow>, LocalityTotals) {
    let rows = records(flows)
        .map(|record| FlowRow::from_record(record, classify_flow(record, local)))
        .collect();
    (rows, classify(records(flows), local))
}

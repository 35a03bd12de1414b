use std::io::Write;

use crate::error::NetoflowError;
use crate::model::flow::{Snapshot, format_timestamp};

/// Write the snapshot as TSV.
///
/// Output: header row, one row per flow sorted by bytes descending, then a
/// `# totals` section with the inbound/outbound sums and dropped count.
pub fn write_tsv(snapshot: &Snapshot, writer: &mut impl Write) -> Result<(), NetoflowError> {
    let mut rows: Vec<_> = snapshot.flows.iter().collect();
    rows.sort_by(|a, b| b.total_bytes.cmp(&a.total_bytes));

    writeln!(
        writer,
        "src_ip\tdst_ip\tport\tproto\tlocality\tfirst_seen\tbytes"
    )
    .map_err(NetoflowError::Serialization)?;

    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.src_ip,
            row.dst_ip,
            row.port_label,
            row.protocol,
            row.locality,
            format_timestamp(row.first_seen),
            row.total_bytes,
        )
        .map_err(NetoflowError::Serialization)?;
    }

    writeln!(writer, "# totals").map_err(NetoflowError::Serialization)?;
    writeln!(writer, "total_incoming\t{}", snapshot.totals.total_inbound)
        .map_err(NetoflowError::Serialization)?;
    writeln!(writer, "total_outgoing\t{}", snapshot.totals.total_outbound)
        .map_err(NetoflowError::Serialization)?;
    writeln!(writer, "dropped\t{}", snapshot.dropped_descriptors)
        .map_err(NetoflowError::Serialization)?;

    Ok(())
}

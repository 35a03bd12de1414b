pub mod json;
pub mod prometheus;
pub mod tsv;

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;
use crate::error::NetoflowError;
use crate::model::flow::Snapshot;

/// Write a snapshot of the flow table in the specified format.
pub fn write_snapshot(
    snapshot: &Snapshot,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<(), NetoflowError> {
    match format {
        OutputFormat::Prometheus => prometheus::write_prometheus(snapshot, writer),
        OutputFormat::Json => json::write_json(snapshot, writer),
        OutputFormat::Tsv => tsv::write_tsv(snapshot, writer),
    }
}

/// Replace `path` with a freshly rendered snapshot.
///
/// Renders into `<path>.tmp` and renames it over `path`, so a reader always
/// sees either the previous or the new snapshot in full.
pub fn publish_to_path(
    snapshot: &Snapshot,
    format: OutputFormat,
    path: &Path,
) -> Result<(), NetoflowError> {
    let tmp = tmp_path(path);
    {
        let file = fs::File::create(&tmp).map_err(NetoflowError::Serialization)?;
        let mut writer = BufWriter::new(file);
        write_snapshot(snapshot, format, &mut writer)?;
        writer.flush().map_err(NetoflowError::Serialization)?;
    }
    fs::rename(&tmp, path).map_err(NetoflowError::Serialization)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

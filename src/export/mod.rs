//! CSV export of stored listings.

use crate::models::ListingRecord;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Write `records` as CSV with a header row; returns rows written.
pub fn write_csv<W: Write>(writer: W, records: &[ListingRecord]) -> Result<usize> {
    let mut out = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    for record in records {
        out.serialize(record)
            .with_context(|| format!("serialize {}", record.url))?;
    }
    out.flush()?;
    Ok(records.len())
}

pub fn export_csv(path: &Path, records: &[ListingRecord]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Could not create {:?}", path))?;
    let n = write_csv(file, records)?;
    info!("Exported {} listings to {:?}", n, path);
    Ok(n)
}

use std::{
    ffi::OsStr,
    io::{Cursor, Read},
};

use anyhow::{Result, bail};

/// Largest report accepted from an artifact, whatever the archive header claims.
const MAX_REPORT_BYTES: u64 = 64 * 1024 * 1024;

/// Pull the report JSON out of a downloaded artifact archive.
///
/// A file named after the artifact wins; otherwise the first `.json` file
/// with `report` in its name is used.
pub fn extract_report(bytes: &[u8], artifact_name: &str) -> Result<Vec<u8>> {
    extract_report_limited(bytes, artifact_name, MAX_REPORT_BYTES)
}

fn extract_report_limited(bytes: &[u8], artifact_name: &str, limit: u64) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut fallback = None;
    for i in 0..archive.len() {
        let Some(path) = archive.by_index(i)?.enclosed_name() else {
            continue;
        };
        if path.extension() != Some(OsStr::new("json")) {
            continue;
        }
        if path.file_stem() == Some(OsStr::new(artifact_name)) {
            return read_entry(&mut archive, i, limit);
        }
        if fallback.is_none()
            && path.file_name().and_then(OsStr::to_str).is_some_and(|name| name.contains("report"))
        {
            fallback = Some(i);
        }
    }
    match fallback {
        Some(i) => read_entry(&mut archive, i, limit),
        None => bail!("No report JSON in artifact {}", artifact_name),
    }
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    index: usize,
    limit: u64,
) -> Result<Vec<u8>> {
    let file = archive.by_index(index)?;
    let name = file.name().to_string();
    let mut contents = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut contents)?;
    if contents.len() as u64 > limit {
        bail!("Report {} exceeds {} bytes", name, limit);
    }
    Ok(contents)
}

//! Local inbox scan: the discovery side of a poll cycle.

use std::path::Path;
use std::time::UNIX_EPOCH;

use claimgate_core::CandidateFile;

/// List regular files directly inside `dir`, sorted by name.
pub fn scan_inbox(dir: &Path) -> std::io::Result<Vec<CandidateFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %entry.path().display(), "skipping non-utf8 file name");
            continue;
        };
        let mut file = CandidateFile::new(name);
        if let Some(secs) = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_secs()).ok())
        {
            file = file.with_last_modified(secs);
        }
        files.push(file);
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

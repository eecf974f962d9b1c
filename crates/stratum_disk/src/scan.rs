// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Directory scans for usage accounting and quota eviction.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::SystemTime,
};

use stratum_tier::{EntryMetadata, Priority};
use tokio::{fs, io::AsyncReadExt};

use crate::{
    codec::{self, CorruptRecord, HEADER_LEN, Header},
    path::is_record,
};

/// High priority records are only evicted when more candidates than this were found.
pub(crate) const HIGH_PRIORITY_THRESHOLD: usize = 10;

/// A record file and its length on disk.
#[derive(Clone, Debug)]
pub(crate) struct RecordFile {
    pub(crate) path: PathBuf,
    pub(crate) len: u64,
}

/// A record that may be evicted.
#[derive(Clone, Debug)]
pub(crate) struct Candidate {
    pub(crate) path: PathBuf,
    pub(crate) len: u64,
    last_accessed_at: SystemTime,
}

/// Eviction candidates, each group in eviction order.
#[derive(Debug, Default)]
pub(crate) struct Candidates {
    /// Records that cannot be decoded.
    pub(crate) corrupt: Vec<RecordFile>,
    /// `Low` and `Normal` records, least recently used first.
    pub(crate) regular: Vec<Candidate>,
    /// `High` records, least recently used first.
    pub(crate) high: Vec<Candidate>,
}

impl Candidates {
    pub(crate) fn total(&self) -> usize {
        self.corrupt.len() + self.regular.len() + self.high.len()
    }
}

/// Lists the paths in `directory` accepted by `select`.
///
/// A missing directory has no files.
pub(crate) async fn paths(directory: &Path, select: fn(&Path) -> bool) -> io::Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if select(&path) {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Lists the record files in `directory` with their lengths.
pub(crate) async fn records(directory: &Path) -> io::Result<Vec<RecordFile>> {
    let mut records = Vec::new();
    for path in paths(directory, is_record).await? {
        // Files removed since the listing no longer count.
        if let Ok(metadata) = fs::metadata(&path).await
            && metadata.is_file()
        {
            records.push(RecordFile { path, len: metadata.len() });
        }
    }
    Ok(records)
}

/// Classifies `records` for eviction, excluding `target` and pinned records.
pub(crate) async fn eviction_candidates(records: Vec<RecordFile>, target: &Path) -> Candidates {
    let mut candidates = Candidates::default();

    for record in records {
        if record.path == target {
            continue;
        }

        match read_metadata(&record.path).await {
            Ok(Some(metadata)) => {
                let candidate = Candidate {
                    last_accessed_at: metadata.last_accessed_at(),
                    path: record.path,
                    len: record.len,
                };
                match metadata.priority() {
                    Priority::Low | Priority::Normal => candidates.regular.push(candidate),
                    Priority::High => candidates.high.push(candidate),
                    Priority::NeverRemove => {}
                }
            }
            Ok(None) => {}
            Err(_) => candidates.corrupt.push(record),
        }
    }

    // Ties under a coarse clock are broken by file name so the order is stable.
    let order = |a: &Candidate, b: &Candidate| a.last_accessed_at.cmp(&b.last_accessed_at).then_with(|| a.path.cmp(&b.path));
    candidates.regular.sort_by(order);
    candidates.high.sort_by(order);
    candidates
}

/// Reads only the header and metadata of a record.
///
/// Returns `Ok(None)` if the file vanished or could not be read.
async fn read_metadata(path: &Path) -> Result<Option<EntryMetadata>, CorruptRecord> {
    let Ok(mut file) = fs::File::open(path).await else {
        return Ok(None);
    };
    let Ok(file_len) = file.metadata().await.map(|m| m.len()) else {
        return Ok(None);
    };

    let mut prefix = vec![0_u8; HEADER_LEN];
    if file.read_exact(&mut prefix).await.is_err() {
        return Err(CorruptRecord::new("record is shorter than its header"));
    }

    let header = Header::decode(&prefix)?;
    if header.record_len() != file_len {
        return Err(CorruptRecord::new("record length does not match its header"));
    }

    prefix.resize(HEADER_LEN + header.metadata_len as usize, 0);
    if file.read_exact(&mut prefix[HEADER_LEN..]).await.is_err() {
        return Err(CorruptRecord::new("record is shorter than its metadata"));
    }

    codec::decode_metadata(&header, &prefix).map(Some)
}

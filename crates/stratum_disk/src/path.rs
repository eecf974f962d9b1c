// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mapping from cache keys to file names.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use xxhash_rust::xxh3::xxh3_64;

/// Extension of files holding a cache record.
pub(crate) const RECORD_EXTENSION: &str = "cache";

/// Extension of files holding a record that is still being written.
pub(crate) const TEMP_EXTENSION: &str = "tmp";

const MAX_FILE_NAME_LEN: usize = 100;
const HASH_LEN: usize = 8;

// `_` + hash + `.` + extension
const SUFFIX_LEN: usize = 1 + HASH_LEN + 1 + RECORD_EXTENSION.len();

/// Derives the file name for a key.
///
/// Characters that are not portable in file names are replaced with `_` and a
/// hash of the original key is appended, so keys that sanitize to the same text
/// still map to different files. Long keys are truncated to keep the name within
/// 100 bytes; the hash still covers the whole key.
pub(crate) fn file_name(key: &str) -> String {
    let hash = format!("{:016x}", xxh3_64(key.as_bytes()));

    let mut stem: String = key.chars().map(|c| if is_portable(c) { c } else { '_' }).collect();
    truncate_at_char_boundary(&mut stem, MAX_FILE_NAME_LEN - SUFFIX_LEN);

    format!("{stem}_{}.{RECORD_EXTENSION}", &hash[..HASH_LEN])
}

/// Default name of the per-value-type directory: the unqualified type name.
pub(crate) fn type_directory_name<V>() -> String {
    let full = std::any::type_name::<V>();
    let outer = full.split('<').next().unwrap_or(full);
    let short = outer.rsplit("::").next().unwrap_or(outer);
    short.chars().map(|c| if is_portable(c) { c } else { '_' }).collect()
}

/// Path of a fresh temporary file next to `target`.
pub(crate) fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_else(|| OsStr::new("record")).to_os_string();
    name.push(format!(".{:016x}.{TEMP_EXTENSION}", fastrand::u64(..)));
    target.with_file_name(name)
}

pub(crate) fn is_record(path: &Path) -> bool {
    path.extension() == Some(OsStr::new(RECORD_EXTENSION))
}

pub(crate) fn is_temporary(path: &Path) -> bool {
    path.extension() == Some(OsStr::new(TEMP_EXTENSION))
}

fn is_portable(c: char) -> bool {
    !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }

    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

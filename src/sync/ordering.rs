//! Deterministic ordering of a dump's data files
//!
//! Exported files are named `sync_<dump_id>/<table>/part-<part>-<uuid>.avro`.
//! Rows must be emitted in `(dump_id, part)` order, so a path that does not
//! follow this layout is an error rather than something to guess around.

use crate::error::{HeapSyncError, Result};

/// Sort key of a data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileSortKey {
    /// Dump the file belongs to
    pub dump_id: i64,
    /// Part number within the table's export
    pub part_number: u64,
}

/// Orders the files of a table within a bucket
#[derive(Debug, Clone)]
pub struct FileOrderer {
    bucket_root: String,
}

impl FileOrderer {
    /// Create an orderer for paths rooted at `s3://<bucket>/`
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket_root: format!("s3://{}/", bucket),
        }
    }

    /// Turn a manifest path into a bucket key
    pub fn strip_bucket_root<'p>(&self, path: &'p str) -> &'p str {
        path.strip_prefix(self.bucket_root.as_str()).unwrap_or(path)
    }

    /// Strip and sort `files` by `(dump_id, part_number)`.
    ///
    /// Equal keys fall back to comparing the key itself, so the result does
    /// not depend on the input order.
    pub fn order<S: AsRef<str>>(&self, files: &[S]) -> Result<Vec<String>> {
        let mut keyed = files
            .iter()
            .map(|file| {
                let key = self.strip_bucket_root(file.as_ref());
                sort_key(key).map(|sort| (sort, key.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        keyed.sort_unstable();
        Ok(keyed.into_iter().map(|(_, key)| key).collect())
    }
}

/// Parse the sort key out of a bucket key
pub fn sort_key(key: &str) -> Result<FileSortKey> {
    let malformed = || HeapSyncError::MalformedFileName(key.to_string());

    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(malformed());
    }

    let dump_id = segments[0]
        .strip_prefix("sync_")
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<i64>().ok())
        .ok_or_else(malformed)?;

    let file_name = segments[segments.len() - 1];
    let rest = file_name.strip_prefix("part-").ok_or_else(malformed)?;
    let digits_len = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits_len == 0 {
        return Err(malformed());
    }
    match rest.as_bytes().get(digits_len) {
        None | Some(b'-') | Some(b'.') => {}
        Some(_) => return Err(malformed()),
    }
    let part_number = rest[..digits_len].parse::<u64>().map_err(|_| malformed())?;

    Ok(FileSortKey {
        dump_id,
        part_number,
    })
}

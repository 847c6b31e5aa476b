//! Kaldi-style script (scp) index files.
//!
//! Each line maps an utterance id to a location: `utt_id path:offset`.

use crate::error::{Result, SeqfeedError};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One feature reference: where an utterance's matrix lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScpEntry {
    pub utt_id: String,
    pub path: PathBuf,
    /// Byte offset of the binary matrix header inside `path`.
    pub offset: u64,
}

impl ScpEntry {
    pub fn new(utt_id: impl Into<String>, path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            utt_id: utt_id.into(),
            path: path.into(),
            offset,
        }
    }

    /// Parse `utt_id path[:offset]`. A missing offset means the start of the file.
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = |message: &str| SeqfeedError::MalformedIndex {
            line: line.to_string(),
            message: message.to_string(),
        };

        let trimmed = line.trim();
        let (utt_id, location) = trimmed
            .split_once(char::is_whitespace)
            .ok_or_else(|| malformed("expected '<utt_id> <path>[:<offset>]'"))?;
        let location = location.trim();
        if location.is_empty() || location.contains(char::is_whitespace) {
            return Err(malformed("expected exactly one location field"));
        }

        let (path, offset) = match location.rsplit_once(':') {
            Some((path, offset)) if !path.is_empty() => match offset.parse::<u64>() {
                Ok(offset) => (path, offset),
                Err(_) => return Err(malformed("offset is not a byte position")),
            },
            _ => (location, 0),
        };

        Ok(Self::new(utt_id, path, offset))
    }
}

impl fmt::Display for ScpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.utt_id, self.path.display(), self.offset)
    }
}

/// Read a feature index, keeping file order.
pub fn read_feature_scp(path: &Path) -> Result<Vec<ScpEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(ScpEntry::parse(&line)?);
    }
    Ok(entries)
}

/// Read an index as `utt_id → full line`, as the lattice provider expects.
pub fn read_scp_index(path: &Path) -> Result<HashMap<String, String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut index = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let (Some(utt_id), Some(_), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(SeqfeedError::MalformedIndex {
                line: line.clone(),
                message: "expected '<utt_id> <location>'".to_string(),
            });
        };
        index.insert(utt_id.to_string(), trimmed.to_string());
    }
    Ok(index)
}

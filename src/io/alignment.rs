//! Frame-level alignment files: `utt_id l0 l1 l2 ...` per line.
//!
//! The whole file is materialized before the package builder starts.
//! Paths ending in `.gz` are decompressed on the fly.

use crate::error::{Result, SeqfeedError};
use flate2::read::MultiGzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Utterance id → label sequence.
pub type AlignmentMap = HashMap<String, Vec<i32>>;

/// Open a text file, transparently decompressing gzip.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let gzipped = path.extension().is_some_and(|ext| ext == "gz");
    if gzipped {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Read every alignment in `path`.
///
/// Blank lines and utterances with an empty label sequence are skipped.
pub fn read_alignment(path: &Path) -> Result<AlignmentMap> {
    parse_alignment(open_text(path)?)
}

/// Parse alignments from any buffered reader.
pub fn parse_alignment<R: BufRead>(reader: R) -> Result<AlignmentMap> {
    let mut alignments = AlignmentMap::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((utt_id, labels)) = trimmed.split_once(char::is_whitespace) else {
            continue;
        };
        let labels = labels
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<i32>()
                    .map_err(|_| SeqfeedError::MalformedAlignment {
                        line_no: line_no + 1,
                        message: format!("'{}' is not an integer label", token),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        if labels.is_empty() {
            continue;
        }
        alignments.insert(utt_id.to_string(), labels);
    }
    log::debug!("read {} alignments", alignments.len());
    Ok(alignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    #[test]
    fn test_parse_basic() {
        let text = "utt1 1 1 2 3\nutt2 4 4\n";
        let map = parse_alignment(Cursor::new(text)).unwrap();
        assert_eq!(map["utt1"], vec![1, 1, 2, 3]);
        assert_eq!(map["utt2"], vec![4, 4]);
    }

    #[test]
    fn test_empty_lines_and_alignments_skipped() {
        let text = "\nutt1\nutt2   \nutt3 7\n";
        let map = parse_alignment(Cursor::new(text)).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["utt3"], vec![7]);
    }

    #[test]
    fn test_bad_label_reports_line() {
        let text = "utt1 1 2\nutt2 3 x\n";
        let err = parse_alignment(Cursor::new(text)).unwrap_err();
        match err {
            SeqfeedError::MalformedAlignment { line_no, message } => {
                assert_eq!(line_no, 2);
                assert!(message.contains("'x'"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_read_plain_and_gzip_files() {
        let dir = TempDir::new().unwrap();

        let plain = dir.path().join("ali.txt");
        std::fs::write(&plain, "a 1 2\n").unwrap();
        assert_eq!(read_alignment(&plain).unwrap()["a"], vec![1, 2]);

        let gz = dir.path().join("ali.1.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"b 3 4 5\n").unwrap();
        encoder.finish().unwrap();
        assert_eq!(read_alignment(&gz).unwrap()["b"], vec![3, 4, 5]);
    }
}

//! Binary Kaldi matrices stored in ark files.
//!
//! Layout at the offset an scp line points to:
//! `\0B`, a type token (`FM ` for f32, `DM ` for f64), then `\x04` + rows
//! and `\x04` + cols as little-endian i32, then the row-major payload.

use crate::error::{Result, SeqfeedError};
use crate::io::FeatureReader;
use crate::io::scp::ScpEntry;
use ndarray::{Array2, ArrayView2};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precision {
    Single,
    Double,
}

impl Precision {
    fn width(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MatrixHeader {
    precision: Precision,
    rows: usize,
    cols: usize,
}

/// Reads feature matrices straight from ark files by byte offset.
///
/// Stateless: every read opens its own file handle, so one reader can be
/// shared by all loader workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArkReader;

impl ArkReader {
    pub fn new() -> Self {
        Self
    }

    fn open(entry: &ScpEntry) -> Result<BufReader<File>> {
        let mut file = File::open(&entry.path)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        Ok(BufReader::new(file))
    }
}

impl FeatureReader for ArkReader {
    fn read(&self, entry: &ScpEntry) -> Result<Array2<f32>> {
        let mut reader = Self::open(entry)?;
        let header = read_header(&mut reader, &entry.path)?;
        read_payload(&mut reader, header, &entry.path)
    }

    fn frame_count(&self, entry: &ScpEntry) -> Result<usize> {
        let mut reader = Self::open(entry)?;
        Ok(read_header(&mut reader, &entry.path)?.rows)
    }
}

fn format_error(path: &Path, message: impl Into<String>) -> SeqfeedError {
    SeqfeedError::MatrixFormat {
        path: path.display().to_string(),
        message: message.into(),
    }
}

fn read_header<R: Read>(reader: &mut R, path: &Path) -> Result<MatrixHeader> {
    let mut magic = [0u8; 5];
    reader.read_exact(&mut magic)?;
    if magic[0] != 0 || magic[1] != b'B' {
        return Err(format_error(path, "not a binary matrix"));
    }
    let precision = match &magic[2..] {
        b"FM " => Precision::Single,
        b"DM " => Precision::Double,
        b"CM " | b"CM2" | b"CM3" => {
            return Err(format_error(path, "compressed matrices are not supported"));
        }
        other => {
            return Err(format_error(
                path,
                format!("unknown matrix type '{}'", String::from_utf8_lossy(other)),
            ));
        }
    };
    let rows = read_dim(reader, path)?;
    let cols = read_dim(reader, path)?;
    Ok(MatrixHeader {
        precision,
        rows,
        cols,
    })
}

fn read_dim<R: Read>(reader: &mut R, path: &Path) -> Result<usize> {
    let mut buf = [0u8; 5];
    reader.read_exact(&mut buf)?;
    if buf[0] != 4 {
        return Err(format_error(path, format!("bad integer size {}", buf[0])));
    }
    let value = i32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
    usize::try_from(value).map_err(|_| format_error(path, format!("negative dimension {}", value)))
}

/// Bytes left between the reader's position and the end of the stream.
fn remaining<R: Seek>(reader: &mut R) -> io::Result<u64> {
    let position = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(position))?;
    Ok(end.saturating_sub(position))
}

fn read_payload<R: Read + Seek>(
    reader: &mut R,
    header: MatrixHeader,
    path: &Path,
) -> Result<Array2<f32>> {
    let size = header
        .rows
        .checked_mul(header.cols)
        .and_then(|count| count.checked_mul(header.precision.width()))
        .ok_or_else(|| format_error(path, "matrix dimensions overflow"))?;
    // Checked before allocating: a corrupt header must not size the buffer
    if size as u64 > remaining(reader)? {
        return Err(format_error(
            path,
            format!("truncated {}x{} matrix", header.rows, header.cols),
        ));
    }
    let mut bytes = vec![0u8; size];
    reader.read_exact(&mut bytes).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            format_error(
                path,
                format!("truncated {}x{} matrix", header.rows, header.cols),
            )
        } else {
            SeqfeedError::Io(e)
        }
    })?;

    let values: Vec<f32> = match header.precision {
        Precision::Single => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Precision::Double => bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
    };
    Ok(Array2::from_shape_vec((header.rows, header.cols), values)?)
}

/// Append `utt_id` and its matrix to an ark stream in binary float format.
///
/// Returns the byte offset of the matrix header, i.e. the value an scp line
/// for this utterance carries.
pub fn write_matrix<W: Write + Seek>(
    writer: &mut W,
    utt_id: &str,
    matrix: ArrayView2<'_, f32>,
) -> io::Result<u64> {
    writer.write_all(utt_id.as_bytes())?;
    writer.write_all(b" ")?;
    let offset = writer.stream_position()?;

    let dim = |n: usize| {
        i32::try_from(n).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "matrix too large"))
    };
    let (rows, cols) = matrix.dim();
    writer.write_all(b"\0BFM ")?;
    writer.write_all(&[4])?;
    writer.write_all(&dim(rows)?.to_le_bytes())?;
    writer.write_all(&[4])?;
    writer.write_all(&dim(cols)?.to_le_bytes())?;
    for value in matrix.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write_ark(dir: &TempDir, items: &[(&str, Array2<f32>)]) -> Vec<ScpEntry> {
        let path = dir.path().join("feats.ark");
        let mut file = File::create(&path).unwrap();
        items
            .iter()
            .map(|(id, m)| {
                let offset = write_matrix(&mut file, id, m.view()).unwrap();
                ScpEntry::new(*id, &path, offset)
            })
            .collect()
    }

    #[test]
    fn test_read_written_matrices() {
        let dir = TempDir::new().unwrap();
        let a = array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let b = array![[-0.5f32, 0.25, 8.0]];
        let entries = write_ark(&dir, &[("a", a.clone()), ("b", b.clone())]);

        let reader = ArkReader::new();
        assert_eq!(reader.read(&entries[0]).unwrap(), a);
        assert_eq!(reader.read(&entries[1]).unwrap(), b);
    }

    #[test]
    fn test_frame_count_reads_header_only() {
        let dir = TempDir::new().unwrap();
        let m = Array2::<f32>::zeros((101, 40));
        let entries = write_ark(&dir, &[("long", m)]);

        assert_eq!(ArkReader::new().frame_count(&entries[0]).unwrap(), 101);
    }

    #[test]
    fn test_offset_points_after_utterance_id() {
        let mut buf = Cursor::new(Vec::new());
        let offset = write_matrix(&mut buf, "utt7", array![[1.0f32]].view()).unwrap();
        assert_eq!(offset, "utt7 ".len() as u64);
        assert_eq!(&buf.get_ref()[offset as usize..offset as usize + 5], b"\0BFM ");
    }

    #[test]
    fn test_double_precision_matrix() {
        let mut bytes = b"\0BDM ".to_vec();
        bytes.push(4);
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        bytes.extend_from_slice(&(-2.0f64).to_le_bytes());

        let mut cursor = Cursor::new(bytes);
        let header = read_header(&mut cursor, Path::new("mem")).unwrap();
        let m = read_payload(&mut cursor, header, Path::new("mem")).unwrap();
        assert_eq!(m, array![[1.5f32, -2.0]]);
    }

    #[test]
    fn test_text_matrix_rejected() {
        let mut cursor = Cursor::new(b" [ 1 2 ]".to_vec());
        let err = read_header(&mut cursor, Path::new("mem")).unwrap_err();
        assert!(err.to_string().contains("not a binary matrix"));
    }

    #[test]
    fn test_compressed_matrix_rejected() {
        let mut cursor = Cursor::new(b"\0BCM  ".to_vec());
        let err = read_header(&mut cursor, Path::new("mem")).unwrap_err();
        assert!(err.to_string().contains("compressed"));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = b"\0BFM ".to_vec();
        bytes.push(4);
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());

        let mut cursor = Cursor::new(bytes);
        let header = read_header(&mut cursor, Path::new("mem")).unwrap();
        let err = read_payload(&mut cursor, header, Path::new("mem")).unwrap_err();
        assert!(err.to_string().contains("truncated 2x2"));
    }

    fn header_bytes(kind: &[u8; 3], rows: i32, cols: i32) -> Vec<u8> {
        let mut bytes = b"\0B".to_vec();
        bytes.extend_from_slice(kind);
        bytes.push(4);
        bytes.extend_from_slice(&rows.to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(&cols.to_le_bytes());
        bytes
    }

    #[test]
    fn test_oversized_header_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.ark");
        std::fs::write(&path, header_bytes(b"DM ", i32::MAX, i32::MAX)).unwrap();

        let err = ArkReader::new()
            .read(&ScpEntry::new("bad", &path, 0))
            .unwrap_err();
        assert!(matches!(err, SeqfeedError::MatrixFormat { .. }));

        // Fits in usize but far exceeds the file
        let mut cursor = Cursor::new(header_bytes(b"FM ", 1 << 20, 1 << 10));
        let header = read_header(&mut cursor, Path::new("mem")).unwrap();
        let err = read_payload(&mut cursor, header, Path::new("mem")).unwrap_err();
        assert!(err.to_string().contains("truncated 1048576x1024"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let entry = ScpEntry::new("x", "/nonexistent/feats.ark", 0);
        assert!(matches!(
            ArkReader::new().read(&entry),
            Err(SeqfeedError::Io(_))
        ));
    }
}

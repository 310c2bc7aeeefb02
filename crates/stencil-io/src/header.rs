//! The header line of a tensor file.
//!
//! The header is the first line of the file and holds the dimension sizes
//! separated by spaces (`"b m n"` for data, `"k"` or `"k k"` for filters).
//! The line is read with an explicit byte limit so an unterminated or
//! oversized header fails instead of being silently truncated.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::{FileError, TextFormat};

/// Longest header line accepted by default, excluding the newline.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 4096;

/// Number of dimensions declared by the header of `path`.
///
/// Fails if the file cannot be opened, is empty, or its header holds no
/// dimensions.
pub fn dimension_count(path: &Path) -> Result<usize, FileError> {
    TextFormat::default().dimension_count(path)
}

/// The `count` dimension sizes declared by the header of `path`.
pub fn read_dimensions(path: &Path, count: usize) -> Result<Vec<usize>, FileError> {
    TextFormat::default().read_dimensions(path, count)
}

pub(crate) fn open_reader(path: &Path) -> Result<BufReader<File>, FileError> {
    let file = File::open(path).map_err(|e| FileError::open(path, e))?;
    Ok(BufReader::new(file))
}

/// Read the first line of `reader`, without its line terminator.
pub(crate) fn read_header_line<R: BufRead>(
    reader: &mut R,
    path: &Path,
    max_bytes: usize,
) -> Result<String, FileError> {
    let mut buf = Vec::new();
    let limit = max_bytes.saturating_add(1) as u64;
    reader
        .by_ref()
        .take(limit)
        .read_until(b'\n', &mut buf)
        .map_err(|e| FileError::open(path, e))?;

    if buf.is_empty() {
        return Err(FileError::format(path, "file is empty"));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max_bytes {
        return Err(FileError::format(
            path,
            format!("header line exceeds {} bytes", max_bytes),
        ));
    }

    String::from_utf8(buf).map_err(|_| FileError::format(path, "header line is not valid UTF-8"))
}

/// Count the dimension tokens on a header line.
pub(crate) fn count_dims(path: &Path, line: &str) -> Result<usize, FileError> {
    match line.split_whitespace().count() {
        0 => Err(FileError::format(path, "header line declares no dimensions")),
        n => Ok(n),
    }
}

/// Parse every dimension on a header line. Each must be a positive integer.
pub(crate) fn parse_dims(path: &Path, line: &str) -> Result<Vec<usize>, FileError> {
    line.split_whitespace()
        .map(|token| {
            let value: i64 = token.parse().map_err(|_| {
                FileError::format(path, format!("dimension '{}' is not an integer", token))
            })?;
            if value <= 0 {
                return Err(FileError::format(
                    path,
                    format!("dimension {} must be positive", value),
                ));
            }
            usize::try_from(value).map_err(|_| {
                FileError::format(path, format!("dimension {} is too large", value))
            })
        })
        .collect()
}

//! The flat value array that follows the header line.

use std::io::Read;
use std::path::Path;

use log::warn;
use stencil_core::product;

use crate::{FileError, TextFormat};

/// Read the `product(dims)` values of `path`, skipping its header line.
///
/// A body with fewer values than declared is a format error; it is never
/// padded. Surplus values are ignored.
pub fn read_flat_array(path: &Path, dims: &[usize]) -> Result<Vec<f32>, FileError> {
    TextFormat::default().read_flat_array(path, dims)
}

/// Read the body from `reader`, which must be positioned after the header.
pub(crate) fn read_body<R: Read>(
    reader: &mut R,
    path: &Path,
    dims: &[usize],
) -> Result<Vec<f32>, FileError> {
    let total = product(dims)
        .ok_or_else(|| FileError::format(path, format!("shape {:?} is too large", dims)))?;

    let mut values = Vec::new();
    values
        .try_reserve_exact(total)
        .map_err(|_| FileError::Allocation {
            path: path.to_path_buf(),
            elements: total,
        })?;

    let mut content = String::new();
    reader.read_to_string(&mut content).map_err(|e| {
        if e.kind() == std::io::ErrorKind::InvalidData {
            FileError::format(path, "body is not valid UTF-8")
        } else {
            FileError::open(path, e)
        }
    })?;

    parse_values(path, &content, total, &mut values)?;
    Ok(values)
}

/// Parse exactly `total` whitespace-separated values from `content`.
fn parse_values(
    path: &Path,
    content: &str,
    total: usize,
    values: &mut Vec<f32>,
) -> Result<(), FileError> {
    let mut tokens = content.split_whitespace();
    for index in 0..total {
        let token = tokens.next().ok_or_else(|| {
            FileError::format(
                path,
                format!("header declares {} values but the body holds {}", total, index),
            )
        })?;
        let value: f32 = token.parse().map_err(|_| {
            FileError::format(
                path,
                format!("value {} ('{}') is not a number", index + 1, token),
            )
        })?;
        values.push(value);
    }

    let surplus = tokens.count();
    if surplus > 0 {
        warn!(
            "{}: ignoring {} values beyond the declared {}",
            path.display(),
            surplus,
            total
        );
    }
    Ok(())
}

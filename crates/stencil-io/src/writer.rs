//! Output files.
//!
//! The header is each dimension followed by a space, then a newline. Values
//! follow on one line, each printed with 7 fractional digits and a
//! trailing space.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use stencil_core::product;

use crate::FileError;

/// Write `data` with shape `dims` to `path`, replacing any existing file.
pub fn write_output(path: &Path, data: &[f32], dims: &[usize]) -> Result<(), FileError> {
    let expected = product(dims)
        .ok_or_else(|| FileError::format(path, format!("shape {:?} is too large", dims)))?;
    if data.len() != expected {
        return Err(FileError::format(
            path,
            format!("output holds {} values but shape {:?} needs {}", data.len(), dims, expected),
        ));
    }

    let file = File::create(path).map_err(|e| FileError::open(path, e))?;
    let mut out = BufWriter::new(file);
    write_body(&mut out, data, dims).map_err(|source| FileError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_body<W: Write>(out: &mut W, data: &[f32], dims: &[usize]) -> std::io::Result<()> {
    for d in dims {
        write!(out, "{} ", d)?;
    }
    writeln!(out)?;
    for value in data {
        write!(out, "{:.7} ", value)?;
    }
    out.flush()
}

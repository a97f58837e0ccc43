//! CVID encoding.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use super::CvidContainer;
use super::format::{
    CvidError, CvidHeader, CvidVersion, encode_units, grid_shape, is_grid, to_i32, write_i32,
};
use crate::stream::{RenderedFrame, visible_width};

/// Encode a container using [`CvidVersion::CURRENT`].
pub fn encode<W: Write>(container: &CvidContainer, w: &mut W) -> Result<(), CvidError> {
    encode_version(container, CvidVersion::CURRENT, w)
}

/// Encode a container using an explicit format version.
///
/// Grid versions (v1, v2) require every frame to be a rectangle of exactly
/// `width` UTF-16 units per row; anything else is a [`CvidError::ShapeMismatch`].
/// Version 3 checks every row's escape-stripped width against the first frame.
pub fn encode_version<W: Write>(
    container: &CvidContainer,
    version: CvidVersion,
    w: &mut W,
) -> Result<(), CvidError> {
    let (width, height) = frame_shape(&container.frames, version)?;
    let header = CvidHeader {
        version,
        width: to_i32(width, "frame width")? as u32,
        height: to_i32(height, "frame height")? as u32,
        frame_rate: container.frame_rate,
    };
    header.write_to(w)?;

    write_i32(w, to_i32(container.audio.len(), "audio length")?)?;
    w.write_all(&container.audio)?;
    write_i32(w, to_i32(container.frames.len(), "frame count")?)?;

    let mut buf = Vec::new();
    for frame in &container.frames {
        buf.clear();
        if version.is_grid() {
            // Rows are stored back to back with no separator.
            if !frame.as_str().is_empty() {
                for row in frame.rows() {
                    encode_units(row, &mut buf);
                }
            }
        } else {
            encode_units(frame.as_str(), &mut buf);
            write_i32(w, to_i32(buf.len() / 2, "frame length")?)?;
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

/// Write a container to `path` using the current version.
pub fn write<P: AsRef<Path>>(path: P, container: &CvidContainer) -> Result<(), CvidError> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    encode(container, &mut writer)?;
    writer.flush()?;

    info!(
        "Wrote {} frames ({}x{} @ {} fps, {} audio bytes) to {}",
        container.frames.len(),
        container.frame_width,
        container.frame_height,
        container.frame_rate,
        container.audio.len(),
        path.display()
    );
    Ok(())
}

/// Shape shared by all frames, as stored in the header for `version`.
fn frame_shape(frames: &[RenderedFrame], version: CvidVersion) -> Result<(usize, usize), CvidError> {
    let Some(first) = frames.first() else {
        return Ok((0, 0));
    };

    if version.is_grid() {
        let expected = grid_shape(first.as_str());
        // The reader cannot tell how many zero-area frames a grid holds.
        if expected.0 == 0 || expected.1 == 0 {
            return Err(CvidError::ZeroAreaGrid {
                frames: frames.len(),
            });
        }
        for (frame, f) in frames.iter().enumerate() {
            if !is_grid(f.as_str(), expected) {
                return Err(CvidError::ShapeMismatch {
                    frame,
                    expected,
                    found: grid_shape(f.as_str()),
                });
            }
        }
        Ok(expected)
    } else {
        let expected = first.visible_shape();
        for (frame, f) in frames.iter().enumerate() {
            if let Some(found) = visible_mismatch(f, expected) {
                return Err(CvidError::ShapeMismatch {
                    frame,
                    expected,
                    found,
                });
            }
        }
        Ok(expected)
    }
}

/// Shape to report when some visible row of `frame` breaks `expected`.
fn visible_mismatch(frame: &RenderedFrame, expected: (usize, usize)) -> Option<(usize, usize)> {
    let found = frame.visible_shape();
    if found != expected {
        return Some(found);
    }
    if frame.as_str().is_empty() {
        return None;
    }
    frame
        .rows()
        .map(visible_width)
        .find(|&width| width != expected.0)
        .map(|width| (width, found.1))
}

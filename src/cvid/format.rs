//! Binary format definitions for CVID containers.

use std::io::{self, Read, Write};

/// Magic bytes identifying a versioned CVID container.
pub const CVID_MAGIC: &[u8; 2] = b"cv";

/// Worker threads used to rebuild frame text while decoding.
pub const DECODE_THREADS: usize = 8;

/// Container format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CvidVersion {
    /// Legacy layout without magic or version byte; bare character grids.
    V1 = 1,
    /// Magic + version; bare character grids.
    V2 = 2,
    /// Magic + version; length-prefixed frames that keep color escapes.
    V3 = 3,
}

impl CvidVersion {
    /// Version emitted by the write path.
    pub const CURRENT: CvidVersion = CvidVersion::V3;

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(CvidVersion::V1),
            2 => Some(CvidVersion::V2),
            3 => Some(CvidVersion::V3),
            _ => None,
        }
    }

    /// Whether the container starts with magic and version bytes.
    pub fn has_magic(self) -> bool {
        self != CvidVersion::V1
    }

    /// Whether frames are stored as fixed-size character grids.
    pub fn is_grid(self) -> bool {
        matches!(self, CvidVersion::V1 | CvidVersion::V2)
    }
}

/// Errors raised while reading or writing CVID containers.
#[derive(Debug, thiserror::Error)]
pub enum CvidError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Container truncated while reading {section}")]
    Truncated { section: &'static str },

    #[error("Negative {field} in container: {value}")]
    NegativeLength { field: &'static str, value: i32 },

    #[error("Unsupported CVID version: {0}")]
    UnsupportedVersion(u8),

    #[error("Frame {frame} is not valid UTF-16 text")]
    InvalidText { frame: usize },

    #[error("Frame {frame} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        frame: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Grid containers cannot hold {frames} frames of zero area")]
    ZeroAreaGrid { frames: usize },

    #[error("{field} does not fit in a 32-bit container field")]
    TooLarge { field: &'static str },

    #[error("Failed to build decode thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Fixed-size container header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvidHeader {
    pub version: CvidVersion,
    /// Frame width in character cells.
    pub width: u32,
    /// Frame height in rows.
    pub height: u32,
    pub frame_rate: f64,
}

impl CvidHeader {
    /// Size of the header in bytes for `version`.
    /// Magic(2) + Version(1), then Width(4) + Height(4) + FrameRate(8).
    pub fn size(version: CvidVersion) -> usize {
        let prefix = if version.has_magic() { 3 } else { 0 };
        prefix + 4 + 4 + 8
    }

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CvidError> {
        if self.version.has_magic() {
            w.write_all(CVID_MAGIC)?;
            w.write_all(&[self.version as u8])?;
        }
        write_i32(w, to_i32(self.width as usize, "frame width")?)?;
        write_i32(w, to_i32(self.height as usize, "frame height")?)?;
        w.write_all(&self.frame_rate.to_le_bytes())?;
        Ok(())
    }

    /// Read the fields following the magic/version prefix.
    pub fn read_fields<R: Read>(r: &mut R, version: CvidVersion) -> Result<Self, CvidError> {
        let width = read_len(r, "frame width")? as u32;
        let height = read_len(r, "frame height")? as u32;
        let frame_rate = f64::from_le_bytes(read_array(r, "frame rate")?);
        Ok(Self {
            version,
            width,
            height,
            frame_rate,
        })
    }
}

/// Read exactly `N` bytes, reporting premature EOF as truncation.
pub(crate) fn read_array<R: Read, const N: usize>(
    r: &mut R,
    section: &'static str,
) -> Result<[u8; N], CvidError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|e| eof_as_truncated(e, section))?;
    Ok(buf)
}

/// Read a non-negative int32 length field.
pub(crate) fn read_len<R: Read>(r: &mut R, field: &'static str) -> Result<usize, CvidError> {
    let value = i32::from_le_bytes(read_array(r, field)?);
    if value < 0 {
        return Err(CvidError::NegativeLength { field, value });
    }
    Ok(value as usize)
}

/// Read `len` bytes without trusting `len` for the initial allocation.
pub(crate) fn read_bytes<R: Read>(
    r: &mut R,
    len: usize,
    section: &'static str,
) -> Result<Vec<u8>, CvidError> {
    let mut buf = Vec::with_capacity(len.min(1 << 20));
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(CvidError::Truncated { section });
    }
    Ok(buf)
}

pub(crate) fn write_i32<W: Write>(w: &mut W, value: i32) -> Result<(), CvidError> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn to_i32(value: usize, field: &'static str) -> Result<i32, CvidError> {
    i32::try_from(value).map_err(|_| CvidError::TooLarge { field })
}

fn eof_as_truncated(e: io::Error, section: &'static str) -> CvidError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CvidError::Truncated { section }
    } else {
        CvidError::Io(e)
    }
}

/// Encode text as little-endian UTF-16 code units.
pub fn encode_units(text: &str, out: &mut Vec<u8>) {
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

/// Decode little-endian UTF-16 code units.
pub fn decode_units(bytes: &[u8], frame: usize) -> Result<String, CvidError> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| CvidError::InvalidText { frame })
}

/// Grid shape `(width, height)` in UTF-16 units per row and rows.
pub fn grid_shape(text: &str) -> (usize, usize) {
    if text.is_empty() {
        return (0, 0);
    }
    let width = text
        .split('\n')
        .next()
        .map(|row| row.encode_utf16().count())
        .unwrap_or(0);
    (width, text.split('\n').count())
}

/// Whether every row of `text` is exactly `width` units and there are `height` rows.
pub fn is_grid(text: &str, (width, height): (usize, usize)) -> bool {
    if text.is_empty() {
        return height == 0;
    }
    let mut rows = 0;
    for row in text.split('\n') {
        if row.encode_utf16().count() != width {
            return false;
        }
        rows += 1;
    }
    rows == height
}

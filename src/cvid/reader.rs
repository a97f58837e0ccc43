//! CVID decoding.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;

use super::CvidContainer;
use super::format::{
    CVID_MAGIC, CvidError, CvidHeader, CvidVersion, DECODE_THREADS, decode_units, read_array,
    read_bytes, read_len,
};
use crate::stream::RenderedFrame;

/// Decode a container, detecting its version from the leading bytes.
///
/// Input that does not start with the magic is decoded once as the legacy
/// layout; a failure there is reported as-is.
pub fn decode<R: Read + Seek>(r: &mut R) -> Result<CvidContainer, CvidError> {
    let start = r.stream_position()?;
    let prefix: [u8; 2] = read_array(r, "magic")?;

    let version = if &prefix == CVID_MAGIC {
        let [byte]: [u8; 1] = read_array(r, "version")?;
        CvidVersion::from_u8(byte)
            .filter(|v| v.has_magic())
            .ok_or(CvidError::UnsupportedVersion(byte))?
    } else {
        r.seek(SeekFrom::Start(start))?;
        CvidVersion::V1
    };
    debug!("Decoding CVID v{}", version as u8);

    let header = CvidHeader::read_fields(r, version)?;
    let audio_len = read_len(r, "audio length")?;
    let audio = read_bytes(r, audio_len, "audio")?;
    let frame_count = read_len(r, "frame count")?;

    let frames = if version.is_grid() {
        read_grid_frames(r, &header, frame_count)?
    } else {
        read_sized_frames(r, frame_count)?
    };

    Ok(CvidContainer {
        version,
        frame_width: header.width,
        frame_height: header.height,
        frame_rate: header.frame_rate,
        audio,
        frames,
    })
}

/// Read and decode a container file.
pub fn read<P: AsRef<Path>>(path: P) -> Result<CvidContainer, CvidError> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);
    let container = decode(&mut reader)?;

    info!(
        "Read CVID v{} from {}: {} frames, {}x{} @ {} fps",
        container.version as u8,
        path.display(),
        container.frames.len(),
        container.frame_width,
        container.frame_height,
        container.frame_rate
    );
    Ok(container)
}

/// Fixed `width * height` unit blocks, rows rejoined with `\n`.
fn read_grid_frames<R: Read>(
    r: &mut R,
    header: &CvidHeader,
    frame_count: usize,
) -> Result<Vec<RenderedFrame>, CvidError> {
    let width = header.width as usize;
    let height = header.height as usize;
    let block_bytes = width
        .checked_mul(height)
        .and_then(|units| units.checked_mul(2))
        .ok_or(CvidError::Truncated { section: "frames" })?;
    // Zero-area frames occupy no bytes, so their count cannot be checked
    // against the input.
    if block_bytes == 0 && frame_count > 0 {
        return Err(CvidError::ZeroAreaGrid {
            frames: frame_count,
        });
    }
    let total = block_bytes
        .checked_mul(frame_count)
        .ok_or(CvidError::Truncated { section: "frames" })?;
    let data = read_bytes(r, total, "frames")?;

    let blocks: Vec<&[u8]> = data.chunks_exact(block_bytes.max(1)).collect();

    decode_parallel(&blocks, |frame, block: &[u8]| {
        let mut rows = Vec::with_capacity(height);
        for row in 0..height {
            let bytes = &block[row * width * 2..(row + 1) * width * 2];
            rows.push(decode_units(bytes, frame)?);
        }
        Ok(rows.join("\n"))
    })
}

/// Length-prefixed frames holding the full text.
fn read_sized_frames<R: Read>(
    r: &mut R,
    frame_count: usize,
) -> Result<Vec<RenderedFrame>, CvidError> {
    let mut blocks = Vec::new();
    for _ in 0..frame_count {
        let units = read_len(r, "frame length")?;
        blocks.push(read_bytes(r, units.saturating_mul(2), "frame")?);
    }

    let blocks: Vec<&[u8]> = blocks.iter().map(Vec::as_slice).collect();
    decode_parallel(&blocks, |frame, block| decode_units(block, frame))
}

/// Rebuild frame text on a dedicated pool, keeping frames in stored order.
fn decode_parallel<F>(blocks: &[&[u8]], decode_one: F) -> Result<Vec<RenderedFrame>, CvidError>
where
    F: Fn(usize, &[u8]) -> Result<String, CvidError> + Sync,
{
    if blocks.is_empty() {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(DECODE_THREADS)
        .thread_name(|i| format!("cvid-decode-{}", i))
        .build()?;

    let mut slots = vec![RenderedFrame::default(); blocks.len()];
    pool.install(|| {
        slots
            .par_iter_mut()
            .zip(blocks.par_iter())
            .enumerate()
            .try_for_each(|(frame, (slot, block))| {
                *slot = RenderedFrame::from(decode_one(frame, block)?);
                Ok::<(), CvidError>(())
            })
    })?;
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvid::{encode, encode_version, write};
    use proptest::prelude::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn frames(texts: &[&str]) -> Vec<RenderedFrame> {
        texts.iter().map(|t| RenderedFrame::new(*t)).collect()
    }

    fn roundtrip(container: &CvidContainer, version: CvidVersion) -> CvidContainer {
        let mut buf = Vec::new();
        encode_version(container, version, &mut buf).unwrap();
        decode(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn test_roundtrip_every_version() {
        let container = CvidContainer::new(
            frames(&["▀▀▀\n#.#", "...\n▀#▀", "###\n   "]),
            29.97,
            vec![1, 2, 3, 4, 5],
        );

        for version in [CvidVersion::V1, CvidVersion::V2, CvidVersion::V3] {
            let decoded = roundtrip(&container, version);
            assert_eq!(decoded.version, version);
            assert_eq!(decoded.frame_width, 3);
            assert_eq!(decoded.frame_height, 2);
            assert_eq!(decoded.frame_rate, 29.97);
            assert_eq!(decoded.audio, container.audio);
            assert_eq!(decoded.frames, container.frames);
        }
    }

    #[test]
    fn test_color_frames_survive_current_version() {
        let text = "\u{1b}[38;2;255;0;0;48;2;0;0;255m▀\u{1b}[38;2;0;255;0m▀\u{1b}[0m\n\u{1b}[38;2;1;2;3m▀▀\u{1b}[0m";
        let container = CvidContainer::new(frames(&[text, text]), 30.0, Vec::new());
        assert_eq!((container.frame_width, container.frame_height), (2, 2));

        let mut buf = Vec::new();
        encode(&container, &mut buf).unwrap();
        let decoded = decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.version, CvidVersion::CURRENT);
        assert_eq!((decoded.frame_width, decoded.frame_height), (2, 2));
        assert_eq!(decoded.frames[1].as_str(), text);
    }

    #[test]
    fn test_empty_audio_and_frames() {
        let container = CvidContainer::new(Vec::new(), 12.0, Vec::new());
        for version in [CvidVersion::V1, CvidVersion::V2, CvidVersion::V3] {
            let decoded = roundtrip(&container, version);
            assert!(decoded.audio.is_empty());
            assert!(decoded.frames.is_empty());
            assert_eq!(decoded.frame_rate, 12.0);
        }
    }

    #[test]
    fn test_legacy_without_magic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2i32.to_le_bytes());
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&15.0f64.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&2i32.to_le_bytes());
        for unit in "abcd".encode_utf16() {
            buf.extend_from_slice(&unit.to_le_bytes());
        }

        let decoded = decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.version, CvidVersion::V1);
        assert_eq!(decoded.frames, frames(&["ab", "cd"]));
    }

    #[test]
    fn test_unsupported_version() {
        let mut buf = b"cv\x07".to_vec();
        buf.extend_from_slice(&[0u8; 32]);
        let err = decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, CvidError::UnsupportedVersion(7)));

        // Version 1 never carries a magic prefix.
        let err = decode(&mut Cursor::new(b"cv\x01".to_vec())).unwrap_err();
        assert!(matches!(err, CvidError::UnsupportedVersion(1)));
    }

    #[test]
    fn test_truncated_input() {
        let container = CvidContainer::new(frames(&["ab\ncd", "ef\ngh"]), 24.0, vec![0; 16]);
        let mut buf = Vec::new();
        encode(&container, &mut buf).unwrap();

        for cut in [1, 5, 20, 30, buf.len() - 1] {
            let err = decode(&mut Cursor::new(&buf[..cut])).unwrap_err();
            assert!(
                matches!(err, CvidError::Truncated { .. }),
                "cut at {}: {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_negative_frame_count() {
        let mut buf = b"cv\x03".to_vec();
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&30.0f64.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&(-1i32).to_le_bytes());

        let err = decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(
            err,
            CvidError::NegativeLength {
                field: "frame count",
                value: -1
            }
        ));
    }

    #[test]
    fn test_huge_declared_audio_is_truncated_not_allocated() {
        let mut buf = b"cv\x03".to_vec();
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&30.0f64.to_le_bytes());
        buf.extend_from_slice(&i32::MAX.to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let err = decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, CvidError::Truncated { section: "audio" }));
    }

    #[test]
    fn test_zero_area_grid_with_huge_count_rejected() {
        let mut buf = b"cv\x02".to_vec();
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&30.0f64.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&i32::MAX.to_le_bytes());
        assert_eq!(buf.len(), 27);

        let err = decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(
            err,
            CvidError::ZeroAreaGrid { frames } if frames == i32::MAX as usize
        ));
    }

    #[test]
    fn test_zero_width_legacy_grid_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&3i32.to_le_bytes());
        buf.extend_from_slice(&30.0f64.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&1_000_000i32.to_le_bytes());

        let err = decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, CvidError::ZeroAreaGrid { frames: 1_000_000 }));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.cvid");

        let container = CvidContainer::new(frames(&["a▀", "▀b"]), 60.0, b"RIFF....".to_vec());
        write(&path, &container).unwrap();

        let loaded = read(&path).unwrap();
        assert_eq!(loaded.version, CvidVersion::CURRENT);
        assert_eq!(loaded.frames, container.frames);
        assert_eq!(loaded.audio, container.audio);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = read(dir.path().join("nope.cvid")).unwrap_err();
        assert!(matches!(err, CvidError::Io(_)));
    }

    fn grid_frames() -> impl Strategy<Value = Vec<RenderedFrame>> {
        prop::collection::vec(
            prop::collection::vec("[a-z#▀ ]{4}", 3)
                .prop_map(|rows| RenderedFrame::new(rows.join("\n"))),
            0..12,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip_preserves_frames(
            frames in grid_frames(),
            audio in prop::collection::vec(any::<u8>(), 0..64),
            frame_rate in 1.0f64..240.0,
            version in prop::sample::select(vec![CvidVersion::V1, CvidVersion::V2, CvidVersion::V3]),
        ) {
            let container = CvidContainer::new(frames, frame_rate, audio);
            let decoded = roundtrip(&container, version);
            prop_assert_eq!(decoded.frames, container.frames);
            prop_assert_eq!(decoded.audio, container.audio);
            prop_assert_eq!(decoded.frame_rate, frame_rate);
        }
    }
}

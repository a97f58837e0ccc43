//! Half-block truecolor rendering.

use std::fmt::Write as _;
use std::path::PathBuf;

use image::{ImageReader, Rgb, RgbImage};

use crate::stream::{ConvertError, FrameConverter, RenderedFrame};

/// Upper half block; foreground paints the top pixel, background the bottom.
pub const HALF_BLOCK: char = '▀';

/// Bottom pixel used for the last row of an image with odd height.
const PADDING: Rgb<u8> = Rgb([0, 0, 0]);

/// Renders images as rows of `▀` cells with ANSI 24-bit colors.
///
/// A color escape is emitted only when the top or bottom color differs from
/// the previous cell, and the state carries across rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalfBlockConverter;

impl HalfBlockConverter {
    pub fn new() -> Self {
        Self
    }

    /// Render a decoded image. Output has `ceil(height / 2)` rows of `width` cells.
    pub fn render(&self, image: &RgbImage) -> RenderedFrame {
        let (width, height) = image.dimensions();
        let rows = height.div_ceil(2);
        let mut out = String::with_capacity((width as usize * 4 + 1) * rows as usize);
        let mut prev: Option<(Rgb<u8>, Rgb<u8>)> = None;

        for row in 0..rows {
            if row > 0 {
                out.push('\n');
            }
            let y = row * 2;
            for x in 0..width {
                let top = *image.get_pixel(x, y);
                let bottom = if y + 1 < height {
                    *image.get_pixel(x, y + 1)
                } else {
                    PADDING
                };
                push_cell(&mut out, top, bottom, prev);
                prev = Some((top, bottom));
            }
        }
        RenderedFrame::from(out)
    }
}

impl FrameConverter for HalfBlockConverter {
    type Descriptor = PathBuf;

    fn convert(&self, path: &PathBuf) -> Result<RenderedFrame, ConvertError> {
        let io_err = |source| ConvertError::Io {
            path: path.clone(),
            source,
        };
        let image = ImageReader::open(path)
            .map_err(io_err)?
            .with_guessed_format()
            .map_err(io_err)?
            .decode()
            .map_err(|source| ConvertError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        Ok(self.render(&image))
    }
}

fn push_cell(out: &mut String, top: Rgb<u8>, bottom: Rgb<u8>, prev: Option<(Rgb<u8>, Rgb<u8>)>) {
    let top_changed = prev.is_none_or(|(t, _)| t != top);
    let bottom_changed = prev.is_none_or(|(_, b)| b != bottom);

    if top_changed || bottom_changed {
        out.push_str("\u{1b}[");
        if top_changed {
            let [r, g, b] = top.0;
            let _ = write!(out, "38;2;{};{};{}", r, g, b);
        }
        if top_changed && bottom_changed {
            out.push(';');
        }
        if bottom_changed {
            let [r, g, b] = bottom.0;
            let _ = write!(out, "48;2;{};{};{}", r, g, b);
        }
        out.push('m');
    }
    out.push(HALF_BLOCK);
}

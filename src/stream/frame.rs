//! Rendered frames and the conversion capability that produces them.

use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Terminal-ready text for one frame, including any color escape sequences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderedFrame(String);

impl RenderedFrame {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Rows of the frame, split on `\n`.
    pub fn rows(&self) -> impl Iterator<Item = &str> {
        self.0.split('\n')
    }

    /// Visible grid size `(width, height)` with escape sequences stripped.
    ///
    /// Width is measured on the first row in characters. An empty frame is 0x0.
    pub fn visible_shape(&self) -> (usize, usize) {
        if self.0.is_empty() {
            return (0, 0);
        }
        let height = self.rows().count();
        let width = self.rows().next().map(visible_width).unwrap_or(0);
        (width, height)
    }
}

impl fmt::Display for RenderedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RenderedFrame {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for RenderedFrame {
    fn from(text: &str) -> Self {
        Self(text.to_owned())
    }
}

/// Count the characters of `row` that are not part of an ANSI CSI sequence.
pub fn visible_width(row: &str) -> usize {
    let mut width = 0;
    let mut chars = row.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            // Parameters and intermediates run until a final byte in 0x40..=0x7E.
            for c in chars.by_ref() {
                if ('\u{40}'..='\u{7e}').contains(&c) {
                    break;
                }
            }
            continue;
        }
        width += 1;
    }
    width
}

/// Errors produced while converting a single frame.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Failed to read frame source {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode frame image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{0}")]
    Other(String),
}

/// Synchronous conversion of one frame descriptor into terminal text.
///
/// Implementations are called from several pool threads at once.
pub trait FrameConverter: Send + Sync + 'static {
    /// Opaque reference to one unconverted source frame.
    type Descriptor: Send + 'static;

    fn convert(&self, descriptor: &Self::Descriptor) -> Result<RenderedFrame, ConvertError>;
}

/// Adapter turning a closure into a [`FrameConverter`].
pub struct FnConverter<D, F> {
    f: F,
    _descriptor: PhantomData<fn(&D)>,
}

/// Wrap `f` as a converter over descriptors of type `D`.
pub fn converter_fn<D, F>(f: F) -> FnConverter<D, F>
where
    F: Fn(&D) -> Result<RenderedFrame, ConvertError> + Send + Sync + 'static,
    D: Send + 'static,
{
    FnConverter {
        f,
        _descriptor: PhantomData,
    }
}

impl<D, F> FrameConverter for FnConverter<D, F>
where
    F: Fn(&D) -> Result<RenderedFrame, ConvertError> + Send + Sync + 'static,
    D: Send + 'static,
{
    type Descriptor = D;

    fn convert(&self, descriptor: &D) -> Result<RenderedFrame, ConvertError> {
        (self.f)(descriptor)
    }
}

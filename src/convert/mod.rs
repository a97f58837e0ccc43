//! Convert - Image to terminal text converters.
//!
//! [`HalfBlockConverter`] packs two pixel rows into each character cell using
//! the upper half block `▀`, with 24-bit foreground and background colors.

mod halfblock;

pub use halfblock::*;

//! Terminal output for rendered frames.

use std::io::{self, Stdout, Write};

use crossterm::QueueableCommand;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::ResetColor;
use crossterm::terminal::{Clear, ClearType};

use crate::stream::RenderedFrame;

/// Destination for rendered frames.
pub trait FrameSink {
    /// Display one frame, replacing whatever was shown before.
    fn render(&mut self, frame: &RenderedFrame) -> io::Result<()>;
}

/// Writes frames to a terminal, homing the cursor before each frame.
pub struct TerminalSink<W: Write> {
    out: W,
}

impl TerminalSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Clear the screen and hide the cursor.
    pub fn begin(&mut self) -> io::Result<()> {
        self.out.queue(Clear(ClearType::All))?.queue(Hide)?;
        self.out.flush()
    }

    /// Reset colors and show the cursor again.
    pub fn finish(&mut self) -> io::Result<()> {
        self.out.queue(ResetColor)?.queue(Show)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }

    /// Write text below the current frame (used by the debug overlay).
    pub fn write_overlay(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(b"\n")?;
        self.out.write_all(text.as_bytes())?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FrameSink for TerminalSink<W> {
    fn render(&mut self, frame: &RenderedFrame) -> io::Result<()> {
        self.out.queue(MoveTo(0, 0))?;
        self.out.write_all(frame.as_str().as_bytes())?;
        self.out.flush()
    }
}

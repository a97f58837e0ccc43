//! Fire-and-forget audio playback through an external player process.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use log::{debug, info};

/// Starts audio playback and returns immediately.
pub trait AudioPlayer {
    fn play(&self, path: &Path) -> io::Result<()>;
}

/// Spawns `program args... <path>` and lets it run alongside the video.
#[derive(Debug, Clone)]
pub struct CommandAudio {
    program: String,
    args: Vec<String>,
}

impl CommandAudio {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Default for CommandAudio {
    fn default() -> Self {
        Self::new(
            "ffplay",
            vec!["-nodisp".into(), "-autoexit".into(), "-loglevel".into(), "quiet".into()],
        )
    }
}

impl AudioPlayer for CommandAudio {
    fn play(&self, path: &Path) -> io::Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        info!("Started audio: {} {}", self.program, path.display());

        // Reap the child in the background so it never lingers as a zombie.
        thread::spawn(move || {
            let status = child.wait();
            debug!("Audio player exited: {:?}", status);
        });
        Ok(())
    }
}

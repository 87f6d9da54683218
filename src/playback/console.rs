//! Caption display writing to a text stream

use std::io::{self, Write};
use std::sync::Mutex;

use super::CaptionDisplay;

/// Writes captions line by line to any writer (stdout by default)
pub struct ConsoleCaptions {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleCaptions {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    fn with_out(&self, f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> io::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::other("caption writer poisoned"))?;
        f(out.as_mut())?;
        out.flush()
    }
}

impl CaptionDisplay for ConsoleCaptions {
    fn show(&self, text: &str) -> io::Result<()> {
        self.with_out(|out| writeln!(out, "{}", text.trim_end()))
    }

    fn clear(&self) -> io::Result<()> {
        self.with_out(|out| writeln!(out))
    }
}

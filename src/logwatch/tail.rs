//! Bounded tail reads of a log that another process keeps appending to
//!
//! Every call re-opens the file and seeks relative to its current length, so
//! successive reads observe whatever the writer appended in between. Nothing
//! is cached across calls.

use super::LogError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Largest window the reader will ever pull from the end of a file
pub const MAX_TAIL_WINDOW: u64 = 1024;

/// Reads the trailing window of a file as lines
#[derive(Debug, Clone, Copy)]
pub struct TailReader {
    window: u64,
}

impl Default for TailReader {
    fn default() -> Self {
        Self::new(MAX_TAIL_WINDOW)
    }
}

impl TailReader {
    /// Create a reader with the given window, clamped to `1..=MAX_TAIL_WINDOW`
    pub fn new(window: u64) -> Self {
        Self {
            window: window.clamp(1, MAX_TAIL_WINDOW),
        }
    }

    /// Window size in bytes
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Return the non-empty lines found in the last `window` bytes of `path`
    ///
    /// When the window starts mid-line the partial first line is dropped.
    pub fn read_lines(&self, path: &Path) -> Result<Vec<String>, LogError> {
        Ok(self.read_window(path)?.lines)
    }

    /// The newest non-empty line of `path`, if any
    pub fn last_line(&self, path: &Path) -> Result<Option<String>, LogError> {
        Ok(self.read_lines(path)?.pop())
    }

    /// Like [`last_line`](Self::last_line), but `None` only for a log with no
    /// text at all
    ///
    /// Fails with [`LogError::LineTooLong`] when the window holds text but no
    /// whole line, i.e. the newest line is longer than the window.
    pub fn last_whole_line(&self, path: &Path) -> Result<Option<String>, LogError> {
        let mut window = self.read_window(path)?;
        match window.lines.pop() {
            Some(line) => Ok(Some(line)),
            None if window.cut => Err(LogError::LineTooLong {
                path: path.to_path_buf(),
                window: self.window,
            }),
            None => Ok(None),
        }
    }

    fn read_window(&self, path: &Path) -> Result<Window, LogError> {
        let io_err = |source: std::io::Error| LogError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        let start = len.saturating_sub(self.window);

        // Also read the byte before the window to see whether it opens on a
        // line boundary
        let read_from = start.saturating_sub(1);
        file.seek(SeekFrom::Start(read_from)).map_err(io_err)?;

        let mut buf = Vec::with_capacity((len - read_from) as usize);
        file.take(self.window + (start - read_from))
            .read_to_end(&mut buf)
            .map_err(io_err)?;

        let (text, dropped): (&[u8], &[u8]) = if start == 0 {
            (&buf[..], &[][..])
        } else {
            match memchr::memchr(b'\n', &buf) {
                Some(pos) => (&buf[pos + 1..], &buf[1..pos.max(1)]),
                None => (&[][..], &buf[1..]),
            }
        };

        Ok(Window {
            lines: String::from_utf8_lossy(text)
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
            cut: dropped.iter().any(|b| !b.is_ascii_whitespace()),
        })
    }
}

struct Window {
    lines: Vec<String>,
    /// Text was discarded because it did not start on a line boundary
    cut: bool,
}

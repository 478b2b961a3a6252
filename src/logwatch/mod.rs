//! Watching the searchd log for rotation completion
//!
//! - [`timestamp`] - bracketed prefix parsing
//! - [`tail`] - bounded reads from the end of a growing file
//! - [`poller`] - marker detection against a watermark

pub mod poller;
pub mod tail;
pub mod timestamp;

pub use poller::{CompletionPoller, PollOutcome, PollSettings, DEFAULT_POLL_ATTEMPTS};
pub use tail::{TailReader, MAX_TAIL_WINDOW};
pub use timestamp::{TimestampError, TimestampParser, DEFAULT_BASE_EPOCH};

use std::path::PathBuf;

/// Errors raised while reading or interpreting the log
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log could not be opened, statted, seeked or read
    #[error("Could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The newest line does not fit in the tail window
    #[error("Last line of {} is longer than the {window}-byte tail window", path.display())]
    LineTooLong { path: PathBuf, window: u64 },

    /// A line that should carry a timestamp did not
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

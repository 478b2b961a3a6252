//! Rebuild orchestration
//!
//! A rebuild is three steps: take a watermark from the searchd log tail, run
//! the indexer, then poll the log until searchd reports that rotation is
//! complete with a timestamp after the watermark.

mod indexer;

pub use indexer::{IndexerCommand, IndexerLauncher};

use crate::logwatch::{CompletionPoller, LogError, PollOutcome, PollSettings, TailReader, TimestampParser};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Line searchd writes once every rebuilt index has been rotated in
pub const ROTATION_DONE_MARKER: &str = "rotating index: all indexes done";

/// Errors from a rebuild
#[derive(Debug, thiserror::Error)]
pub enum ReindexError {
    /// The searchd log could not be read or its last line had no timestamp
    #[error(transparent)]
    Log(#[from] LogError),

    /// The indexer could not be started
    #[error("Could not launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The indexer ran but reported failure
    #[error("{} failed with {status}", program.display())]
    Exit { program: PathBuf, status: ExitStatus },

    /// No completion line was seen and the policy requires one
    #[error("rotation of {index} not confirmed after {attempts} log reads")]
    NotConfirmed { index: String, attempts: u32 },

    /// The poll deadline passed first
    #[error("timed out after {elapsed:?} waiting for rotation of {index}")]
    TimedOut { index: String, elapsed: Duration },

    /// The server is shutting down
    #[error("cancelled while waiting for rotation of {index}")]
    Cancelled { index: String },
}

/// What to do when the poll budget runs out without a completion line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionPolicy {
    /// Report success anyway
    #[default]
    Lenient,
    /// Fail with [`ReindexError::NotConfirmed`]
    Strict,
}

/// Settings for a [`Reindexer`]
#[derive(Debug, Clone)]
pub struct ReindexOptions {
    pub searchd_log: PathBuf,
    pub marker: String,
    pub tail_window: u64,
    pub poll: PollSettings,
    pub policy: CompletionPolicy,
    /// Allow only one rebuild at a time
    pub serialize: bool,
}

/// Result of a finished rebuild
#[derive(Debug, Clone)]
pub struct ReindexReport {
    pub index: String,
    pub watermark: NaiveDateTime,
    pub outcome: PollOutcome,
    pub elapsed: Duration,
}

/// Runs rebuilds and waits for searchd to pick them up
pub struct Reindexer {
    launcher: Box<dyn IndexerLauncher>,
    parser: Arc<TimestampParser>,
    searchd_log: PathBuf,
    marker: String,
    tail: TailReader,
    poll: PollSettings,
    policy: CompletionPolicy,
    gate: Option<Mutex<()>>,
    cancel: Arc<AtomicBool>,
}

impl Reindexer {
    pub fn new(
        launcher: impl IndexerLauncher + 'static,
        parser: Arc<TimestampParser>,
        options: ReindexOptions,
    ) -> Self {
        Self {
            launcher: Box::new(launcher),
            parser,
            searchd_log: options.searchd_log,
            marker: options.marker,
            tail: TailReader::new(options.tail_window),
            poll: options.poll,
            policy: options.policy,
            gate: options.serialize.then(|| Mutex::new(())),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort in-flight polls once `flag` is set
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Timestamp of the newest log line, or the base epoch for an empty log
    ///
    /// A newest line that does not fit in the tail window is an error rather
    /// than an empty log.
    pub fn capture_watermark(&self) -> Result<NaiveDateTime, ReindexError> {
        match self.tail.last_whole_line(&self.searchd_log)? {
            Some(line) => Ok(self.parser.parse(&line).map_err(LogError::from)?),
            None => Ok(self.parser.base_epoch()),
        }
    }

    /// Rebuild `index` and wait for searchd to rotate it in
    pub fn reindex(&self, index: &str) -> Result<ReindexReport, ReindexError> {
        let _guard = self
            .gate
            .as_ref()
            .map(|gate| gate.lock().unwrap_or_else(PoisonError::into_inner));

        let started = Instant::now();
        let watermark = self.capture_watermark()?;
        info!(index, %watermark, "starting rebuild");

        self.launcher.launch(index)?;

        let poller = CompletionPoller::new(self.tail, &self.parser, self.poll)
            .with_cancel(&self.cancel);
        let outcome = poller.wait_for(&self.searchd_log, &self.marker, watermark)?;

        match &outcome {
            PollOutcome::Confirmed { attempt, at } => {
                info!(index, attempt, rotated_at = %at, "rotation confirmed");
            }
            PollOutcome::Exhausted { attempts } => match self.policy {
                CompletionPolicy::Lenient => {
                    warn!(index, attempts, "rotation not seen in log, assuming done");
                }
                CompletionPolicy::Strict => {
                    return Err(ReindexError::NotConfirmed {
                        index: index.to_string(),
                        attempts: *attempts,
                    });
                }
            },
            PollOutcome::TimedOut { elapsed, .. } => {
                return Err(ReindexError::TimedOut {
                    index: index.to_string(),
                    elapsed: *elapsed,
                });
            }
            PollOutcome::Cancelled { .. } => {
                return Err(ReindexError::Cancelled {
                    index: index.to_string(),
                });
            }
        }

        Ok(ReindexReport {
            index: index.to_string(),
            watermark,
            outcome,
            elapsed: started.elapsed(),
        })
    }
}

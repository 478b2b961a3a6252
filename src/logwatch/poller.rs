//! Completion detection by polling the searchd log tail
//!
//! The indexer gives no signal when searchd has picked up the rebuilt files.
//! The only evidence is a marker line that searchd appends once rotation is
//! finished, so the poller re-reads the tail and compares the newest line's
//! timestamp against a watermark taken before the rebuild was triggered.

use super::tail::TailReader;
use super::timestamp::TimestampParser;
use super::LogError;
use chrono::NaiveDateTime;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default number of tail reads before giving up
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

/// Retry budget and pacing for a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Maximum number of tail reads
    pub attempts: u32,
    /// Pause between reads (zero means back-to-back reads)
    pub interval: Duration,
    /// Overall wall-clock bound, if any
    pub deadline: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval: Duration::ZERO,
            deadline: None,
        }
    }
}

/// How a poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The newest line carried the marker with a timestamp after the watermark
    Confirmed {
        attempt: u32,
        at: NaiveDateTime,
    },
    /// Every attempt was used without seeing the marker
    Exhausted { attempts: u32 },
    /// The deadline passed before the marker was seen
    TimedOut { attempts: u32, elapsed: Duration },
    /// The cancellation flag was raised
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, PollOutcome::Confirmed { .. })
    }
}

/// Polls a log tail for a marker line newer than a watermark
pub struct CompletionPoller<'a> {
    tail: TailReader,
    parser: &'a TimestampParser,
    settings: PollSettings,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(tail: TailReader, parser: &'a TimestampParser, settings: PollSettings) -> Self {
        Self {
            tail,
            parser,
            settings,
            cancel: None,
        }
    }

    /// Stop polling early once `flag` is set
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Poll `path` until its newest line contains `marker` and is stamped
    /// strictly after `watermark`
    ///
    /// Only the newest line is inspected on each attempt. A marker line whose
    /// prefix cannot be parsed aborts the poll with an error; lines without
    /// the marker are ignored.
    pub fn wait_for(
        &self,
        path: &Path,
        marker: &str,
        watermark: NaiveDateTime,
    ) -> Result<PollOutcome, LogError> {
        let started = Instant::now();
        let attempts = self.settings.attempts;

        for attempt in 1..=attempts {
            let done = attempt - 1;

            if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Ok(PollOutcome::Cancelled { attempts: done });
            }

            if let Some(deadline) = self.settings.deadline
                && started.elapsed() >= deadline
            {
                return Ok(PollOutcome::TimedOut {
                    attempts: done,
                    elapsed: started.elapsed(),
                });
            }

            if let Some(line) = self.tail.last_line(path)? {
                debug!(attempt, line = %line, "polled log tail");

                if line.contains(marker) {
                    let at = self.parser.parse(&line)?;
                    if at > watermark {
                        return Ok(PollOutcome::Confirmed { attempt, at });
                    }
                }
            }

            if attempt < attempts {
                self.pause(started);
            }
        }

        Ok(PollOutcome::Exhausted { attempts })
    }

    /// Sleep for the configured interval without overshooting the deadline
    fn pause(&self, started: Instant) {
        let mut wait = self.settings.interval;
        if let Some(deadline) = self.settings.deadline {
            wait = wait.min(deadline.saturating_sub(started.elapsed()));
        }
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }
}

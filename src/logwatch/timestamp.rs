//! Timestamp extraction for searchd log lines
//!
//! searchd prefixes every line with a bracketed local time:
//!
//! ```text
//! [Fri Sep  7 10:00:00.123 2012] [12345] rotating index: all indexes done
//! ```
//!
//! The date, the 3-digit milliseconds and the year are captured separately and
//! recombined into a single `NaiveDateTime`. The log carries no zone, so
//! instants are only comparable with other instants from the same log.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use regex::Regex;
use std::sync::OnceLock;

/// Layout of the date portion once the year has been appended
const DATE_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Layout for prefixes that carry no time of day (`[Mon Jan 2.500 2012]`)
const DATE_ONLY_FORMAT: &str = "%a %b %e %Y";

/// Prefix grammar: `[<date>.<ms> <year>]`
const PREFIX_PATTERN: &str = r"\[([^\]]*)\.([0-9]{3})\s([0-9]{4})\]";

static PREFIX_RE: OnceLock<Regex> = OnceLock::new();

/// Watermark used when the log has no lines yet
pub const DEFAULT_BASE_EPOCH: &str = "Fri Sep 7 10:00:00 2012";

/// Errors produced while extracting a timestamp
#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    /// The line does not start with a bracketed timestamp
    #[error("Could not match a timestamp prefix in {line:?}")]
    MissingPrefix { line: String },

    /// The prefix was found but its date does not parse
    #[error("Invalid timestamp {raw:?}: {source}")]
    InvalidDate {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Prefix matcher plus the fallback epoch
///
/// Built once at startup and shared by reference with every component that
/// reads the log.
#[derive(Debug, Clone)]
pub struct TimestampParser {
    base_epoch: NaiveDateTime,
}

impl TimestampParser {
    /// Parser with the default base epoch
    pub fn new() -> Result<Self, TimestampError> {
        Self::with_base_epoch(DEFAULT_BASE_EPOCH)
    }

    /// Parser with a custom base epoch
    ///
    /// The epoch uses the same layout as the log prefix without milliseconds,
    /// e.g. `Fri Sep 7 10:00:00 2012`.
    pub fn with_base_epoch(epoch: &str) -> Result<Self, TimestampError> {
        let base_epoch = parse_date(epoch)?;
        Ok(Self { base_epoch })
    }

    /// The instant substituted for the watermark of an empty log
    pub fn base_epoch(&self) -> NaiveDateTime {
        self.base_epoch
    }

    /// Extract the instant from the bracketed prefix of `line`
    pub fn parse(&self, line: &str) -> Result<NaiveDateTime, TimestampError> {
        let prefix = PREFIX_RE.get_or_init(|| Regex::new(PREFIX_PATTERN).unwrap());
        let caps = prefix
            .captures(line)
            .ok_or_else(|| TimestampError::MissingPrefix {
                line: line.to_string(),
            })?;

        let date = &caps[1];
        let millis: i64 = caps[2].parse().unwrap_or_default();
        let year = &caps[3];

        let base = parse_date(&format!("{} {}", date.trim(), year))?;
        Ok(base + TimeDelta::milliseconds(millis))
    }
}

/// Parse `<weekday> <month> <day> [<hh:mm:ss>] <year>`
fn parse_date(raw: &str) -> Result<NaiveDateTime, TimestampError> {
    match NaiveDateTime::parse_from_str(raw, DATE_TIME_FORMAT) {
        Ok(instant) => Ok(instant),
        Err(full_err) => NaiveDate::parse_from_str(raw, DATE_ONLY_FORMAT)
            .map(|date| date.and_time(NaiveTime::MIN))
            .map_err(|_| TimestampError::InvalidDate {
                raw: raw.to_string(),
                source: full_err,
            }),
    }
}

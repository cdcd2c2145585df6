//! Core domain model for railwatch: canonical alerts and run outcomes.

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "railwatch-core";

/// One bound of an alert's active period.
///
/// Upstream timestamps are sometimes absent or unparseable; those degrade
/// to [`PeriodBound::Unknown`] instead of failing the whole record. The
/// stored column form is `"YYYY-MM-DD HH:MM:SS"` or the literal `"NULL"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodBound {
    At(NaiveDateTime),
    Unknown,
}

impl PeriodBound {
    /// Interprets upstream epoch seconds, degrading out-of-range values
    /// to `Unknown`.
    pub fn from_epoch_secs(secs: i64) -> Self {
        match DateTime::from_timestamp(secs, 0) {
            Some(ts) => PeriodBound::At(ts.naive_utc()),
            None => PeriodBound::Unknown,
        }
    }

    /// The string persisted in the store's `start_date`/`end_date` columns.
    pub fn column_value(&self) -> String {
        match self {
            PeriodBound::At(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            PeriodBound::Unknown => "NULL".to_string(),
        }
    }
}

impl fmt::Display for PeriodBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_value())
    }
}

/// Canonical service-disruption record derived from one upstream feed entity.
///
/// `id` is the deduplication key; the store enforces one row per id. The
/// insertion timestamp is stamped by the store itself, not carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description_html: String,
    pub start_date: PeriodBound,
    pub end_date: PeriodBound,
    pub line_impacted: bool,
}

/// Terminal outcome of one pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Ok,
    FetchFailed,
    MalformedRecord,
    NotifyFailed,
}

/// Caller-facing result of a run: one outcome tag plus one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub message: String,
}

impl RunReport {
    pub fn success() -> Self {
        Self {
            outcome: RunOutcome::Ok,
            message: "Complete.".to_string(),
        }
    }

    pub fn fetch_failed() -> Self {
        Self {
            outcome: RunOutcome::FetchFailed,
            message: "Error: The API response is invalid".to_string(),
        }
    }

    pub fn malformed_record(entity: impl fmt::Display) -> Self {
        Self {
            outcome: RunOutcome::MalformedRecord,
            message: format!("Error: Unable to process result {entity}"),
        }
    }

    pub fn notify_failed() -> Self {
        Self {
            outcome: RunOutcome::NotifyFailed,
            message: "Error: Unable to send email.".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Ok
    }

    /// Numeric status for the process boundary: 200 on success, 500 on
    /// any aborted outcome.
    pub fn status_code(&self) -> u16 {
        if self.is_success() {
            200
        } else {
            500
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_render_as_civil_timestamp() {
        let bound = PeriodBound::from_epoch_secs(1_700_000_000);
        assert_eq!(bound.column_value(), "2023-11-14 22:13:20");
    }

    #[test]
    fn unknown_bound_renders_null_sentinel() {
        assert_eq!(PeriodBound::Unknown.column_value(), "NULL");
        assert_eq!(PeriodBound::Unknown.to_string(), "NULL");
    }

    #[test]
    fn out_of_range_epoch_degrades_to_unknown() {
        assert_eq!(PeriodBound::from_epoch_secs(i64::MAX), PeriodBound::Unknown);
    }

    #[test]
    fn report_status_codes_follow_outcome() {
        assert_eq!(RunReport::success().status_code(), 200);
        assert_eq!(RunReport::fetch_failed().status_code(), 500);
        assert_eq!(RunReport::notify_failed().status_code(), 500);
        assert_eq!(RunReport::malformed_record("42").status_code(), 500);
    }

    #[test]
    fn report_messages_are_stable() {
        assert_eq!(RunReport::success().message, "Complete.");
        assert_eq!(
            RunReport::fetch_failed().message,
            "Error: The API response is invalid"
        );
        assert_eq!(
            RunReport::malformed_record("#3").message,
            "Error: Unable to process result #3"
        );
        assert_eq!(
            RunReport::notify_failed().message,
            "Error: Unable to send email."
        );
    }
}

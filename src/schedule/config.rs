//! Per-fiscal-book schedule configuration and calendar rules.

use crate::error::{Result, SnapshotError};
use crate::snapshots::normalize_tags;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Default number of automatic snapshots kept per fiscal book.
pub const DEFAULT_RETENTION_COUNT: u32 = 5;

/// How often automatic snapshots are taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Weekly,
    Monthly,
    /// Triggered by the fiscal book's status change, never by the timer.
    BeforeStatusChange,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::BeforeStatusChange => "before-status-change",
        }
    }
}

/// Automatic snapshot schedule for one fiscal book.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub frequency: Frequency,
    /// 0 = Sunday .. 6 = Saturday. Used by weekly schedules.
    pub day_of_week: u8,
    /// 1..=31, clamped to the month's last day. Used by monthly schedules.
    pub day_of_month: u8,
    /// Unprotected automatic snapshots kept per fiscal book.
    pub retention_count: u32,
    /// Tags applied to every automatic snapshot.
    pub auto_tags: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Monthly,
            day_of_week: 0,
            day_of_month: 1,
            retention_count: DEFAULT_RETENTION_COUNT,
            auto_tags: Vec::new(),
        }
    }
}

impl ScheduleConfig {
    pub fn weekly(day_of_week: u8, retention_count: u32) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Weekly,
            day_of_week,
            retention_count,
            ..Default::default()
        }
    }

    pub fn monthly(day_of_month: u8, retention_count: u32) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Monthly,
            day_of_month,
            retention_count,
            ..Default::default()
        }
    }

    pub fn before_status_change(retention_count: u32) -> Self {
        Self {
            enabled: true,
            frequency: Frequency::BeforeStatusChange,
            retention_count,
            ..Default::default()
        }
    }

    pub fn with_auto_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Check ranges and normalize `auto_tags`.
    ///
    /// Day fields are range-checked even when the frequency ignores them.
    pub fn validated(mut self) -> Result<Self> {
        if self.day_of_week > 6 {
            return Err(SnapshotError::validation(format!(
                "day_of_week must be 0-6, got {}",
                self.day_of_week
            )));
        }
        if !(1..=31).contains(&self.day_of_month) {
            return Err(SnapshotError::validation(format!(
                "day_of_month must be 1-31, got {}",
                self.day_of_month
            )));
        }
        if self.retention_count == 0 {
            return Err(SnapshotError::validation("retention_count must be at least 1"));
        }
        self.auto_tags = normalize_tags(&self.auto_tags)?;
        Ok(self)
    }

    /// Whether `today` is a scheduled day. Ignores `enabled`.
    pub fn falls_on(&self, today: NaiveDate) -> bool {
        match self.frequency {
            Frequency::Weekly => {
                today.weekday().num_days_from_sunday() == u32::from(self.day_of_week)
            }
            Frequency::Monthly => {
                let last = last_day_of_month(today.year(), today.month());
                today.day() == u32::from(self.day_of_month).min(last)
            }
            Frequency::BeforeStatusChange => false,
        }
    }

    /// Whether two dates fall in the same schedule period: the ISO week for
    /// weekly schedules, the calendar month for monthly ones.
    pub fn same_period(&self, a: NaiveDate, b: NaiveDate) -> bool {
        match self.frequency {
            Frequency::Weekly => a.iso_week() == b.iso_week(),
            Frequency::Monthly => a.year() == b.year() && a.month() == b.month(),
            Frequency::BeforeStatusChange => false,
        }
    }
}

/// Last day of the given month.
pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    (28..=31)
        .rev()
        .find(|&day| NaiveDate::from_ymd_opt(year, month, day).is_some())
        .unwrap_or(28)
}

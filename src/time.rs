// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Time extents used for phenomenon time, valid time and temporal filters
//!
//! An extent is either an instant or a period whose bounds may be the
//! symbolic "now". Extents serialize as ISO 8601 strings: `now`,
//! `2010-06-01T00:00:00Z` or `2010-05-15T00:00:00Z/now`.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SosError};

const NOW: &str = "now";

/// One bound of a time extent
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeBound {
    /// Resolved to the current time when compared
    Now,
    Instant(DateTime<Utc>),
}

impl TimeBound {
    fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeBound::Now => now,
            TimeBound::Instant(t) => *t,
        }
    }

    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(NOW) {
            return Ok(TimeBound::Now);
        }
        parse_iso(s).map(TimeBound::Instant)
    }
}

impl fmt::Display for TimeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBound::Now => write!(f, "{}", NOW),
            TimeBound::Instant(t) => {
                write!(f, "{}", t.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
            }
        }
    }
}

/// Instant or period, possibly anchored at "now"
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeExtent {
    pub begin: TimeBound,
    pub end: TimeBound,
}

impl TimeExtent {
    /// The instant "now"
    pub fn now() -> Self {
        Self {
            begin: TimeBound::Now,
            end: TimeBound::Now,
        }
    }

    pub fn instant(t: DateTime<Utc>) -> Self {
        Self {
            begin: TimeBound::Instant(t),
            end: TimeBound::Instant(t),
        }
    }

    pub fn period(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            begin: TimeBound::Instant(begin),
            end: TimeBound::Instant(end),
        }
    }

    /// Period from `begin` up to the present
    pub fn since(begin: DateTime<Utc>) -> Self {
        Self {
            begin: TimeBound::Instant(begin),
            end: TimeBound::Now,
        }
    }

    /// Extent from Unix epoch seconds
    pub fn from_epoch_range(begin: f64, end: f64) -> Self {
        Self::period(epoch_to_datetime(begin), epoch_to_datetime(end))
    }

    /// True for the instant "now"
    pub fn is_base_at_now(&self) -> bool {
        self.begin == TimeBound::Now && self.end == TimeBound::Now
    }

    pub fn is_end_now(&self) -> bool {
        self.end == TimeBound::Now
    }

    /// Bounds resolved against the current time
    pub fn resolve(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (self.begin.resolve(now), self.end.resolve(now))
    }

    /// Bounds as Unix epoch seconds
    pub fn epoch_range(&self) -> (f64, f64) {
        let (begin, end) = self.resolve();
        (datetime_to_epoch(begin), datetime_to_epoch(end))
    }

    /// Closed-interval intersection test
    pub fn intersects(&self, other: &TimeExtent) -> bool {
        let now = Utc::now();
        let (a0, a1) = (self.begin.resolve(now), self.end.resolve(now));
        let (b0, b1) = (other.begin.resolve(now), other.end.resolve(now));
        a0 <= b1 && b0 <= a1
    }

    pub fn contains_epoch(&self, t: f64) -> bool {
        let (begin, end) = self.epoch_range();
        t >= begin && t <= end
    }

    pub fn to_iso_string(&self) -> String {
        if self.begin == self.end {
            self.begin.to_string()
        } else {
            format!("{}/{}", self.begin, self.end)
        }
    }
}

impl fmt::Display for TimeExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_iso_string())
    }
}

impl FromStr for TimeExtent {
    type Err = SosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((begin, end)) => {
                let extent = Self {
                    begin: TimeBound::parse(begin)?,
                    end: TimeBound::parse(end)?,
                };
                let (b, e) = extent.resolve();
                if b > e {
                    return Err(SosError::Parse(format!("Time period {} ends before it begins", s)));
                }
                Ok(extent)
            }
            None => {
                let bound = TimeBound::parse(s)?;
                Ok(Self {
                    begin: bound,
                    end: bound,
                })
            }
        }
    }
}

impl TryFrom<String> for TimeExtent {
    type Error = SosError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TimeExtent> for String {
    fn from(extent: TimeExtent) -> Self {
        extent.to_iso_string()
    }
}

/// Parse an ISO 8601 date or date-time; bare dates are midnight UTC
pub fn parse_iso(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&t));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&t));
        }
    }
    Err(SosError::Parse(format!("Invalid ISO 8601 time: {}", s)))
}

pub fn datetime_to_epoch(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9
}

pub fn epoch_to_datetime(t: f64) -> DateTime<Utc> {
    let secs = t.floor();
    let nanos = ((t - secs) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(secs as i64, nanos)
        .single()
        .unwrap_or_default()
}

/// Current time as Unix epoch seconds
pub fn now_epoch() -> f64 {
    datetime_to_epoch(Utc::now())
}

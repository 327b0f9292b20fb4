//! Autumn clock-change calendar for the portal's home timezone (Europe/Dublin).
//!
//! Irish summer time ends at 02:00 local on the last Sunday of October, when
//! clocks fall back to 01:00. The half-hourly interval ends labelled `01:00`
//! and `01:30` that night are printed twice in the export, once per pass.

use std::collections::HashSet;

use meter_client::domain::READ_TIMESTAMP_FORMAT;
use serde::Deserialize;
use time::{error::ComponentRange, Date, Month, Time};

pub const FALLBACK_MONTH: Month = Month::October;

/// Interval-end labels that repeat on fallback night: the hour and the half
/// hour before the 02:00 clock change.
const AMBIGUOUS_LABELS: [(u8, u8); 2] = [(1, 0), (1, 30)];

/// Years around the run date for which ambiguous keys are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DstWindow {
    pub years_before: u16,
    pub years_after: u16,
}

impl Default for DstWindow {
    fn default() -> Self {
        Self {
            years_before: 4,
            years_after: 4,
        }
    }
}

pub fn last_sunday_of_october(year: i32) -> Result<Date, ComponentRange> {
    let last_day = Date::from_calendar_date(year, FALLBACK_MONTH, 31)?;
    let back = last_day.weekday().number_days_from_sunday();
    Date::from_calendar_date(year, FALLBACK_MONTH, 31 - back)
}

/// The two identity keys that occur twice on `year`'s fallback night.
pub fn ambiguous_keys_for_year(year: i32) -> Result<[String; 2], ComponentRange> {
    let date = last_sunday_of_october(year)?;
    let mut keys: [String; 2] = Default::default();
    for (key, (hour, minute)) in keys.iter_mut().zip(AMBIGUOUS_LABELS) {
        let dt = date.with_time(Time::from_hms(hour, minute, 0)?);
        // The layout is a fixed set of numeric components.
        *key = dt.format(READ_TIMESTAMP_FORMAT).unwrap_or_default();
    }
    Ok(keys)
}

/// Every ambiguous identity key within `window` of `run_date`'s year.
pub fn ambiguous_identity_keys(run_date: Date, window: DstWindow) -> HashSet<String> {
    let year = run_date.year();
    let first = year - i32::from(window.years_before);
    let last = year + i32::from(window.years_after);

    (first..=last)
        .filter_map(|y| match ambiguous_keys_for_year(y) {
            Ok(keys) => Some(keys),
            Err(e) => {
                tracing::warn!(year = y, error = %e, "no DST fallback date for year");
                None
            }
        })
        .flatten()
        .collect()
}

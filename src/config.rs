use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::limits::MAX_PAGE_SIZE;
use crate::model::{Ms, Span, MS_PER_HOUR, MS_PER_SECOND};

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Process-wide configuration, loaded once at startup and passed to the
/// engine as an immutable struct. Working hours and durations are
/// interpreted in `timezone`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,

    /// Slot length in whole hours (`BOOKING_DURATION`).
    pub booking_duration_hours: u32,
    pub work_start_hour: u32,
    pub work_start_minute: u32,
    pub work_end_hour: u32,
    pub work_end_minute: u32,
    /// Booking length bounds in seconds.
    pub min_booking_secs: i64,
    pub max_booking_secs: i64,
    pub timezone: Tz,
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8700,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            booking_duration_hours: 1,
            work_start_hour: 8,
            work_start_minute: 0,
            work_end_hour: 18,
            work_end_minute: 0,
            min_booking_secs: 1800,
            max_booking_secs: 604_800,
            timezone: chrono_tz::UTC,
            page_size: 26,
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError(format!("invalid {key}: {raw}"))),
    }
}

fn env_parse_opt<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(None),
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError(format!("invalid {key}: {raw}"))),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Settings::default();
        let settings = Settings {
            bind: env_string("PERCH_BIND", d.bind),
            port: env_parse("PERCH_PORT", d.port)?,
            data_dir: PathBuf::from(env_string("PERCH_DATA_DIR", "./data".into())),
            metrics_port: env_parse_opt("PERCH_METRICS_PORT")?,
            compact_threshold: env_parse("PERCH_COMPACT_THRESHOLD", d.compact_threshold)?,
            booking_duration_hours: env_parse("BOOKING_DURATION", d.booking_duration_hours)?,
            work_start_hour: env_parse("START_OF_WORK_HOUR", d.work_start_hour)?,
            work_start_minute: env_parse("START_OF_WORK_MINUTE", d.work_start_minute)?,
            work_end_hour: env_parse("END_OF_WORK_HOUR", d.work_end_hour)?,
            work_end_minute: env_parse("END_OF_WORK_MINUTE", d.work_end_minute)?,
            min_booking_secs: env_parse("MIN_BOOKING_DURATION", d.min_booking_secs)?,
            max_booking_secs: env_parse("MAX_BOOKING_DURATION", d.max_booking_secs)?,
            timezone: env_parse("TIME_ZONE", d.timezone)?,
            page_size: env_parse("PERCH_PAGE_SIZE", d.page_size)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.booking_duration_hours == 0 || self.booking_duration_hours > 24 {
            return Err(ConfigError(
                "BOOKING_DURATION must be between 1 and 24 hours".into(),
            ));
        }
        if self.work_start_hour > 23
            || self.work_end_hour > 23
            || self.work_start_minute > 59
            || self.work_end_minute > 59
        {
            return Err(ConfigError("working hours out of range".into()));
        }
        let start = self.work_start_hour * 60 + self.work_start_minute;
        let end = self.work_end_hour * 60 + self.work_end_minute;
        if start >= end {
            return Err(ConfigError("work day must start before it ends".into()));
        }
        if self.min_booking_secs < 1 {
            return Err(ConfigError("MIN_BOOKING_DURATION must be positive".into()));
        }
        if self.min_booking_secs > self.max_booking_secs {
            return Err(ConfigError(
                "MIN_BOOKING_DURATION exceeds MAX_BOOKING_DURATION".into(),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError(format!(
                "PERCH_PAGE_SIZE must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn slot_step_ms(&self) -> Ms {
        Ms::from(self.booking_duration_hours) * MS_PER_HOUR
    }

    pub fn min_booking_ms(&self) -> Ms {
        self.min_booking_secs * MS_PER_SECOND
    }

    pub fn max_booking_ms(&self) -> Ms {
        self.max_booking_secs * MS_PER_SECOND
    }

    /// Resolve a wall-clock time in the configured timezone to unix ms.
    /// A time falling into a DST gap is pushed forward one hour; an
    /// ambiguous time resolves to its earlier occurrence.
    fn localize(&self, naive: NaiveDateTime) -> Option<Ms> {
        if let Some(dt) = self.timezone.from_local_datetime(&naive).earliest() {
            return Some(dt.timestamp_millis());
        }
        let shifted = naive + chrono::Duration::hours(1);
        self.timezone
            .from_local_datetime(&shifted)
            .earliest()
            .map(|dt| dt.timestamp_millis())
    }

    fn local_at(&self, date: NaiveDate, hour: u32, minute: u32) -> Option<Ms> {
        self.localize(date.and_hms_opt(hour, minute, 0)?)
    }

    /// Working-hour window of `date`, or None if the date is not
    /// representable in the configured timezone.
    pub fn work_window(&self, date: NaiveDate) -> Option<Span> {
        let start = self.local_at(date, self.work_start_hour, self.work_start_minute)?;
        let end = self.local_at(date, self.work_end_hour, self.work_end_minute)?;
        (start < end).then(|| Span::new(start, end))
    }

    /// Full calendar-day window `[00:00, next day 00:00)` of `date`.
    pub fn day_window(&self, date: NaiveDate) -> Option<Span> {
        let start = self.local_at(date, 0, 0)?;
        let end = self.local_at(date.succ_opt()?, 0, 0)?;
        (start < end).then(|| Span::new(start, end))
    }

    /// Calendar date of an instant in the configured timezone.
    pub fn local_date(&self, at: Ms) -> NaiveDate {
        DateTime::from_timestamp_millis(at)
            .map(|dt| dt.with_timezone(&self.timezone).date_naive())
            .unwrap_or(NaiveDate::MIN)
    }

    /// The next full local hour strictly after `at` (an instant exactly on
    /// the hour still advances to the following one).
    pub fn next_full_hour(&self, at: Ms) -> Ms {
        let Some(utc) = DateTime::from_timestamp_millis(at) else {
            return at;
        };
        let local = utc.with_timezone(&self.timezone);
        let Some(hour_floor) = local.date_naive().and_hms_opt(local.hour(), 0, 0) else {
            return at;
        };
        self.localize(hour_floor + chrono::Duration::hours(1))
            .unwrap_or(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MS_PER_MINUTE;

    fn utc_ms(date: NaiveDate, h: u32, m: u32, s: u32) -> Ms {
        date.and_hms_opt(h, m, s)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_work_hours() {
        let settings = Settings {
            work_start_hour: 18,
            work_end_hour: 8,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_slot_duration() {
        let settings = Settings {
            booking_duration_hours: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_min_above_max() {
        let settings = Settings {
            min_booking_secs: 100,
            max_booking_secs: 50,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn work_window_utc() {
        let settings = Settings::default();
        let date = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let window = settings.work_window(date).unwrap();
        assert_eq!(window.start, utc_ms(date, 8, 0, 0));
        assert_eq!(window.end, utc_ms(date, 18, 0, 0));
    }

    #[test]
    fn work_window_respects_minutes() {
        let settings = Settings {
            work_start_minute: 30,
            ..Settings::default()
        };
        let date = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let window = settings.work_window(date).unwrap();
        assert_eq!(window.start, utc_ms(date, 8, 30, 0));
    }

    #[test]
    fn day_window_is_24h_in_utc() {
        let settings = Settings::default();
        let date = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let window = settings.day_window(date).unwrap();
        assert_eq!(window.duration_ms(), 24 * crate::model::MS_PER_HOUR);
    }

    #[test]
    fn next_full_hour_mid_hour() {
        let settings = Settings::default();
        let date = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let at = utc_ms(date, 9, 30, 15);
        assert_eq!(settings.next_full_hour(at), utc_ms(date, 10, 0, 0));
    }

    #[test]
    fn next_full_hour_on_the_hour_advances() {
        let settings = Settings::default();
        let date = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let at = utc_ms(date, 9, 0, 0);
        assert_eq!(settings.next_full_hour(at), utc_ms(date, 10, 0, 0));
    }

    #[test]
    fn local_date_crosses_midnight_by_timezone() {
        let settings = Settings {
            timezone: chrono_tz::Europe::Moscow, // UTC+3, no DST
            ..Settings::default()
        };
        let date = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        // 22:30 UTC is already the next day in Moscow
        let at = utc_ms(date, 22, 30, 0);
        assert_eq!(settings.local_date(at), date.succ_opt().unwrap());
    }

    #[test]
    fn work_window_in_offset_timezone() {
        let settings = Settings {
            timezone: chrono_tz::Europe::Moscow,
            ..Settings::default()
        };
        let date = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let window = settings.work_window(date).unwrap();
        // 08:00 Moscow == 05:00 UTC
        assert_eq!(window.start, utc_ms(date, 5, 0, 0));
        assert_eq!(window.end - window.start, 600 * MS_PER_MINUTE);
    }
}

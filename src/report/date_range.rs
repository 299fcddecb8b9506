//! Resolve named date presets into concrete start/end instants

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::definition::{DateRangePreset, DateRangeSpec};
use crate::error::{ReportError, ReportResult};

/// Floor used for "all time" and for custom ranges without a start.
pub const ALL_TIME_START: (i32, u32, u32) = (1970, 1, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ResolvedDateRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn end_of_day(date: NaiveDate) -> ReportResult<DateTime<Utc>> {
    date.and_hms_milli_opt(23, 59, 59, 999)
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| ReportError::InvalidDate {
            value: date.to_string(),
        })
}

fn floor_date() -> NaiveDate {
    let (y, m, d) = ALL_TIME_START;
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp and keeps the date part.
fn parse_date(value: &str) -> ReportResult<NaiveDate> {
    let trimmed = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .map_err(|_| ReportError::InvalidDate {
            value: value.to_string(),
        })
}

/// Resolve a preset against `now`. Pure: the clock is an argument.
pub fn resolve(spec: &DateRangeSpec, now: DateTime<Utc>) -> ReportResult<ResolvedDateRange> {
    let today = now.date_naive();
    let end = end_of_day(today)?;

    let start_date = match spec.preset {
        DateRangePreset::Last30 => today.checked_sub_signed(Duration::days(30)).unwrap_or_else(floor_date),
        DateRangePreset::Last90 => today.checked_sub_signed(Duration::days(90)).unwrap_or_else(floor_date),
        DateRangePreset::Last6Months => today
            .checked_sub_months(Months::new(6))
            .unwrap_or_else(floor_date),
        DateRangePreset::LastYear => today
            .checked_sub_months(Months::new(12))
            .unwrap_or_else(floor_date),
        DateRangePreset::YearToDate => {
            NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today)
        }
        DateRangePreset::AllTime => floor_date(),
        DateRangePreset::Custom => {
            let start = match spec.custom_start.as_deref().filter(|s| !s.trim().is_empty()) {
                Some(s) => parse_date(s)?,
                None => floor_date(),
            };
            let end = match spec.custom_end.as_deref().filter(|s| !s.trim().is_empty()) {
                Some(s) => end_of_day(parse_date(s)?)?,
                None => end,
            };
            return Ok(ResolvedDateRange {
                start: start_of_day(start),
                end,
            });
        }
    };

    Ok(ResolvedDateRange {
        start: start_of_day(start_date),
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 15, 13, 45, 0).unwrap()
    }

    fn spec(preset: DateRangePreset) -> DateRangeSpec {
        DateRangeSpec {
            preset,
            custom_start: None,
            custom_end: None,
        }
    }

    #[test]
    fn last30_spans_whole_days() {
        let r = resolve(&spec(DateRangePreset::Last30), now()).unwrap();
        assert_eq!(r.start, Utc.with_ymd_and_hms(2024, 7, 16, 0, 0, 0).unwrap());
        assert_eq!(r.end.date_naive(), now().date_naive());
        assert!(r.end > now());
        assert!(r.contains(now()));
    }

    #[test]
    fn month_based_presets() {
        let six = resolve(&spec(DateRangePreset::Last6Months), now()).unwrap();
        assert_eq!(six.start, Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap());

        let year = resolve(&spec(DateRangePreset::LastYear), now()).unwrap();
        assert_eq!(year.start, Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap());

        let ytd = resolve(&spec(DateRangePreset::YearToDate), now()).unwrap();
        assert_eq!(ytd.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn all_time_and_open_custom_use_floor() {
        let all = resolve(&spec(DateRangePreset::AllTime), now()).unwrap();
        assert_eq!(all.start, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());

        let custom = resolve(&spec(DateRangePreset::Custom), now()).unwrap();
        assert_eq!(custom.start, all.start);
        assert_eq!(custom.end, all.end);
    }

    #[test]
    fn custom_range_is_inclusive_of_end_day() {
        let r = resolve(
            &DateRangeSpec {
                preset: DateRangePreset::Custom,
                custom_start: Some("2024-03-01".into()),
                custom_end: Some("2024-03-31T08:00:00Z".into()),
            },
            now(),
        )
        .unwrap();
        assert_eq!(r.start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert!(r.contains(Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap()));
        assert!(!r.contains(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn malformed_custom_date_is_an_error() {
        let err = resolve(
            &DateRangeSpec {
                preset: DateRangePreset::Custom,
                custom_start: Some("last tuesday".into()),
                custom_end: None,
            },
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, ReportError::InvalidDate { .. }));
    }

    #[test]
    fn far_future_custom_end_does_not_overflow() {
        let last = end_of_day(NaiveDate::MAX).unwrap();
        assert_eq!(last.date_naive(), NaiveDate::MAX);

        let max = NaiveDate::MAX.format("%Y-%m-%d").to_string();
        for end in ["+262143-12-31", max.as_str()] {
            let result = resolve(
                &DateRangeSpec {
                    preset: DateRangePreset::Custom,
                    custom_start: None,
                    custom_end: Some(end.to_string()),
                },
                now(),
            );
            match result {
                Ok(r) => assert_eq!(r.end, last),
                Err(err) => assert!(matches!(err, ReportError::InvalidDate { .. }), "{err}"),
            }
        }
    }
}

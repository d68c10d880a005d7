//! ISO-8601 Durations
//!
//! A [`Duration`] keeps its calendar fields (years, months, weeks, days)
//! apart from its clock fields (hours, minutes, seconds) because months and
//! years have no fixed length. Applying a duration to a date-time always
//! goes calendar fields first, then clock fields.
//!
//! # Example
//!
//! ```
//! use cycleflow::calendar::{parse_datetime, Duration};
//!
//! let period: Duration = "P1M".parse().unwrap();
//! let jan31 = parse_datetime("2026-01-31").unwrap();
//! let end_of_feb = period.add_to(jan31).unwrap();
//! assert_eq!(end_of_feb, parse_datetime("2026-02-28").unwrap());
//! ```

use std::fmt;
use std::ops::{Add, Neg};
use std::str::FromStr;

use chrono::{Months, NaiveDateTime, TimeDelta};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::ConfigError;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A signed ISO-8601 duration.
///
/// Every field carries its own sign. `-P1Y2M` and `P-1Y-2M` parse to the
/// same value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Duration {
    pub years: i64,
    pub months: i64,
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    /// Fractional part of `seconds`, same sign as `seconds`.
    pub nanos: i64,
}

impl Duration {
    pub const ZERO: Duration = Duration {
        years: 0,
        months: 0,
        weeks: 0,
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: 0,
        nanos: 0,
    };

    pub fn years(n: i64) -> Self {
        Self { years: n, ..Self::ZERO }
    }

    pub fn months(n: i64) -> Self {
        Self { months: n, ..Self::ZERO }
    }

    pub fn days(n: i64) -> Self {
        Self { days: n, ..Self::ZERO }
    }

    pub fn hours(n: i64) -> Self {
        Self { hours: n, ..Self::ZERO }
    }

    /// Parses an ISO-8601 period string such as `P1Y2M10DT2H30M` or `-P2M`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let fail = |reason: &str| ConfigError::InvalidDuration {
            value: text.to_string(),
            reason: reason.to_string(),
        };

        let raw = text.trim();
        let (negative, rest) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };

        let body = rest
            .strip_prefix(['P', 'p'])
            .ok_or_else(|| fail("must start with 'P'"))?;

        let (date_part, time_part) = match body.split_once(['T', 't']) {
            Some((date, time)) => (date, Some(time)),
            None => (body, None),
        };

        let mut duration = Self::ZERO;
        let mut fields = 0;

        for (designator, value) in parse_fields(date_part, &['Y', 'M', 'W', 'D']).map_err(|r| fail(&r))? {
            if value.nanos != 0 {
                return Err(fail("fractional values are only supported for seconds"));
            }
            match designator {
                'Y' => duration.years = value.whole,
                'M' => duration.months = value.whole,
                'W' => duration.weeks = value.whole,
                _ => duration.days = value.whole,
            }
            fields += 1;
        }

        if let Some(time_part) = time_part {
            if time_part.is_empty() {
                return Err(fail("'T' must be followed by at least one time field"));
            }
            for (designator, value) in parse_fields(time_part, &['H', 'M', 'S']).map_err(|r| fail(&r))? {
                if value.nanos != 0 && designator != 'S' {
                    return Err(fail("fractional values are only supported for seconds"));
                }
                match designator {
                    'H' => duration.hours = value.whole,
                    'M' => duration.minutes = value.whole,
                    _ => {
                        duration.seconds = value.whole;
                        duration.nanos = value.nanos;
                    }
                }
                fields += 1;
            }
        }

        if fields == 0 {
            return Err(fail("no duration fields"));
        }

        Ok(if negative { -duration } else { duration })
    }

    /// Returns true if every field is zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Returns true if no field is negative and at least one is positive.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.fields().iter().all(|f| *f >= 0)
    }

    /// Returns true if no field is positive and at least one is negative.
    pub fn is_negative(&self) -> bool {
        (-*self).is_positive()
    }

    fn fields(&self) -> [i64; 8] {
        [
            self.years,
            self.months,
            self.weeks,
            self.days,
            self.hours,
            self.minutes,
            self.seconds,
            self.nanos,
        ]
    }

    /// Applies this duration to a date-time.
    ///
    /// Years and months move the calendar month and clamp the day to the
    /// last valid day of the resulting month (January 31 + P1M is the last
    /// day of February). Weeks and days then move whole days, and the clock
    /// fields are added as a fixed offset.
    pub fn add_to(&self, date: NaiveDateTime) -> Result<NaiveDateTime, ConfigError> {
        let overflow = || ConfigError::CalendarOverflow {
            date: date.to_string(),
            duration: self.to_string(),
        };

        let total_months = self
            .years
            .checked_mul(12)
            .and_then(|m| m.checked_add(self.months))
            .ok_or_else(overflow)?;
        let step = u32::try_from(total_months.unsigned_abs()).map_err(|_| overflow())?;
        let shifted = if total_months >= 0 {
            date.checked_add_months(Months::new(step))
        } else {
            date.checked_sub_months(Months::new(step))
        }
        .ok_or_else(overflow)?;

        let total_days = self
            .weeks
            .checked_mul(7)
            .and_then(|d| d.checked_add(self.days))
            .ok_or_else(overflow)?;
        let shifted = TimeDelta::try_days(total_days)
            .and_then(|delta| shifted.checked_add_signed(delta))
            .ok_or_else(overflow)?;

        let total_seconds = self
            .hours
            .checked_mul(3600)
            .and_then(|s| s.checked_add(self.minutes.checked_mul(60)?))
            .and_then(|s| s.checked_add(self.seconds))
            .ok_or_else(overflow)?;
        TimeDelta::try_seconds(total_seconds)
            .and_then(|delta| delta.checked_add(&TimeDelta::nanoseconds(self.nanos)))
            .and_then(|delta| shifted.checked_add_signed(delta))
            .ok_or_else(overflow)
    }

    /// Applies the negated duration to a date-time.
    ///
    /// Month clamping makes this a non-strict inverse of [`Duration::add_to`]:
    /// January 31 + P1M - P1M lands on January 28 (or 29).
    pub fn subtract_from(&self, date: NaiveDateTime) -> Result<NaiveDateTime, ConfigError> {
        (-*self).add_to(date)
    }
}

/// `date + duration`.
pub fn add(date: NaiveDateTime, duration: &Duration) -> Result<NaiveDateTime, ConfigError> {
    duration.add_to(date)
}

/// `date - duration`.
pub fn subtract(date: NaiveDateTime, duration: &Duration) -> Result<NaiveDateTime, ConfigError> {
    duration.subtract_from(date)
}

struct FieldValue {
    whole: i64,
    nanos: i64,
}

/// Splits `1Y-2M3D` style text into designator/value pairs, enforcing
/// designator order and uniqueness.
fn parse_fields(text: &str, designators: &[char]) -> Result<Vec<(char, FieldValue)>, String> {
    let mut fields = Vec::new();
    let mut next_allowed = 0;
    let mut number = String::new();

    for ch in text.chars() {
        let upper = ch.to_ascii_uppercase();
        if ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.' | ',') {
            number.push(ch);
            continue;
        }

        let position = designators[next_allowed..]
            .iter()
            .position(|d| *d == upper)
            .ok_or_else(|| format!("unexpected or out-of-order designator '{}'", ch))?;
        if number.is_empty() {
            return Err(format!("designator '{}' has no value", ch));
        }
        fields.push((upper, parse_number(&number)?));
        number.clear();
        next_allowed += position + 1;
    }

    if !number.is_empty() {
        return Err(format!("value '{}' has no designator", number));
    }
    Ok(fields)
}

fn parse_number(text: &str) -> Result<FieldValue, String> {
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };

    let (whole, fraction) = match digits.split_once(['.', ',']) {
        Some((whole, fraction)) => (whole, fraction),
        None => (digits, ""),
    };

    let is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || !is_digits(whole) || !is_digits(fraction) || fraction.len() > 9 {
        return Err(format!("malformed number '{}'", text));
    }

    let whole: i64 = whole
        .parse()
        .map_err(|_| format!("number '{}' out of range", text))?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<9}", fraction);
        padded
            .parse::<i64>()
            .map_err(|_| format!("malformed fraction '{}'", text))?
    };

    Ok(FieldValue {
        whole: sign * whole,
        nanos: sign * nanos,
    })
}

impl Neg for Duration {
    type Output = Duration;

    fn neg(self) -> Duration {
        Duration {
            years: self.years.saturating_neg(),
            months: self.months.saturating_neg(),
            weeks: self.weeks.saturating_neg(),
            days: self.days.saturating_neg(),
            hours: self.hours.saturating_neg(),
            minutes: self.minutes.saturating_neg(),
            seconds: self.seconds.saturating_neg(),
            nanos: self.nanos.saturating_neg(),
        }
    }
}

impl Duration {
    /// Field-wise sum, or `None` if any field overflows.
    pub fn checked_add(self, other: Duration) -> Option<Duration> {
        let nanos = self.nanos.checked_add(other.nanos)?;
        let seconds = self
            .seconds
            .checked_add(other.seconds)?
            .checked_add(nanos / NANOS_PER_SECOND)?;
        Some(Duration {
            years: self.years.checked_add(other.years)?,
            months: self.months.checked_add(other.months)?,
            weeks: self.weeks.checked_add(other.weeks)?,
            days: self.days.checked_add(other.days)?,
            hours: self.hours.checked_add(other.hours)?,
            minutes: self.minutes.checked_add(other.minutes)?,
            seconds,
            nanos: nanos % NANOS_PER_SECOND,
        })
    }
}

impl Add for Duration {
    type Output = Duration;

    /// Field-wise sum. Fields are not normalised into each other and
    /// saturate at the `i64` bounds; use [`Duration::checked_add`] to detect
    /// overflow.
    fn add(self, other: Duration) -> Duration {
        let nanos = self.nanos.saturating_add(other.nanos);
        Duration {
            years: self.years.saturating_add(other.years),
            months: self.months.saturating_add(other.months),
            weeks: self.weeks.saturating_add(other.weeks),
            days: self.days.saturating_add(other.days),
            hours: self.hours.saturating_add(other.hours),
            minutes: self.minutes.saturating_add(other.minutes),
            seconds: self
                .seconds
                .saturating_add(other.seconds)
                .saturating_add(nanos / NANOS_PER_SECOND),
            nanos: nanos % NANOS_PER_SECOND,
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "PT0S");
        }
        if self.is_negative() {
            return write!(f, "-{}", -*self);
        }

        write!(f, "P")?;
        for (value, designator) in [
            (self.years, 'Y'),
            (self.months, 'M'),
            (self.weeks, 'W'),
            (self.days, 'D'),
        ] {
            if value != 0 {
                write!(f, "{}{}", value, designator)?;
            }
        }

        if self.hours != 0 || self.minutes != 0 || self.seconds != 0 || self.nanos != 0 {
            write!(f, "T")?;
            if self.hours != 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes != 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.nanos != 0 {
                let sign = if self.seconds < 0 || self.nanos < 0 { "-" } else { "" };
                let fraction = format!("{:09}", self.nanos.unsigned_abs());
                write!(
                    f,
                    "{}{}.{}S",
                    sign,
                    self.seconds.unsigned_abs(),
                    fraction.trim_end_matches('0')
                )?;
            } else if self.seconds != 0 {
                write!(f, "{}S", self.seconds)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Duration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_datetime;

    fn at(text: &str) -> NaiveDateTime {
        parse_datetime(text).unwrap()
    }

    #[test]
    fn test_parse_full_duration() {
        let d = Duration::parse("P1Y2M3W4DT5H6M7.25S").unwrap();
        assert_eq!(d.years, 1);
        assert_eq!(d.months, 2);
        assert_eq!(d.weeks, 3);
        assert_eq!(d.days, 4);
        assert_eq!(d.hours, 5);
        assert_eq!(d.minutes, 6);
        assert_eq!(d.seconds, 7);
        assert_eq!(d.nanos, 250_000_000);
    }

    #[test]
    fn test_parse_negative_forms_agree() {
        let leading = Duration::parse("-P2M").unwrap();
        let inner = Duration::parse("P-2M").unwrap();
        assert_eq!(leading, inner);
        assert_eq!(leading.months, -2);
        assert!(leading.is_negative());
    }

    #[test]
    fn test_parse_minutes_vs_months() {
        let d = Duration::parse("P1MT1M").unwrap();
        assert_eq!(d.months, 1);
        assert_eq!(d.minutes, 1);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "P", "PT", "1Y", "P1", "PY", "P1D2Y", "P1.5D", "PT1.5H", "P1Y1Y", "P1H", "PT1D"] {
            assert!(Duration::parse(bad).is_err(), "expected '{}' to be rejected", bad);
        }
    }

    #[test]
    fn test_sign_predicates() {
        assert!(Duration::parse("P1D").unwrap().is_positive());
        assert!(!Duration::parse("PT0S").unwrap().is_positive());
        assert!(Duration::parse("PT0S").unwrap().is_zero());
        let mixed = Duration::parse("P1MT-1H").unwrap();
        assert!(!mixed.is_positive());
        assert!(!mixed.is_negative());
    }

    #[test]
    fn test_display_round_trips_text() {
        for text in ["P1Y2M10DT2H30M", "-P2M", "PT0.5S", "P1W", "PT0S"] {
            assert_eq!(Duration::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_add_month_clamps_to_month_end() {
        let d = Duration::months(1);
        assert_eq!(d.add_to(at("2026-01-31")).unwrap(), at("2026-02-28"));
        assert_eq!(d.add_to(at("2028-01-31")).unwrap(), at("2028-02-29"));
    }

    #[test]
    fn test_add_calendar_before_clock() {
        // Feb 28 23:00 + (P1M + PT1H): month first (Mar 28 23:00), then the hour.
        let d = Duration::parse("P1MT1H").unwrap();
        assert_eq!(
            d.add_to(at("2026-02-28T23:00")).unwrap(),
            at("2026-03-29T00:00")
        );
    }

    #[test]
    fn test_subtract_is_add_of_negation() {
        let d = Duration::parse("P2M").unwrap();
        assert_eq!(subtract(at("2026-03-01"), &d).unwrap(), at("2026-01-01"));
        assert_eq!(add(at("2026-03-01"), &-d).unwrap(), at("2026-01-01"));
    }

    #[test]
    fn test_subtract_after_clamp_is_not_inverse() {
        let d = Duration::months(1);
        let there = d.add_to(at("2026-01-31")).unwrap();
        assert_eq!(d.subtract_from(there).unwrap(), at("2026-01-28"));
    }

    #[test]
    fn test_add_weeks_days_and_fraction() {
        let d = Duration::parse("P1W1DT1.5S").unwrap();
        let result = d.add_to(at("2026-01-01")).unwrap();
        assert_eq!(
            result,
            at("2026-01-09T00:00:01") + TimeDelta::milliseconds(500)
        );
    }

    #[test]
    fn test_add_overflow_is_error() {
        let d = Duration::years(i64::MAX);
        assert!(matches!(
            d.add_to(at("2026-01-01")),
            Err(ConfigError::CalendarOverflow { .. })
        ));
    }

    #[test]
    fn test_duration_sum() {
        let sum = Duration::parse("PT0.75S").unwrap() + Duration::parse("P1DT0.5S").unwrap();
        assert_eq!(sum.days, 1);
        assert_eq!(sum.seconds, 1);
        assert_eq!(sum.nanos, 250_000_000);
    }

    #[test]
    fn test_duration_sum_does_not_panic_on_overflow() {
        let big = Duration::years(i64::MAX);
        assert_eq!(big.checked_add(Duration::years(1)), None);
        assert_eq!((big + Duration::years(1)).years, i64::MAX);
        assert_eq!(
            Duration::months(1).checked_add(Duration::months(2)),
            Some(Duration::months(3))
        );

        let floor = Duration::days(i64::MIN);
        assert_eq!((-floor).days, i64::MAX);
    }

    #[test]
    fn test_serde_as_string() {
        let d: Duration = serde_yaml::from_str("P2M").unwrap();
        assert_eq!(d, Duration::months(2));
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"P2M\"");
    }
}

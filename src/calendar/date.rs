//! Date-time parsing and serde helpers.
//!
//! Workflow files write dates as `2026-01-01`, `2026-01-01T00:00` or
//! `2026-01-01T00:00:00`. All of them become a naive (zone-less)
//! [`NaiveDateTime`]; cycling is calendar arithmetic, not instant arithmetic.

use chrono::{NaiveDate, NaiveDateTime};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serializer};

use crate::error::ConfigError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parses a date or date-time string.
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime, ConfigError> {
    let text = text.trim();

    for format in DATETIME_FORMATS {
        if let Ok(date) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(date);
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ConfigError::InvalidDate {
            value: text.to_string(),
        })
}

/// Canonical text form used in labels and serialised graphs.
pub fn format_datetime(date: &NaiveDateTime) -> String {
    date.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub(crate) fn serialize_opt_date<S: Serializer>(
    date: &Option<NaiveDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match date {
        Some(d) => serializer.serialize_str(&format_datetime(d)),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn deserialize_opt_date<'de, D>(
    deserializer: D,
) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) => parse_datetime(&text).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

//! Temporal Qualifiers
//!
//! Inputs and waits can be restricted in time (`when`) and pointed at a
//! different cycle point (`target_cycle`). Both are evaluated by one
//! routine, [`TemporalSpec::resolve`], which turns the current cycle date
//! into the list of referenced dates, or reports that the reference is
//! inactive for this cycle point.
//!
//! # Example YAML Format
//!
//! ```yaml
//! inputs:
//!   - initial_conditions:
//!       when:
//!         at: 2026-01-01T00:00
//!   - icon_restart:
//!       when:
//!         after: 2026-01-01T00:00
//!       target_cycle:
//!         lag: -P2M
//! ```

use chrono::NaiveDateTime;
use serde::de::{self, Deserializer};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::calendar::{format_datetime, parse_datetime, Duration};
use crate::error::ConfigError;

/// Guard deciding whether a reference is active at a cycle date.
///
/// Guards always look at the date of the cycle point being expanded, never
/// at the referenced (lagged) date.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum When {
    #[default]
    Always,
    /// Active only at exactly this date.
    At(NaiveDateTime),
    /// Active strictly before `before` and strictly after `after`.
    Window {
        before: Option<NaiveDateTime>,
        after: Option<NaiveDateTime>,
    },
}

impl When {
    pub fn is_always(&self) -> bool {
        matches!(self, When::Always)
    }

    pub fn is_active(&self, date: &NaiveDateTime) -> bool {
        match self {
            When::Always => true,
            When::At(at) => date == at,
            When::Window { before, after } => {
                before.map_or(true, |b| *date < b) && after.map_or(true, |a| *date > a)
            }
        }
    }
}

/// Which cycle point(s) a reference points at.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TargetCycle {
    /// The cycle point being expanded.
    #[default]
    Current,
    /// Current date offset by each lag (negative lags look back).
    Lags(Vec<Duration>),
    /// Fixed dates, independent of the current cycle point.
    Dates(Vec<NaiveDateTime>),
}

/// `when` + `target_cycle` of one input or wait.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalSpec {
    #[serde(default, skip_serializing_if = "When::is_always")]
    pub when: When,
    #[serde(default, skip_serializing_if = "TargetCycle::is_current")]
    pub target_cycle: TargetCycle,
}

/// Result of evaluating a [`TemporalSpec`] at one cycle point.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The guard is not met; the edge is omitted for this cycle point.
    Inactive,
    /// Reference without any date (one-off cycle, current target).
    Undated,
    /// Referenced dates, in declaration order.
    Dates(Vec<NaiveDateTime>),
}

/// Names used to report a misused qualifier.
#[derive(Debug, Clone, Copy)]
pub struct RefSite<'a> {
    pub task: &'a str,
    pub cycle: &'a str,
    pub target: &'a str,
}

impl TargetCycle {
    pub fn is_current(&self) -> bool {
        matches!(self, TargetCycle::Current)
    }
}

impl TemporalSpec {
    pub fn new(when: When, target_cycle: TargetCycle) -> Self {
        Self { when, target_cycle }
    }

    pub fn lag(lag: Duration) -> Self {
        Self::new(When::Always, TargetCycle::Lags(vec![lag]))
    }

    /// Evaluates the guard and computes the referenced dates.
    ///
    /// In a one-off cycle (`current` is `None`) only an unconditional
    /// reference, optionally with fixed dates, is allowed.
    pub fn resolve(
        &self,
        current: Option<NaiveDateTime>,
        site: RefSite<'_>,
    ) -> Result<Resolution, ConfigError> {
        let Some(current) = current else {
            return match (&self.when, &self.target_cycle) {
                (When::Always, TargetCycle::Current) => Ok(Resolution::Undated),
                (When::Always, TargetCycle::Dates(dates)) => Ok(Resolution::Dates(dates.clone())),
                _ => Err(ConfigError::TemporalInUndatedCycle {
                    task: site.task.to_string(),
                    cycle: site.cycle.to_string(),
                    target: site.target.to_string(),
                }),
            };
        };

        if !self.when.is_active(&current) {
            return Ok(Resolution::Inactive);
        }

        let dates = match &self.target_cycle {
            TargetCycle::Current => vec![current],
            TargetCycle::Lags(lags) => lags
                .iter()
                .map(|lag| lag.add_to(current))
                .collect::<Result<Vec<_>, _>>()?,
            TargetCycle::Dates(dates) => dates.clone(),
        };
        Ok(Resolution::Dates(dates))
    }
}

fn expect_date(value: &Value, key: &str) -> Result<NaiveDateTime, String> {
    match value {
        Value::String(s) => parse_datetime(s).map_err(|e| e.to_string()),
        _ => Err(format!("'{}' must be a date string", key)),
    }
}

fn single_or_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(arr) => arr,
        other => vec![other],
    }
}

impl<'de> Deserialize<'de> for When {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;

        if let Some(key) = map.keys().find(|k| !matches!(k.as_str(), "at" | "before" | "after")) {
            return Err(de::Error::custom(format!(
                "when keys can only be 'at', 'before' or 'after', got '{}'",
                key
            )));
        }

        if let Some(at) = map.get("at") {
            if map.len() > 1 {
                return Err(de::Error::custom(
                    "'at' is incompatible with 'before' and 'after'",
                ));
            }
            return expect_date(at, "at").map(When::At).map_err(de::Error::custom);
        }

        let before = map
            .get("before")
            .map(|v| expect_date(v, "before"))
            .transpose()
            .map_err(de::Error::custom)?;
        let after = map
            .get("after")
            .map(|v| expect_date(v, "after"))
            .transpose()
            .map_err(de::Error::custom)?;

        Ok(match (before, after) {
            (None, None) => When::Always,
            (before, after) => When::Window { before, after },
        })
    }
}

impl Serialize for When {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            When::Always => {}
            When::At(at) => map.serialize_entry("at", &format_datetime(at))?,
            When::Window { before, after } => {
                if let Some(before) = before {
                    map.serialize_entry("before", &format_datetime(before))?;
                }
                if let Some(after) = after {
                    map.serialize_entry("after", &format_datetime(after))?;
                }
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TargetCycle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = Map::<String, Value>::deserialize(deserializer)?;

        if map.len() != 1 {
            return Err(de::Error::custom(
                "target_cycle takes exactly one of 'lag' or 'date'",
            ));
        }

        if let Some(lags) = map.remove("lag") {
            return single_or_list(lags)
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Duration::parse(&s).map_err(de::Error::custom),
                    _ => Err(de::Error::custom("lag must be an ISO-8601 duration string")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(TargetCycle::Lags);
        }

        if let Some(dates) = map.remove("date") {
            return single_or_list(dates)
                .iter()
                .map(|v| expect_date(v, "date").map_err(de::Error::custom))
                .collect::<Result<Vec<_>, _>>()
                .map(TargetCycle::Dates);
        }

        Err(de::Error::custom("target_cycle key can only be 'lag' or 'date'"))
    }
}

impl Serialize for TargetCycle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            TargetCycle::Current => {}
            TargetCycle::Lags(lags) => map.serialize_entry("lag", lags)?,
            TargetCycle::Dates(dates) => {
                let dates: Vec<String> = dates.iter().map(format_datetime).collect();
                map.serialize_entry("date", &dates)?
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> NaiveDateTime {
        parse_datetime(text).unwrap()
    }

    fn site() -> RefSite<'static> {
        RefSite {
            task: "icon",
            cycle: "bimonthly",
            target: "icon_restart",
        }
    }

    #[test]
    fn test_always_resolves_to_current() {
        let spec = TemporalSpec::default();
        assert_eq!(
            spec.resolve(Some(at("2026-03-01")), site()).unwrap(),
            Resolution::Dates(vec![at("2026-03-01")])
        );
        assert_eq!(spec.resolve(None, site()).unwrap(), Resolution::Undated);
    }

    #[test]
    fn test_at_guard() {
        let spec = TemporalSpec::new(When::At(at("2026-01-01")), TargetCycle::Current);
        assert_eq!(
            spec.resolve(Some(at("2026-01-01")), site()).unwrap(),
            Resolution::Dates(vec![at("2026-01-01")])
        );
        assert_eq!(
            spec.resolve(Some(at("2026-03-01")), site()).unwrap(),
            Resolution::Inactive
        );
    }

    #[test]
    fn test_after_guard_uses_current_date_not_lagged_date() {
        let spec = TemporalSpec::new(
            When::Window {
                before: None,
                after: Some(at("2026-01-01")),
            },
            TargetCycle::Lags(vec![Duration::months(-2)]),
        );
        assert_eq!(
            spec.resolve(Some(at("2026-01-01")), site()).unwrap(),
            Resolution::Inactive
        );
        assert_eq!(
            spec.resolve(Some(at("2026-03-01")), site()).unwrap(),
            Resolution::Dates(vec![at("2026-01-01")])
        );
    }

    #[test]
    fn test_before_and_after_window() {
        let when = When::Window {
            before: Some(at("2026-07-01")),
            after: Some(at("2026-01-01")),
        };
        assert!(!when.is_active(&at("2026-01-01")));
        assert!(when.is_active(&at("2026-03-01")));
        assert!(!when.is_active(&at("2026-07-01")));
    }

    #[test]
    fn test_multiple_lags_fan_out() {
        let spec = TemporalSpec::new(
            When::Always,
            TargetCycle::Lags(vec![Duration::months(-2), Duration::months(-4)]),
        );
        assert_eq!(
            spec.resolve(Some(at("2026-05-01")), site()).unwrap(),
            Resolution::Dates(vec![at("2026-03-01"), at("2026-01-01")])
        );
    }

    #[test]
    fn test_undated_cycle_rejects_guards_and_lags() {
        let guarded = TemporalSpec::new(When::At(at("2026-01-01")), TargetCycle::Current);
        assert!(matches!(
            guarded.resolve(None, site()),
            Err(ConfigError::TemporalInUndatedCycle { .. })
        ));
        assert!(TemporalSpec::lag(Duration::months(-1))
            .resolve(None, site())
            .is_err());

        let fixed = TemporalSpec::new(When::Always, TargetCycle::Dates(vec![at("2026-01-01")]));
        assert_eq!(
            fixed.resolve(None, site()).unwrap(),
            Resolution::Dates(vec![at("2026-01-01")])
        );
    }

    #[test]
    fn test_deserialize_yaml_forms() {
        let spec: TemporalSpec = serde_yaml::from_str(
            "when:\n  after: 2026-01-01T00:00\ntarget_cycle:\n  lag: -P2M\n",
        )
        .unwrap();
        assert_eq!(
            spec.when,
            When::Window {
                before: None,
                after: Some(at("2026-01-01"))
            }
        );
        assert_eq!(spec.target_cycle, TargetCycle::Lags(vec![Duration::months(-2)]));

        let dates: TargetCycle =
            serde_yaml::from_str("date: [2026-01-01, 2026-03-01]").unwrap();
        assert_eq!(
            dates,
            TargetCycle::Dates(vec![at("2026-01-01"), at("2026-03-01")])
        );
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        assert!(serde_yaml::from_str::<When>("at: 2026-01-01\nafter: 2026-01-01").is_err());
        assert!(serde_yaml::from_str::<When>("during: 2026-01-01").is_err());
        assert!(serde_yaml::from_str::<TargetCycle>("lag: -P1M\ndate: 2026-01-01").is_err());
        assert!(serde_yaml::from_str::<TargetCycle>("lag: yesterday").is_err());
    }
}

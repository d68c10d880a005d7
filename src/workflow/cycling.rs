//! Cycle Expansion
//!
//! Walks a cycle's start/stop/period and yields its concrete cycle points
//! in chronological order. Three shapes are supported:
//!
//! - periodic: `start_date`, `stop_date` and `period`
//! - one-off dated: `start_date` only, a single point
//! - one-off undated: no dates, a single point without a date
//!
//! A periodic cycle with missing dates takes them from the workflow
//! horizon, when one is declared.

use chrono::NaiveDateTime;
use log::debug;
use serde::Serialize;

use super::model::{Boundary, CycleConfig};
use crate::calendar::date::serialize_opt_date;
use crate::calendar::format_datetime;
use crate::error::ConfigError;

/// A declared start/stop window; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Horizon {
    pub start: Option<NaiveDateTime>,
    pub stop: Option<NaiveDateTime>,
}

impl Horizon {
    pub fn new(start: Option<NaiveDateTime>, stop: Option<NaiveDateTime>) -> Self {
        Self { start, stop }
    }

    pub fn contains(&self, date: &NaiveDateTime) -> bool {
        self.start.map_or(true, |s| *date >= s) && self.stop.map_or(true, |s| *date <= s)
    }

    fn clamp(&self, date: NaiveDateTime) -> NaiveDateTime {
        let date = self.start.map_or(date, |s| date.max(s));
        self.stop.map_or(date, |s| date.min(s))
    }
}

/// One concrete occurrence of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CyclePoint {
    pub cycle: String,
    /// Position within the cycle, starting at 0
    pub index: usize,
    /// Chunk begin; `None` for one-off undated cycles
    #[serde(serialize_with = "serialize_opt_date")]
    pub date: Option<NaiveDateTime>,
    /// `min(date + period, stop)`
    #[serde(serialize_with = "serialize_opt_date")]
    pub end_date: Option<NaiveDateTime>,
}

/// Expands a cycle into its points, dropping any that fall outside `horizon`.
///
/// # Errors
///
/// - stop date before start date
/// - zero, negative or mixed-sign period
/// - a period or stop date without a start date (and no horizon to fill it)
/// - a periodic cycle without a stop date (and no horizon to fill it)
pub fn expand(cycle: &CycleConfig, horizon: &Horizon) -> Result<Vec<CyclePoint>, ConfigError> {
    let incomplete = |reason: &str| ConfigError::IncompleteCycling {
        cycle: cycle.name.clone(),
        reason: reason.to_string(),
    };

    let Some(period) = cycle.period else {
        return match (cycle.start_date, cycle.stop_date) {
            (None, None) => {
                debug!("Cycle '{}': one-off, undated", cycle.name);
                Ok(vec![point(cycle, 0, None, None)])
            }
            (Some(start), None) => {
                let date = horizon.clamp(start);
                debug!("Cycle '{}': one-off at {}", cycle.name, format_datetime(&date));
                Ok(vec![point(cycle, 0, Some(date), None)])
            }
            (_, Some(_)) => Err(incomplete("stop_date requires a period")),
        };
    };

    if !period.is_positive() {
        return Err(ConfigError::NonPositivePeriod {
            cycle: cycle.name.clone(),
            period: period.to_string(),
        });
    }

    let start = cycle
        .start_date
        .or(horizon.start)
        .ok_or_else(|| incomplete("a period requires a start_date"))?;
    let stop = cycle
        .stop_date
        .or(horizon.stop)
        .ok_or_else(|| incomplete("a period requires a stop_date"))?;

    if stop < start {
        return Err(ConfigError::StopBeforeStart {
            cycle: cycle.name.clone(),
            start: format_datetime(&start),
            stop: format_datetime(&stop),
        });
    }

    let mut points = Vec::new();
    let mut date = start;
    loop {
        let in_range = match cycle.boundary {
            Boundary::Inclusive => date <= stop,
            Boundary::Exclusive => date < stop,
        };
        if !in_range {
            break;
        }

        let next = period.add_to(date)?;
        if horizon.contains(&date) {
            let end = next.min(stop);
            debug!(
                "Cycle '{}' point {}: {} .. {}",
                cycle.name,
                points.len(),
                format_datetime(&date),
                format_datetime(&end)
            );
            points.push(point(cycle, points.len(), Some(date), Some(end)));
        }
        date = next;
    }

    Ok(points)
}

fn point(
    cycle: &CycleConfig,
    index: usize,
    date: Option<NaiveDateTime>,
    end_date: Option<NaiveDateTime>,
) -> CyclePoint {
    CyclePoint {
        cycle: cycle.name.clone(),
        index,
        date,
        end_date,
    }
}

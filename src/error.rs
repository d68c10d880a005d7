//! Error Types
//!
//! Configuration errors abort a compilation and carry enough context
//! (template name, cycle date, offending field) to fix the source file.
//! Structural problems in an assembled graph are not errors; they are
//! reported as [`crate::graph::Finding`] values by the validator.

use std::io;

use chrono::NaiveDateTime;
use thiserror::Error;

/// Formats an optional cycle date for error messages.
pub(crate) fn describe_date(date: &Option<NaiveDateTime>) -> String {
    match date {
        Some(d) => d.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => "<undated>".to_string(),
    }
}

/// Errors detected while turning templates into a graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid ISO-8601 duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("Invalid date '{value}': expected YYYY-MM-DD[THH:MM[:SS]]")]
    InvalidDate { value: String },

    #[error("Date arithmetic overflow: {date} + {duration}")]
    CalendarOverflow { date: String, duration: String },

    #[error("Cycle '{cycle}': stop date {stop} precedes start date {start}")]
    StopBeforeStart {
        cycle: String,
        start: String,
        stop: String,
    },

    #[error("Workflow '{workflow}': horizon stop date {stop} precedes start date {start}")]
    HorizonStopBeforeStart {
        workflow: String,
        start: String,
        stop: String,
    },

    #[error("Cycle '{cycle}': period {period} is zero or negative")]
    NonPositivePeriod { cycle: String, period: String },

    #[error("Cycle '{cycle}': {reason}")]
    IncompleteCycling { cycle: String, reason: String },

    #[error("Duplicate {kind} name: '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Cycle '{cycle}' references unknown task '{task}'")]
    UnknownTask { cycle: String, task: String },

    #[error("Task '{task}' references unknown data '{data}'")]
    UnknownData { task: String, data: String },

    #[error("{owner} '{name}' spans parameter '{parameter}' which is not declared in the parameters section")]
    UndeclaredParameter {
        owner: &'static str,
        name: String,
        parameter: String,
    },

    #[error("Parameter '{parameter}': value {value} is not among its declared values")]
    UnknownParameterValue { parameter: String, value: String },

    #[error("Parameter '{parameter}': values must be a list of scalars ({reason})")]
    InvalidParameterValues { parameter: String, reason: String },

    #[error("Task '{task}' references '{target}' with parameter '{parameter}': {reason}")]
    InvalidParameterReference {
        task: String,
        target: String,
        parameter: String,
        reason: String,
    },

    #[error("Task '{task}' consumes generated data '{data}' which no task lists as output")]
    NeverProduced { task: String, data: String },

    #[error("Task '{task}' lists available data '{data}' as output")]
    OutputIsAvailable { task: String, data: String },

    #[error("Task '{task}' references '{target}' by date or lag but '{target}' is undated")]
    DateOnUndatedTarget { task: String, target: String },

    #[error("Task '{task}' in one-off cycle '{cycle}' needs an explicit date to reference dated '{target}'")]
    MissingDateReference {
        task: String,
        cycle: String,
        target: String,
    },

    #[error("Task '{task}' in one-off cycle '{cycle}' uses a date guard or lag on '{target}'")]
    TemporalInUndatedCycle {
        task: String,
        cycle: String,
        target: String,
    },

    #[error("Task '{task}' at {date} references '{target}' at {referenced}, outside the horizon [{horizon_start} .. {horizon_stop}]")]
    OutsideHorizon {
        task: String,
        date: String,
        target: String,
        referenced: String,
        horizon_start: String,
        horizon_stop: String,
    },

    #[error("Task '{task}' at {date} waits on '{target}' at {referenced} which does not exist")]
    UnresolvedWaitOn {
        task: String,
        date: String,
        target: String,
        referenced: String,
    },

    #[error("Task '{task}' is reserved for defaults and cannot be used in cycle '{cycle}'")]
    ReservedTask { task: String, cycle: String },

    #[error("Workflow defines no {0}")]
    Empty(&'static str),
}

/// Errors raised while loading a workflow file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read workflow file '{path}': {source}. Check that the file exists and is readable.")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse workflow YAML: {0}. Check the file format.")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

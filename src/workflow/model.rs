//! Workflow Configuration Model
//!
//! Declarative templates as written in a workflow file: parameters, cycles,
//! task templates and data templates. These are parsed once and never
//! mutated by the graph assembler.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: icon_ensemble
//! parameters:
//!   foo: [0, 1]
//!   bar: [3.0]
//! cycles:
//!   - bimonthly:
//!       start_date: 2026-01-01T00:00
//!       stop_date: 2026-07-01T00:00
//!       period: P2M
//!       tasks:
//!         - icon:
//!             inputs:
//!               - initial_conditions:
//!                   when:
//!                     at: 2026-01-01T00:00
//!               - icon_restart:
//!                   when:
//!                     after: 2026-01-01T00:00
//!                   target_cycle:
//!                     lag: -P2M
//!             outputs: [icon_output, icon_restart]
//! tasks:
//!   - icon:
//!       plugin: icon
//!       parameters: [foo, bar]
//! data:
//!   available:
//!     - initial_conditions:
//!         parameters: [foo]
//!   generated:
//!     - icon_output:
//!         parameters: [foo, bar]
//!     - icon_restart:
//!         parameters: [foo, bar]
//! ```
//!
//! Every named list accepts three spellings for an item: `- icon`,
//! `- icon: {...}` and `- name: icon`.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::parameters::{ParamRef, ParamValue};
use super::temporal::{TargetCycle, TemporalSpec, When};
use crate::calendar::date::{deserialize_opt_date, serialize_opt_date};
use crate::calendar::Duration;

/// Name of the task whose settings every other task inherits.
pub const ROOT_TASK: &str = "ROOT";

/// Complete workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkflowConfig {
    /// Workflow name (defaults to the file stem when loaded from disk)
    #[serde(default)]
    pub name: String,

    /// Optional horizon start; cycles without dates inherit it
    #[serde(
        default,
        deserialize_with = "deserialize_opt_date",
        serialize_with = "serialize_opt_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<NaiveDateTime>,

    /// Optional horizon stop
    #[serde(
        default,
        alias = "end_date",
        deserialize_with = "deserialize_opt_date",
        serialize_with = "serialize_opt_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_date: Option<NaiveDateTime>,

    /// Parameter dimensions, in declaration order
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, Vec<ParamValue>>,

    #[serde(deserialize_with = "named_list", default)]
    pub cycles: Vec<CycleConfig>,

    #[serde(deserialize_with = "named_list", default)]
    pub tasks: Vec<TaskConfig>,

    #[serde(default)]
    pub data: DataConfig,
}

/// Whether the stop date itself can be a cycle point.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Points up to and including the stop date.
    #[default]
    Inclusive,
    /// Points strictly before the stop date.
    Exclusive,
}

/// A cycle template: when its tasks run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub name: String,

    #[serde(
        default,
        deserialize_with = "deserialize_opt_date",
        serialize_with = "serialize_opt_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<NaiveDateTime>,

    #[serde(
        default,
        alias = "end_date",
        deserialize_with = "deserialize_opt_date",
        serialize_with = "serialize_opt_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_date: Option<NaiveDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Duration>,

    #[serde(default, skip_serializing_if = "is_inclusive")]
    pub boundary: Boundary,

    #[serde(deserialize_with = "named_list", default)]
    pub tasks: Vec<CycleTaskConfig>,
}

fn is_inclusive(boundary: &Boundary) -> bool {
    *boundary == Boundary::Inclusive
}

/// A task attached to a cycle, with optional per-cycle bindings.
///
/// Bindings left out fall back to the task template's own.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CycleTaskConfig {
    pub name: String,

    #[serde(default, deserialize_with = "opt_named_list", skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<TargetRef>>,

    #[serde(default, deserialize_with = "opt_named_list", skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<OutputConfig>>,

    #[serde(default, deserialize_with = "opt_named_list", skip_serializing_if = "Option::is_none")]
    pub wait_on: Option<Vec<TargetRef>>,
}

/// Reference from a task to data (input) or to another task (wait_on).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TargetRef {
    pub name: String,

    #[serde(flatten)]
    pub temporal: TemporalSpec,

    /// Per-dimension selection overrides
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, ParamRef>,

    /// Opaque port label kept on the input edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// Data produced by a task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// A task template.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskConfig {
    pub name: String,

    /// Opaque kind of task, passed through to the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    /// Parameter dimensions the task spans
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,

    #[serde(default, deserialize_with = "opt_named_list", skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<TargetRef>>,

    #[serde(default, deserialize_with = "opt_named_list", skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<OutputConfig>>,

    #[serde(default, deserialize_with = "opt_named_list", skip_serializing_if = "Option::is_none")]
    pub wait_on: Option<Vec<TargetRef>>,

    /// Everything else (command, namelists, computer, ...), never inspected
    #[serde(flatten)]
    pub options: IndexMap<String, Value>,
}

/// Available and generated data templates.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DataConfig {
    #[serde(deserialize_with = "named_list", default, skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<DataItemConfig>,

    #[serde(deserialize_with = "named_list", default, skip_serializing_if = "Vec::is_empty")]
    pub generated: Vec<DataItemConfig>,
}

/// A data template.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataItemConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,

    /// Path, computer, format, ...: passed through untouched
    #[serde(flatten)]
    pub options: IndexMap<String, Value>,
}

/// Rewrites `icon`, `{icon: {...}}` and `{icon: null}` into `{name: icon, ...}`.
fn merge_name_key(item: Value) -> Result<Value, String> {
    match item {
        Value::String(name) => {
            let mut map = Map::new();
            map.insert("name".to_string(), Value::String(name));
            Ok(Value::Object(map))
        }
        Value::Object(map) if map.len() == 1 && !map.contains_key("name") => {
            let Some((key, value)) = map.into_iter().next() else {
                return Err("Expected a named item".to_string());
            };
            let mut merged = Map::new();
            merged.insert("name".to_string(), Value::String(key.clone()));
            match value {
                Value::Null => {}
                Value::Object(inner) => {
                    if inner.contains_key("name") {
                        return Err(format!("Item '{}' also sets a 'name' key", key));
                    }
                    merged.extend(inner);
                }
                other => {
                    return Err(format!(
                        "Expected a mapping under '{}', not a value (got {})",
                        key, other
                    ))
                }
            }
            Ok(Value::Object(merged))
        }
        Value::Object(map) => Ok(Value::Object(map)),
        other => Err(format!("Expected a name or a mapping, got {}", other)),
    }
}

/// Deserializes a list of named items, accepting the name-as-key shorthand.
fn named_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                let item = merge_name_key(item).map_err(de::Error::custom)?;
                serde_json::from_value(item).map_err(de::Error::custom)
            })
            .collect(),
        single @ (Value::String(_) | Value::Object(_)) => {
            let item = merge_name_key(single).map_err(de::Error::custom)?;
            Ok(vec![serde_json::from_value(item).map_err(de::Error::custom)?])
        }
        _ => Err(de::Error::custom("Expected a list of named items")),
    }
}

fn opt_named_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    named_list(deserializer).map(Some)
}

impl WorkflowConfig {
    /// Creates an empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares a parameter dimension.
    pub fn with_parameter(mut self, name: impl Into<String>, values: Vec<ParamValue>) -> Self {
        self.parameters.insert(name.into(), values);
        self
    }

    pub fn with_cycle(mut self, cycle: CycleConfig) -> Self {
        self.cycles.push(cycle);
        self
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_available(mut self, data: DataItemConfig) -> Self {
        self.data.available.push(data);
        self
    }

    pub fn with_generated(mut self, data: DataItemConfig) -> Self {
        self.data.generated.push(data);
        self
    }

    /// Sets the workflow horizon.
    pub fn with_horizon(mut self, start: NaiveDateTime, stop: NaiveDateTime) -> Self {
        self.start_date = Some(start);
        self.stop_date = Some(stop);
        self
    }

    pub fn get_task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn get_cycle(&self, name: &str) -> Option<&CycleConfig> {
        self.cycles.iter().find(|c| c.name == name)
    }

    /// Looks a data template up in both sections; `true` means available.
    pub fn get_data(&self, name: &str) -> Option<(&DataItemConfig, bool)> {
        self.data
            .available
            .iter()
            .find(|d| d.name == name)
            .map(|d| (d, true))
            .or_else(|| {
                self.data
                    .generated
                    .iter()
                    .find(|d| d.name == name)
                    .map(|d| (d, false))
            })
    }
}

impl CycleConfig {
    /// A one-off cycle without dates.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_date: None,
            stop_date: None,
            period: None,
            boundary: Boundary::Inclusive,
            tasks: Vec::new(),
        }
    }

    /// Sets start, stop and period.
    pub fn dated(mut self, start: NaiveDateTime, stop: NaiveDateTime, period: Duration) -> Self {
        self.start_date = Some(start);
        self.stop_date = Some(stop);
        self.period = Some(period);
        self
    }

    /// A single dated occurrence.
    pub fn at(mut self, start: NaiveDateTime) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_task(mut self, task: CycleTaskConfig) -> Self {
        self.tasks.push(task);
        self
    }
}

impl CycleTaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: None,
            outputs: None,
            wait_on: None,
        }
    }

    pub fn with_input(mut self, input: TargetRef) -> Self {
        self.inputs.get_or_insert_with(Vec::new).push(input);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs
            .get_or_insert_with(Vec::new)
            .push(OutputConfig::new(name));
        self
    }

    pub fn waits_on(mut self, target: TargetRef) -> Self {
        self.wait_on.get_or_insert_with(Vec::new).push(target);
        self
    }

    /// Inputs of this occurrence, falling back to the template's.
    pub fn effective_inputs<'a>(&'a self, template: &'a TaskConfig) -> &'a [TargetRef] {
        self.inputs
            .as_deref()
            .or(template.inputs.as_deref())
            .unwrap_or(&[])
    }

    pub fn effective_outputs<'a>(&'a self, template: &'a TaskConfig) -> &'a [OutputConfig] {
        self.outputs
            .as_deref()
            .or(template.outputs.as_deref())
            .unwrap_or(&[])
    }

    pub fn effective_wait_on<'a>(&'a self, template: &'a TaskConfig) -> &'a [TargetRef] {
        self.wait_on
            .as_deref()
            .or(template.wait_on.as_deref())
            .unwrap_or(&[])
    }
}

impl TargetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temporal: TemporalSpec::default(),
            parameters: IndexMap::new(),
            port: None,
        }
    }

    pub fn when(mut self, when: When) -> Self {
        self.temporal.when = when;
        self
    }

    pub fn lag(mut self, lag: Duration) -> Self {
        self.temporal.target_cycle = TargetCycle::Lags(vec![lag]);
        self
    }

    pub fn on_dates(mut self, dates: Vec<NaiveDateTime>) -> Self {
        self.temporal.target_cycle = TargetCycle::Dates(dates);
        self
    }

    pub fn with_param(mut self, dimension: impl Into<String>, selection: ParamRef) -> Self {
        self.parameters.insert(dimension.into(), selection);
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }
}

impl OutputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: None,
        }
    }
}

impl TaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: None,
            parameters: Vec::new(),
            inputs: None,
            outputs: None,
            wait_on: None,
            options: IndexMap::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_parameters(mut self, dimensions: &[&str]) -> Self {
        self.parameters = dimensions.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

impl DataItemConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            options: IndexMap::new(),
        }
    }

    pub fn with_parameters(mut self, dimensions: &[&str]) -> Self {
        self.parameters = dimensions.iter().map(|d| d.to_string()).collect();
        self
    }
}

//! Parameter Dimensions and Cartesian Expansion
//!
//! A [`ParameterSpace`] maps dimension names (ensemble member, resolution,
//! ...) to ordered, deduplicated value lists. Templates span a subset of
//! the dimensions and are expanded into one [`Assignment`] per point of
//! the Cartesian product:
//!
//! - dimensions vary in declaration order, first declared is outermost
//! - values vary in their declared order
//!
//! When a consumer references a producer spanning different dimensions,
//! [`ParameterSpace::select`] resolves which producer instances it gets:
//! dimensions shared with the consumer pick the consumer's own value
//! (`single`), dimensions the consumer does not span fan in over every
//! value (`all`). A producer spanning fewer dimensions than the consumer is
//! broadcast: every consumer instance maps to the same producer instance.

use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use log::debug;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::ConfigError;

/// A scalar parameter value.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Converts a JSON/YAML scalar into a parameter value.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Int(i)),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| format!("unsupported number {}", n)),
            },
            Value::String(s) => Ok(Self::Str(s.clone())),
            other => Err(format!("expected a scalar, got {}", other)),
        }
    }

    /// Equality that also lets `3` match `3.0`.
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(i), Self::Float(x)) | (Self::Float(x), Self::Int(i)) => *i as f64 == *x,
            _ => self == other,
        }
    }
}

// Floats compare by bit pattern so values can key the node lookup.
impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let val = Value::deserialize(deserializer)?;
        Self::from_json(&val).map_err(de::Error::custom)
    }
}

/// One value per spanned dimension, in parameter declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Assignment(Vec<(String, ParamValue)>);

impl Assignment {
    /// The assignment of a template spanning no dimensions.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, dimension: &str) -> Option<&ParamValue> {
        self.0
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Projects onto `dimensions`, dropping every other dimension.
    pub fn narrow(&self, dimensions: &[String]) -> Assignment {
        Assignment(
            self.0
                .iter()
                .filter(|(name, _)| dimensions.contains(name))
                .cloned()
                .collect(),
        )
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl Serialize for Assignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

/// How a reference selects values along one dimension of its target.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamRef {
    /// The consumer's own value for this dimension.
    Single,
    /// Every declared value (fan-in).
    All,
    /// One fixed declared value.
    Value(ParamValue),
}

impl Serialize for ParamRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Single => serializer.serialize_str("single"),
            Self::All => serializer.serialize_str("all"),
            Self::Value(v) => serializer.collect_map([("value", v)]),
        }
    }
}

impl<'de> Deserialize<'de> for ParamRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let val = Value::deserialize(deserializer)?;
        match val {
            Value::String(s) if s == "single" => Ok(Self::Single),
            Value::String(s) if s == "all" => Ok(Self::All),
            Value::Object(map) if map.len() == 1 && map.contains_key("value") => {
                let value = ParamValue::from_json(&map["value"]).map_err(de::Error::custom)?;
                Ok(Self::Value(value))
            }
            other => Err(de::Error::custom(format!(
                "parameter reference must be 'single', 'all' or {{value: X}}, got {}",
                other
            ))),
        }
    }
}

/// Named dimensions with their ordered value sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterSpace {
    dimensions: IndexMap<String, Vec<ParamValue>>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a space from declared dimensions, keeping declaration order.
    pub fn from_declarations(
        declarations: &IndexMap<String, Vec<ParamValue>>,
    ) -> Result<Self, ConfigError> {
        let mut space = Self::new();
        for (name, values) in declarations {
            space.add_dimension(name, values.clone())?;
        }
        Ok(space)
    }

    /// Declares a dimension. Duplicate values are dropped, first one wins.
    pub fn add_dimension(
        &mut self,
        name: impl Into<String>,
        values: Vec<ParamValue>,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.dimensions.contains_key(&name) {
            return Err(ConfigError::DuplicateName {
                kind: "parameter",
                name,
            });
        }
        if values.is_empty() {
            return Err(ConfigError::InvalidParameterValues {
                parameter: name,
                reason: "at least one value is required".to_string(),
            });
        }

        let mut unique: Vec<ParamValue> = Vec::with_capacity(values.len());
        for value in values {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        self.dimensions.insert(name, unique);
        Ok(())
    }

    pub fn contains(&self, dimension: &str) -> bool {
        self.dimensions.contains_key(dimension)
    }

    pub fn values(&self, dimension: &str) -> Option<&[ParamValue]> {
        self.dimensions.get(dimension).map(|v| v.as_slice())
    }

    pub fn is_declared_value(&self, dimension: &str, value: &ParamValue) -> bool {
        self.values(dimension)
            .map(|values| values.contains(value))
            .unwrap_or(false)
    }

    /// The declared value `value` stands for, accepting `3` for `3.0`.
    pub fn declared_value(&self, dimension: &str, value: &ParamValue) -> Option<&ParamValue> {
        let values = self.values(dimension)?;
        values
            .iter()
            .find(|v| *v == value)
            .or_else(|| values.iter().find(|v| v.matches(value)))
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Reorders `subset` into declaration order. Fails on the first
    /// undeclared dimension, returning its name.
    pub fn canonical(&self, subset: &[String]) -> Result<Vec<String>, String> {
        if let Some(unknown) = subset.iter().find(|d| !self.contains(d)) {
            return Err(unknown.clone());
        }
        Ok(self
            .dimensions
            .keys()
            .filter(|name| subset.contains(name))
            .cloned()
            .collect())
    }

    /// Full Cartesian product over `subset`.
    ///
    /// An empty subset yields exactly one empty assignment (a singleton).
    pub fn expand(&self, subset: &[String]) -> Result<Vec<Assignment>, String> {
        let axes: Vec<(String, Vec<ParamValue>)> = self
            .canonical(subset)?
            .into_iter()
            .map(|name| {
                let values = self.dimensions[&name].clone();
                (name, values)
            })
            .collect();
        Ok(cartesian(&axes))
    }

    /// Resolves which instances of `target` (spanning `target_dims`) one
    /// consumer instance references.
    ///
    /// `refs` overrides the default selection per dimension: `single` when
    /// the consumer spans the dimension, `all` otherwise.
    pub fn select(
        &self,
        consumer: &Assignment,
        consumer_name: &str,
        target_name: &str,
        target_dims: &[String],
        refs: &IndexMap<String, ParamRef>,
    ) -> Result<Vec<Assignment>, ConfigError> {
        let invalid = |parameter: &str, reason: String| ConfigError::InvalidParameterReference {
            task: consumer_name.to_string(),
            target: target_name.to_string(),
            parameter: parameter.to_string(),
            reason,
        };

        if let Some(extra) = refs.keys().find(|d| !target_dims.contains(d)) {
            return Err(invalid(extra.as_str(), "the target does not span this dimension".to_string()));
        }

        let target_dims = self
            .canonical(target_dims)
            .map_err(|d| invalid(d.as_str(), "dimension is not declared".to_string()))?;

        let mut axes = Vec::with_capacity(target_dims.len());
        for dim in target_dims {
            let selection = refs.get(&dim).cloned().unwrap_or(match consumer.get(&dim) {
                Some(_) => ParamRef::Single,
                None => ParamRef::All,
            });

            let values = match selection {
                ParamRef::Single => match consumer.get(&dim) {
                    Some(value) => vec![value.clone()],
                    None => {
                        return Err(invalid(
                            dim.as_str(),
                            "'single' requires the consumer to span this dimension".to_string(),
                        ))
                    }
                },
                ParamRef::All => self.dimensions[&dim].clone(),
                ParamRef::Value(value) => match self.declared_value(&dim, &value) {
                    Some(declared) => vec![declared.clone()],
                    None => {
                        return Err(ConfigError::UnknownParameterValue {
                            parameter: dim,
                            value: value.to_string(),
                        })
                    }
                },
            };
            axes.push((dim, values));
        }

        let selected = cartesian(&axes);
        debug!(
            "'{}' [{}] -> '{}': {} instance(s)",
            consumer_name,
            consumer,
            target_name,
            selected.len()
        );
        Ok(selected)
    }
}

/// Cartesian product, first axis outermost.
fn cartesian(axes: &[(String, Vec<ParamValue>)]) -> Vec<Assignment> {
    let mut product: Vec<Vec<(String, ParamValue)>> = vec![Vec::new()];

    for (name, values) in axes {
        product = product
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |value| {
                    let mut next = prefix.clone();
                    next.push((name.clone(), value.clone()));
                    next
                })
            })
            .collect();
    }

    product.into_iter().map(Assignment).collect()
}

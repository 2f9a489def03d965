//! Memoizing evaluator for named metrics with declared dependencies.
//!
//! Each metric has a [`MetricKind`], a function and the names it depends on.
//! [`Evaluator::compute`] resolves dependencies depth-first, computes each
//! metric at most once and stores results by name. Rolling metrics also store
//! their dates under `<name>_dates`, bucketed metrics their labels under
//! `<name>_buckets`.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::error::StratsimError;
use super::graph;

/// How a metric's result is shaped and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A single stored value. The value itself may be an array (e.g. `equity`).
    Scalar,
    /// A `(dates, values)` pair of equal length.
    Rolling,
    /// A `(labels, values)` pair of equal length.
    Bucketed,
}

impl MetricKind {
    fn index_suffix(self) -> Option<&'static str> {
        match self {
            MetricKind::Scalar => None,
            MetricKind::Rolling => Some("_dates"),
            MetricKind::Bucketed => Some("_buckets"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = StratsimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalar" => Ok(MetricKind::Scalar),
            "rolling" => Ok(MetricKind::Rolling),
            "bucketed" => Ok(MetricKind::Bucketed),
            other => Err(StratsimError::UnknownMetricKind {
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Scalar => write!(f, "scalar"),
            MetricKind::Rolling => write!(f, "rolling"),
            MetricKind::Bucketed => write!(f, "bucketed"),
        }
    }
}

/// A value held in the metric store.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Count(usize),
    /// `None` plays the role of "not a time".
    Date(Option<NaiveDateTime>),
    Timestamps(Vec<NaiveDateTime>),
    Floats(Vec<f64>),
    Years(Vec<i32>),
    Groups(Vec<Vec<f64>>),
}

impl MetricValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricValue::Float(_) => "float",
            MetricValue::Count(_) => "count",
            MetricValue::Date(_) => "date",
            MetricValue::Timestamps(_) => "timestamps",
            MetricValue::Floats(_) => "floats",
            MetricValue::Years(_) => "years",
            MetricValue::Groups(_) => "groups",
        }
    }

    /// Number of elements for array values, `None` for single values.
    pub fn len(&self) -> Option<usize> {
        match self {
            MetricValue::Float(_) | MetricValue::Count(_) | MetricValue::Date(_) => None,
            MetricValue::Timestamps(v) => Some(v.len()),
            MetricValue::Floats(v) => Some(v.len()),
            MetricValue::Years(v) => Some(v.len()),
            MetricValue::Groups(v) => Some(v.len()),
        }
    }
}

/// What a metric function returns.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutput {
    Value(MetricValue),
    Pair { index: MetricValue, values: MetricValue },
}

impl MetricOutput {
    pub fn rolling(dates: Vec<NaiveDateTime>, values: MetricValue) -> Self {
        MetricOutput::Pair {
            index: MetricValue::Timestamps(dates),
            values,
        }
    }

    pub fn bucketed(labels: MetricValue, values: MetricValue) -> Self {
        MetricOutput::Pair {
            index: labels,
            values,
        }
    }
}

impl From<MetricValue> for MetricOutput {
    fn from(value: MetricValue) -> Self {
        MetricOutput::Value(value)
    }
}

/// Dependency values bound by name for one metric function call.
pub struct Inputs<'a> {
    metric: &'a str,
    values: HashMap<&'a str, &'a MetricValue>,
}

impl<'a> Inputs<'a> {
    pub fn get(&self, name: &str) -> Result<&'a MetricValue, StratsimError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| StratsimError::MissingDependency {
                name: format!("{} (needed by {})", name, self.metric),
            })
    }

    pub fn float(&self, name: &str) -> Result<f64, StratsimError> {
        match self.get(name)? {
            MetricValue::Float(v) => Ok(*v),
            MetricValue::Count(n) => Ok(*n as f64),
            other => Err(type_error(name, "float", other)),
        }
    }

    pub fn count(&self, name: &str) -> Result<usize, StratsimError> {
        match self.get(name)? {
            MetricValue::Count(n) => Ok(*n),
            other => Err(type_error(name, "count", other)),
        }
    }

    pub fn date(&self, name: &str) -> Result<Option<NaiveDateTime>, StratsimError> {
        match self.get(name)? {
            MetricValue::Date(d) => Ok(*d),
            other => Err(type_error(name, "date", other)),
        }
    }

    pub fn floats(&self, name: &str) -> Result<&'a [f64], StratsimError> {
        match self.get(name)? {
            MetricValue::Floats(v) => Ok(v),
            other => Err(type_error(name, "floats", other)),
        }
    }

    pub fn timestamps(&self, name: &str) -> Result<&'a [NaiveDateTime], StratsimError> {
        match self.get(name)? {
            MetricValue::Timestamps(v) => Ok(v),
            other => Err(type_error(name, "timestamps", other)),
        }
    }
}

fn type_error(name: &str, expected: &'static str, found: &MetricValue) -> StratsimError {
    StratsimError::MetricType {
        name: name.to_string(),
        expected,
        found: found.type_name(),
    }
}

pub type MetricFn = Box<dyn Fn(&Inputs<'_>) -> Result<MetricOutput, StratsimError>>;

struct MetricDef {
    kind: MetricKind,
    func: MetricFn,
    dependencies: Vec<String>,
}

pub struct Evaluator {
    values: HashMap<String, MetricValue>,
    metrics: HashMap<String, MetricDef>,
    registration_order: Vec<String>,
}

impl Evaluator {
    /// Creates an evaluator whose store is seeded with `initial`.
    pub fn new<I>(initial: I) -> Self
    where
        I: IntoIterator<Item = (String, MetricValue)>,
    {
        Evaluator {
            values: initial.into_iter().collect(),
            metrics: HashMap::new(),
            registration_order: Vec::new(),
        }
    }

    /// Declares a metric without computing it. Re-registering a name replaces it.
    pub fn register<F>(&mut self, name: &str, kind: MetricKind, func: F, dependencies: &[&str])
    where
        F: Fn(&Inputs<'_>) -> Result<MetricOutput, StratsimError> + 'static,
    {
        if !self.metrics.contains_key(name) {
            self.registration_order.push(name.to_string());
        }
        self.metrics.insert(
            name.to_string(),
            MetricDef {
                kind,
                func: Box::new(func),
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            },
        );
    }

    pub fn add_scalar_metric<F>(&mut self, name: &str, func: F, dependencies: &[&str])
    where
        F: Fn(&Inputs<'_>) -> Result<MetricOutput, StratsimError> + 'static,
    {
        self.register(name, MetricKind::Scalar, func, dependencies);
    }

    pub fn add_rolling_metric<F>(&mut self, name: &str, func: F, dependencies: &[&str])
    where
        F: Fn(&Inputs<'_>) -> Result<MetricOutput, StratsimError> + 'static,
    {
        self.register(name, MetricKind::Rolling, func, dependencies);
    }

    pub fn add_bucketed_metric<F>(&mut self, name: &str, func: F, dependencies: &[&str])
    where
        F: Fn(&Inputs<'_>) -> Result<MetricOutput, StratsimError> + 'static,
    {
        self.register(name, MetricKind::Bucketed, func, dependencies);
    }

    /// Computes the named metrics, or every registered metric when `names` is `None`.
    ///
    /// Values already in the store, seeded or computed, are never recomputed.
    pub fn compute(&mut self, names: Option<&[&str]>) -> Result<(), StratsimError> {
        let targets: Vec<String> = match names {
            Some(names) => names.iter().map(|n| n.to_string()).collect(),
            None => self.registration_order.clone(),
        };

        let plan = graph::resolve_order(
            targets.iter().map(String::as_str),
            |name| self.dependencies_of(name),
            |name| self.values.contains_key(name),
        )?;

        for name in plan {
            // Index aliases (`<x>_dates`, `<x>_buckets`) are stored by their producer.
            if self.values.contains_key(&name) {
                continue;
            }
            self.compute_metric(&name)?;
        }
        Ok(())
    }

    /// Registered dependencies of `name`. An index alias depends on its producer.
    fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        if let Some(def) = self.metrics.get(name) {
            return Some(def.dependencies.as_slice());
        }
        for suffix in ["_dates", "_buckets"] {
            if let Some(base) = name.strip_suffix(suffix) {
                if let Some((key, def)) = self.metrics.get_key_value(base) {
                    if def.kind.index_suffix() == Some(suffix) {
                        return Some(std::slice::from_ref(key));
                    }
                }
            }
        }
        None
    }

    fn compute_metric(&mut self, name: &str) -> Result<(), StratsimError> {
        let Some(def) = self.metrics.get(name) else {
            // An alias whose producer ran without storing it.
            return Err(StratsimError::MissingDependency {
                name: name.to_string(),
            });
        };

        let mut bound = HashMap::with_capacity(def.dependencies.len());
        for dependency in &def.dependencies {
            let value = self.values.get(dependency).ok_or_else(|| {
                StratsimError::MissingDependency {
                    name: dependency.clone(),
                }
            })?;
            bound.insert(dependency.as_str(), value);
        }
        let inputs = Inputs {
            metric: name,
            values: bound,
        };

        tracing::trace!(metric = name, kind = %def.kind, "computing metric");
        let output = (def.func)(&inputs)?;
        let kind = def.kind;

        match (kind, output) {
            (MetricKind::Scalar, MetricOutput::Value(value)) => {
                self.values.insert(name.to_string(), value);
            }
            (MetricKind::Rolling | MetricKind::Bucketed, MetricOutput::Pair { index, values }) => {
                if kind == MetricKind::Rolling && !matches!(index, MetricValue::Timestamps(_)) {
                    return Err(StratsimError::MetricShape {
                        name: name.to_string(),
                        reason: format!("rolling index must be timestamps, got {}", index.type_name()),
                    });
                }
                let (index_len, values_len) = (index.len(), values.len());
                if index_len.is_none() || index_len != values_len {
                    return Err(StratsimError::MetricShape {
                        name: name.to_string(),
                        reason: format!(
                            "index has {:?} entries but values have {:?}",
                            index_len, values_len
                        ),
                    });
                }
                let suffix = kind.index_suffix().unwrap_or_default();
                self.values.insert(format!("{name}{suffix}"), index);
                self.values.insert(name.to_string(), values);
            }
            (kind, output) => {
                let found = match output {
                    MetricOutput::Value(_) => "a single value",
                    MetricOutput::Pair { .. } => "an index/value pair",
                };
                return Err(StratsimError::MetricShape {
                    name: name.to_string(),
                    reason: format!("{kind} metric returned {found}"),
                });
            }
        }
        Ok(())
    }

    pub fn value(&self, name: &str) -> Option<&MetricValue> {
        self.values.get(name)
    }

    pub fn values(&self) -> &HashMap<String, MetricValue> {
        &self.values
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn scalar(&self, name: &str) -> Result<f64, StratsimError> {
        match self.lookup(name)? {
            MetricValue::Float(v) => Ok(*v),
            MetricValue::Count(n) => Ok(*n as f64),
            other => Err(type_error(name, "float", other)),
        }
    }

    pub fn count(&self, name: &str) -> Result<usize, StratsimError> {
        match self.lookup(name)? {
            MetricValue::Count(n) => Ok(*n),
            other => Err(type_error(name, "count", other)),
        }
    }

    pub fn date(&self, name: &str) -> Result<Option<NaiveDateTime>, StratsimError> {
        match self.lookup(name)? {
            MetricValue::Date(d) => Ok(*d),
            other => Err(type_error(name, "date", other)),
        }
    }

    pub fn floats(&self, name: &str) -> Result<&[f64], StratsimError> {
        match self.lookup(name)? {
            MetricValue::Floats(v) => Ok(v),
            other => Err(type_error(name, "floats", other)),
        }
    }

    pub fn timestamps(&self, name: &str) -> Result<&[NaiveDateTime], StratsimError> {
        match self.lookup(name)? {
            MetricValue::Timestamps(v) => Ok(v),
            other => Err(type_error(name, "timestamps", other)),
        }
    }

    pub fn years(&self, name: &str) -> Result<&[i32], StratsimError> {
        match self.lookup(name)? {
            MetricValue::Years(v) => Ok(v),
            other => Err(type_error(name, "years", other)),
        }
    }

    pub fn groups(&self, name: &str) -> Result<&[Vec<f64>], StratsimError> {
        match self.lookup(name)? {
            MetricValue::Groups(v) => Ok(v),
            other => Err(type_error(name, "groups", other)),
        }
    }

    fn lookup(&self, name: &str) -> Result<&MetricValue, StratsimError> {
        self.values
            .get(name)
            .ok_or_else(|| StratsimError::MissingDependency {
                name: name.to_string(),
            })
    }
}

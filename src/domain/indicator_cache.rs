//! Per-entity memoized indicators and signals.
//!
//! Indicators derive series from other indicators. Signals derive series from
//! indicators and other signals. Both are computed per entity in dependency
//! order and never recomputed once stored, unless the store is cleared.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use super::error::{CallbackError, StratsimError};
use super::graph;
use super::series::{Bundle, Series, SeriesStore};

/// `(entity, timestamps, parent indicators, context) -> series`
pub type IndicatorFn<C> =
    Box<dyn Fn(&str, &[NaiveDateTime], &Bundle<'_>, &C) -> Result<Series, CallbackError>>;

/// `(entity, timestamps, indicators, parent signals, context) -> series`
pub type SignalFn<C> = Box<
    dyn Fn(&str, &[NaiveDateTime], &Bundle<'_>, &Bundle<'_>, &C) -> Result<Series, CallbackError>,
>;

struct IndicatorSpec<C> {
    func: IndicatorFn<C>,
    entities: Vec<String>,
    depends_on: Vec<String>,
}

struct SignalSpec<C> {
    func: SignalFn<C>,
    entities: Vec<String>,
    depends_on_indicators: Vec<String>,
    depends_on_signals: Vec<String>,
}

pub struct IndicatorCache<C> {
    entities: Vec<String>,
    indicators: HashMap<String, IndicatorSpec<C>>,
    indicator_order: Vec<String>,
    signals: HashMap<String, SignalSpec<C>>,
    signal_order: Vec<String>,
    indicator_values: SeriesStore,
    signal_values: SeriesStore,
}

fn owned(names: Option<&[&str]>) -> Vec<String> {
    names
        .unwrap_or_default()
        .iter()
        .map(|n| n.to_string())
        .collect()
}

fn check_length(
    series: &Series,
    expected: usize,
    name: &str,
    entity: &str,
) -> Result<(), StratsimError> {
    if series.len() != expected {
        return Err(StratsimError::SeriesLength {
            name: name.to_string(),
            entity: entity.to_string(),
            expected,
            actual: series.len(),
        });
    }
    Ok(())
}

impl<C> IndicatorCache<C> {
    pub fn new(entities: Vec<String>) -> Self {
        IndicatorCache {
            entities,
            indicators: HashMap::new(),
            indicator_order: Vec::new(),
            signals: HashMap::new(),
            signal_order: Vec::new(),
            indicator_values: SeriesStore::new(),
            signal_values: SeriesStore::new(),
        }
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Requested entities in registration order, or all of them.
    pub(crate) fn select_entities(
        &self,
        requested: Option<&[&str]>,
    ) -> Result<Vec<String>, StratsimError> {
        let Some(requested) = requested else {
            return Ok(self.entities.clone());
        };
        for name in requested {
            if !self.entities.iter().any(|e| e == name) {
                return Err(StratsimError::UnknownEntity {
                    name: name.to_string(),
                });
            }
        }
        Ok(self
            .entities
            .iter()
            .filter(|e| requested.contains(&e.as_str()))
            .cloned()
            .collect())
    }

    pub fn add_indicator<F>(
        &mut self,
        name: &str,
        func: F,
        entities: Option<&[&str]>,
        depends_on: Option<&[&str]>,
    ) -> Result<(), StratsimError>
    where
        F: Fn(&str, &[NaiveDateTime], &Bundle<'_>, &C) -> Result<Series, CallbackError> + 'static,
    {
        let entities = self.select_entities(entities)?;
        if !self.indicators.contains_key(name) {
            self.indicator_order.push(name.to_string());
        }
        self.indicators.insert(
            name.to_string(),
            IndicatorSpec {
                func: Box::new(func),
                entities,
                depends_on: owned(depends_on),
            },
        );
        Ok(())
    }

    pub fn add_signal<F>(
        &mut self,
        name: &str,
        func: F,
        entities: Option<&[&str]>,
        depends_on_indicators: Option<&[&str]>,
        depends_on_signals: Option<&[&str]>,
    ) -> Result<(), StratsimError>
    where
        F: Fn(&str, &[NaiveDateTime], &Bundle<'_>, &Bundle<'_>, &C) -> Result<Series, CallbackError>
            + 'static,
    {
        let entities = self.select_entities(entities)?;
        if !self.signals.contains_key(name) {
            self.signal_order.push(name.to_string());
        }
        self.signals.insert(
            name.to_string(),
            SignalSpec {
                func: Box::new(func),
                entities,
                depends_on_indicators: owned(depends_on_indicators),
                depends_on_signals: owned(depends_on_signals),
            },
        );
        Ok(())
    }

    /// Entities a registered signal is computed for.
    pub fn signal_entities(&self, name: &str) -> Option<&[String]> {
        self.signals.get(name).map(|s| s.entities.as_slice())
    }

    pub fn indicator_values(&self) -> &SeriesStore {
        &self.indicator_values
    }

    pub fn signal_values(&self) -> &SeriesStore {
        &self.signal_values
    }

    pub fn run_indicators(
        &mut self,
        timestamps: &[NaiveDateTime],
        context: &C,
        names: Option<&[&str]>,
        entities: Option<&[&str]>,
        clear: bool,
    ) -> Result<(), StratsimError> {
        let entities = self.select_entities(entities)?;
        let names = requested_names(names, &self.indicator_order, |n| {
            self.indicators.contains_key(n)
        })?;
        if clear {
            self.indicator_values.clear();
        }

        for entity in &entities {
            let targets: Vec<&str> = names
                .iter()
                .filter(|n| {
                    self.indicators
                        .get(n.as_str())
                        .is_some_and(|spec| spec.entities.contains(entity))
                })
                .map(String::as_str)
                .collect();
            let plan = graph::resolve_order(
                targets,
                |n| self.indicators.get(n).map(|spec| spec.depends_on.as_slice()),
                |n| self.indicator_values.contains(entity, n),
            )?;

            for name in plan {
                let Some(spec) = self.indicators.get(&name) else {
                    continue;
                };
                let parents = self.indicator_values.bundle_of(entity, &spec.depends_on)?;
                let series = (spec.func)(entity, timestamps, &parents, context).map_err(
                    |source| StratsimError::Indicator {
                        name: name.clone(),
                        entity: entity.clone(),
                        source,
                    },
                )?;
                check_length(&series, timestamps.len(), &name, entity)?;
                tracing::trace!(indicator = %name, entity = %entity, "computed indicator");
                self.indicator_values.insert(entity, &name, series);
            }
        }
        Ok(())
    }

    pub fn run_signals(
        &mut self,
        timestamps: &[NaiveDateTime],
        context: &C,
        names: Option<&[&str]>,
        entities: Option<&[&str]>,
        clear: bool,
    ) -> Result<(), StratsimError> {
        let entities = self.select_entities(entities)?;
        let names = requested_names(names, &self.signal_order, |n| self.signals.contains_key(n))?;
        if clear {
            self.signal_values.clear();
        }

        for entity in &entities {
            let targets: Vec<&str> = names
                .iter()
                .filter(|n| {
                    self.signals
                        .get(n.as_str())
                        .is_some_and(|spec| spec.entities.contains(entity))
                })
                .map(String::as_str)
                .collect();
            let plan = graph::resolve_order(
                targets,
                |n| {
                    self.signals
                        .get(n)
                        .map(|spec| spec.depends_on_signals.as_slice())
                },
                |n| self.signal_values.contains(entity, n),
            )?;

            for name in plan {
                let Some(spec) = self.signals.get(&name) else {
                    continue;
                };
                let indicators = self
                    .indicator_values
                    .bundle_of(entity, &spec.depends_on_indicators)?;
                let parents = self
                    .signal_values
                    .bundle_of(entity, &spec.depends_on_signals)?;
                let series = (spec.func)(entity, timestamps, &indicators, &parents, context)
                    .map_err(|source| StratsimError::Signal {
                        name: name.clone(),
                        entity: entity.clone(),
                        source,
                    })?;
                check_length(&series, timestamps.len(), &name, entity)?;
                tracing::trace!(signal = %name, entity = %entity, "computed signal");
                self.signal_values.insert(entity, &name, series);
            }
        }
        Ok(())
    }
}

fn requested_names<F>(
    names: Option<&[&str]>,
    all: &[String],
    is_registered: F,
) -> Result<Vec<String>, StratsimError>
where
    F: Fn(&str) -> bool,
{
    let Some(names) = names else {
        return Ok(all.to_vec());
    };
    names
        .iter()
        .map(|n| {
            if is_registered(n) {
                Ok(n.to_string())
            } else {
                Err(StratsimError::MissingDependency {
                    name: n.to_string(),
                })
            }
        })
        .collect()
}

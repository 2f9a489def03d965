//! Timestamp-aligned value series and the per-entity stores that hold them.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use super::error::StratsimError;

/// Fails unless every timestamp is strictly greater than the one before it.
pub fn ensure_increasing(timestamps: &[NaiveDateTime]) -> Result<(), StratsimError> {
    match timestamps.windows(2).position(|w| w[1] <= w[0]) {
        Some(i) => Err(StratsimError::NonMonotonicTimestamps {
            index: i + 1,
            previous: timestamps[i],
            next: timestamps[i + 1],
        }),
        None => Ok(()),
    }
}

/// One value per master timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum Series {
    /// NaN marks a missing value.
    Numeric(Vec<f64>),
    Boolean(Vec<bool>),
}

impl Series {
    pub fn len(&self) -> usize {
        match self {
            Series::Numeric(v) => v.len(),
            Series::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Series::Numeric(v) => Some(v),
            Series::Boolean(_) => None,
        }
    }

    pub fn as_boolean(&self) -> Option<&[bool]> {
        match self {
            Series::Boolean(v) => Some(v),
            Series::Numeric(_) => None,
        }
    }

    /// Value at `index`, or `None` past the end.
    pub fn value_at(&self, index: usize) -> Option<SignalValue> {
        match self {
            Series::Numeric(v) => v.get(index).map(|&x| SignalValue::Number(x)),
            Series::Boolean(v) => v.get(index).map(|&b| SignalValue::Bool(b)),
        }
    }

    /// Replaces values outside `keep` with the null of the series type:
    /// `false` for booleans, NaN for numbers.
    pub fn mask_outside(&mut self, keep: std::ops::Range<usize>) {
        match self {
            Series::Numeric(v) => {
                for (i, x) in v.iter_mut().enumerate() {
                    if !keep.contains(&i) {
                        *x = f64::NAN;
                    }
                }
            }
            Series::Boolean(v) => {
                for (i, b) in v.iter_mut().enumerate() {
                    if !keep.contains(&i) {
                        *b = false;
                    }
                }
            }
        }
    }

    /// Indices whose value equals any of `accepted`.
    pub fn matching_indices(&self, accepted: &[SignalValue]) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| {
                self.value_at(i)
                    .is_some_and(|value| accepted.iter().any(|a| a.matches(value)))
            })
            .collect()
    }
}

impl From<Vec<f64>> for Series {
    fn from(values: Vec<f64>) -> Self {
        Series::Numeric(values)
    }
}

impl From<Vec<bool>> for Series {
    fn from(values: Vec<bool>) -> Self {
        Series::Boolean(values)
    }
}

/// A single signal value, as compared against a rule's accepted set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalValue {
    Bool(bool),
    Number(f64),
}

impl SignalValue {
    /// Equality where `true == 1.0` and `false == 0.0`. NaN matches nothing.
    pub fn matches(self, other: SignalValue) -> bool {
        match (self.as_number(), other.as_number()) {
            (a, b) if a.is_nan() || b.is_nan() => false,
            (a, b) => a == b,
        }
    }

    fn as_number(self) -> f64 {
        match self {
            SignalValue::Bool(true) => 1.0,
            SignalValue::Bool(false) => 0.0,
            SignalValue::Number(x) => x,
        }
    }
}

impl From<bool> for SignalValue {
    fn from(b: bool) -> Self {
        SignalValue::Bool(b)
    }
}

impl From<f64> for SignalValue {
    fn from(x: f64) -> Self {
        SignalValue::Number(x)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub entity: String,
    pub name: String,
}

impl SeriesKey {
    pub fn new(entity: &str, name: &str) -> Self {
        SeriesKey {
            entity: entity.to_string(),
            name: name.to_string(),
        }
    }
}

/// Series keyed by `(entity, name)`.
#[derive(Debug, Clone, Default)]
pub struct SeriesStore {
    series: BTreeMap<SeriesKey, Series>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: &str, name: &str) -> Option<&Series> {
        self.series.get(&SeriesKey::new(entity, name))
    }

    pub fn contains(&self, entity: &str, name: &str) -> bool {
        self.series.contains_key(&SeriesKey::new(entity, name))
    }

    pub fn insert(&mut self, entity: &str, name: &str, series: Series) {
        self.series.insert(SeriesKey::new(entity, name), series);
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Names stored for `entity`, sorted.
    pub fn names(&self, entity: &str) -> Vec<&str> {
        self.series
            .keys()
            .filter(|k| k.entity == entity)
            .map(|k| k.name.as_str())
            .collect()
    }

    /// Every series stored for `entity`.
    pub fn bundle(&self, entity: &str) -> Bundle<'_> {
        Bundle {
            values: self
                .series
                .iter()
                .filter(|(k, _)| k.entity == entity)
                .map(|(k, v)| (k.name.as_str(), v))
                .collect(),
        }
    }

    /// Only the named series for `entity`. Each must be present.
    pub fn bundle_of<'a>(
        &'a self,
        entity: &str,
        names: &'a [String],
    ) -> Result<Bundle<'a>, StratsimError> {
        let mut values = BTreeMap::new();
        for name in names {
            let series = self
                .get(entity, name)
                .ok_or_else(|| StratsimError::MissingDependency {
                    name: format!("{name} for {entity}"),
                })?;
            values.insert(name.as_str(), series);
        }
        Ok(Bundle { values })
    }
}

/// Named series handed to a callback, borrowed from a store.
#[derive(Debug, Clone, Default)]
pub struct Bundle<'a> {
    values: BTreeMap<&'a str, &'a Series>,
}

impl<'a> Bundle<'a> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<&'a Series, StratsimError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| StratsimError::MissingDependency {
                name: name.to_string(),
            })
    }

    pub fn numeric(&self, name: &str) -> Result<&'a [f64], StratsimError> {
        self.get(name)?
            .as_numeric()
            .ok_or_else(|| StratsimError::SeriesType {
                name: name.to_string(),
                expected: "numeric",
            })
    }

    pub fn boolean(&self, name: &str) -> Result<&'a [bool], StratsimError> {
        self.get(name)?
            .as_boolean()
            .ok_or_else(|| StratsimError::SeriesType {
                name: name.to_string(),
                expected: "boolean",
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.values.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_and_number_cross_match() {
        assert!(SignalValue::Bool(true).matches(SignalValue::Number(1.0)));
        assert!(SignalValue::Number(0.0).matches(SignalValue::Bool(false)));
        assert!(!SignalValue::Bool(true).matches(SignalValue::Number(-1.0)));
        assert!(!SignalValue::Number(f64::NAN).matches(SignalValue::Number(f64::NAN)));
    }

    #[test]
    fn matching_indices_numeric() {
        let s = Series::from(vec![1.0, -1.0, f64::NAN, 1.0, 0.0]);
        assert_eq!(s.matching_indices(&[SignalValue::Number(1.0)]), vec![0, 3]);
        assert_eq!(
            s.matching_indices(&[SignalValue::Number(-1.0), SignalValue::Bool(false)]),
            vec![1, 4]
        );
    }

    #[test]
    fn matching_indices_boolean_against_true() {
        let s = Series::from(vec![false, true, true]);
        assert_eq!(s.matching_indices(&[SignalValue::Bool(true)]), vec![1, 2]);
        assert_eq!(s.matching_indices(&[SignalValue::Number(1.0)]), vec![1, 2]);
    }

    #[test]
    fn mask_outside_uses_type_null() {
        let mut b = Series::from(vec![true, true, true, true]);
        b.mask_outside(1..3);
        assert_eq!(b, Series::from(vec![false, true, true, false]));

        let mut n = Series::from(vec![1.0, 2.0, 3.0]);
        n.mask_outside(0..1);
        let values = n.as_numeric().unwrap();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan() && values[2].is_nan());
    }

    #[test]
    fn store_bundles_by_entity() {
        let mut store = SeriesStore::new();
        store.insert("IBM", "close", Series::from(vec![1.0, 2.0]));
        store.insert("IBM", "up", Series::from(vec![false, true]));
        store.insert("AAPL", "close", Series::from(vec![3.0, 4.0]));

        let bundle = store.bundle("IBM");
        assert_eq!(bundle.names().collect::<Vec<_>>(), vec!["close", "up"]);
        assert_eq!(bundle.numeric("close").unwrap(), &[1.0, 2.0]);
        assert_eq!(bundle.boolean("up").unwrap(), &[false, true]);
        assert_eq!(store.names("AAPL"), vec!["close"]);
    }

    #[test]
    fn bundle_type_and_lookup_errors() {
        let mut store = SeriesStore::new();
        store.insert("IBM", "close", Series::from(vec![1.0]));
        let bundle = store.bundle("IBM");
        assert!(matches!(
            bundle.boolean("close"),
            Err(StratsimError::SeriesType { expected: "boolean", .. })
        ));
        assert!(matches!(
            bundle.numeric("open"),
            Err(StratsimError::MissingDependency { .. })
        ));
    }

    #[test]
    fn bundle_of_requires_every_name() {
        let mut store = SeriesStore::new();
        store.insert("IBM", "close", Series::from(vec![1.0]));
        let names = vec!["close".to_string(), "volume".to_string()];
        assert!(store.bundle_of("IBM", &names).is_err());
        let bundle = store.bundle_of("IBM", &names[..1]).unwrap();
        assert_eq!(bundle.len(), 1);
    }
}

//! Per-entity price table aligned with the master timestamps.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use super::error::StratsimError;
use super::series::ensure_increasing;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    pub timestamps: Vec<NaiveDateTime>,
    /// Column order of the source data.
    pub entities: Vec<String>,
    prices: HashMap<String, Vec<f64>>,
}

impl PriceTable {
    /// Builds a table from `(entity, prices)` columns. Missing prices are NaN.
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, StratsimError> {
        ensure_increasing(&timestamps)?;
        if columns.is_empty() {
            return Err(StratsimError::NoEntities);
        }
        let mut entities = Vec::with_capacity(columns.len());
        let mut prices = HashMap::with_capacity(columns.len());
        for (entity, values) in columns {
            if values.len() != timestamps.len() {
                return Err(StratsimError::InputLength {
                    what: format!("prices for {entity}"),
                    expected: timestamps.len(),
                    actual: values.len(),
                });
            }
            entities.push(entity.clone());
            prices.insert(entity, values);
        }
        Ok(PriceTable {
            timestamps,
            entities,
            prices,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn series(&self, entity: &str) -> Option<&[f64]> {
        self.prices.get(entity).map(Vec::as_slice)
    }

    pub fn price(&self, entity: &str, index: usize) -> Option<f64> {
        self.prices.get(entity).and_then(|p| p.get(index)).copied()
    }

    /// Index of the last timestamp `<= ts`.
    pub fn index_at_or_before(&self, ts: NaiveDateTime) -> Option<usize> {
        self.timestamps
            .partition_point(|t| *t <= ts)
            .checked_sub(1)
    }

    /// Most recent non-NaN price at or before `index`.
    pub fn last_valid_price(&self, entity: &str, index: usize) -> Option<f64> {
        let series = self.prices.get(entity)?;
        let end = (index + 1).min(series.len());
        series[..end].iter().rev().copied().find(|p| !p.is_nan())
    }
}

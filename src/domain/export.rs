//! Tabular export of indicators, signals and P&L, one row per entity and tick.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;

use super::error::StratsimError;
use super::series::Series;
use super::strategy::Strategy;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Timestamp(NaiveDateTime),
    Text(String),
    Number(f64),
    Bool(bool),
    Count(usize),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(x) if x.is_nan() => Ok(()),
            Cell::Number(x) => write!(f, "{x}"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Count(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell at `row` in the named column.
    pub fn get(&self, row: usize, name: &str) -> Option<&Cell> {
        let col = self.column(name)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn series_cell(series: &Series, index: usize) -> Cell {
    match series {
        Series::Numeric(v) => v.get(index).map_or(Cell::Empty, |x| Cell::Number(*x)),
        Series::Boolean(v) => v.get(index).map_or(Cell::Empty, |b| Cell::Bool(*b)),
    }
}

/// Tick counter column, always last.
const TICK_COLUMN: &str = "i";

/// Columns for one entity, in output order.
struct Frame {
    columns: Vec<(String, Vec<Cell>)>,
}

impl Frame {
    fn push(&mut self, mut name: String, suffix: &str, cells: Vec<Cell>) {
        if name == TICK_COLUMN || self.columns.iter().any(|(n, _)| *n == name) {
            name.push_str(suffix);
        }
        self.columns.push((name, cells));
    }
}

impl<C> Strategy<C> {
    /// Indicators (sorted), signals (sorted) and optionally P&L per entity
    /// over ticks in `[start, end]`, stacked entity by entity.
    ///
    /// Name collisions get an `.ind` or `.sig` suffix. Column `i` holds the
    /// tick index.
    pub fn data_frame(
        &self,
        entities: Option<&[&str]>,
        include_pnl: bool,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Table, StratsimError> {
        let entities = self.cache.select_entities(entities)?;
        let ticks: Vec<usize> = (0..self.timestamps.len())
            .filter(|&i| {
                let t = self.timestamps[i];
                start.is_none_or(|s| t >= s) && end.is_none_or(|e| t <= e)
            })
            .collect();

        let mut frames = Vec::with_capacity(entities.len());
        for entity in &entities {
            let mut frame = Frame {
                columns: vec![
                    (
                        "timestamp".to_string(),
                        ticks.iter().map(|&i| Cell::Timestamp(self.timestamps[i])).collect(),
                    ),
                    (
                        "entity".to_string(),
                        ticks.iter().map(|_| Cell::Text(entity.clone())).collect(),
                    ),
                ],
            };

            let indicators = self.cache.indicator_values();
            for name in indicators.names(entity) {
                if let Some(series) = indicators.get(entity, name) {
                    let cells = ticks.iter().map(|&i| series_cell(series, i)).collect();
                    frame.push(name.to_string(), ".ind", cells);
                }
            }
            let signals = self.cache.signal_values();
            for name in signals.names(entity) {
                if let Some(series) = signals.get(entity, name) {
                    let cells = ticks.iter().map(|&i| series_cell(series, i)).collect();
                    frame.push(name.to_string(), ".sig", cells);
                }
            }

            if include_pnl {
                let pnl: HashMap<NaiveDateTime, (f64, f64, f64)> = self
                    .ledger
                    .pnl(Some(entity.as_str()))
                    .into_iter()
                    .map(|p| (p.timestamp, (p.position, p.price, p.net_pnl)))
                    .collect();
                let column = |pick: fn(&(f64, f64, f64)) -> f64| -> Vec<Cell> {
                    ticks
                        .iter()
                        .map(|&i| {
                            pnl.get(&self.timestamps[i])
                                .map_or(Cell::Empty, |row| Cell::Number(pick(row)))
                        })
                        .collect()
                };
                frame.push("position".to_string(), ".pnl", column(|r| r.0));
                frame.push("price".to_string(), ".pnl", column(|r| r.1));
                frame.push("net_pnl".to_string(), ".pnl", column(|r| r.2));
            }

            frame.columns.push((
                TICK_COLUMN.to_string(),
                ticks.iter().map(|&i| Cell::Count(i)).collect(),
            ));
            frames.push(frame);
        }

        let mut headers: Vec<String> = Vec::new();
        for frame in &frames {
            for (name, _) in &frame.columns {
                if !headers.contains(name) {
                    headers.push(name.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(frames.len() * ticks.len());
        for frame in &frames {
            let positions: Vec<Option<usize>> = headers
                .iter()
                .map(|h| frame.columns.iter().position(|(n, _)| n == h))
                .collect();
            for row in 0..ticks.len() {
                rows.push(
                    positions
                        .iter()
                        .map(|p| p.map_or(Cell::Empty, |c| frame.columns[c].1[row].clone()))
                        .collect(),
                );
            }
        }
        Ok(Table { headers, rows })
    }
}

//! CSV price data and report adapter.
//!
//! Prices are a wide table: a `timestamp` column followed by one close-price
//! column per entity. Blank cells are missing prices.

use crate::domain::error::StratsimError;
use crate::domain::export::Table;
use crate::domain::prices::PriceTable;
use crate::ports::data_port::PriceDataPort;
use crate::ports::report_port::ReportPort;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fs;
use std::path::{Path, PathBuf};

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    /// Relative paths resolve against `base_path`.
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base_path.join(path)
    }
}

fn csv_error(path: &Path, reason: impl std::fmt::Display) -> StratsimError {
    StratsimError::Csv {
        reason: format!("{}: {}", path.display(), reason),
    }
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::default()))
        })
}

impl PriceDataPort for CsvAdapter {
    fn load_prices(&self, path: &Path) -> Result<PriceTable, StratsimError> {
        let path = self.resolve(path);
        let content = fs::read_to_string(&path).map_err(|e| csv_error(&path, e))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers = rdr.headers().map_err(|e| csv_error(&path, e))?.clone();
        let entities: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
        if entities.is_empty() {
            return Err(csv_error(&path, "no entity columns"));
        }

        let mut rows: Vec<(NaiveDateTime, Vec<f64>)> = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| csv_error(&path, e))?;
            let raw = record
                .get(0)
                .ok_or_else(|| csv_error(&path, format!("row {}: missing timestamp", line + 1)))?;
            let timestamp = parse_timestamp(raw).ok_or_else(|| {
                csv_error(&path, format!("row {}: invalid timestamp {raw:?}", line + 1))
            })?;

            let mut values = Vec::with_capacity(entities.len());
            for (col, entity) in entities.iter().enumerate() {
                let cell = record.get(col + 1).unwrap_or("").trim();
                let value = if cell.is_empty() {
                    f64::NAN
                } else {
                    cell.parse::<f64>().unwrap_or_else(|_| {
                        tracing::warn!(row = line + 1, %entity, cell, "unparseable price treated as missing");
                        f64::NAN
                    })
                };
                values.push(value);
            }
            rows.push((timestamp, values));
        }

        rows.sort_by_key(|(t, _)| *t);
        let timestamps: Vec<NaiveDateTime> = rows.iter().map(|(t, _)| *t).collect();
        let columns = entities
            .iter()
            .enumerate()
            .map(|(col, entity)| (entity.clone(), rows.iter().map(|(_, v)| v[col]).collect()))
            .collect();
        tracing::info!(path = %path.display(), rows = timestamps.len(), entities = entities.len(), "loaded prices");
        PriceTable::new(timestamps, columns)
    }
}

impl ReportPort for CsvAdapter {
    fn write_table(&self, table: &Table, output_path: &Path) -> Result<(), StratsimError> {
        let path = self.resolve(output_path);
        let mut wtr = csv::Writer::from_path(&path).map_err(|e| csv_error(&path, e))?;
        wtr.write_record(&table.headers)
            .map_err(|e| csv_error(&path, e))?;
        for row in &table.rows {
            wtr.write_record(row.iter().map(|c| c.to_string()))
                .map_err(|e| csv_error(&path, e))?;
        }
        wtr.flush()?;
        tracing::info!(path = %path.display(), rows = table.len(), "wrote table");
        Ok(())
    }
}

//! Backtest configuration and driver for the built-in crossover preset.

use chrono::{Days, NaiveDate, NaiveTime};
use std::path::PathBuf;

use crate::domain::config_validation::validate_config;
use crate::domain::error::StratsimError;
use crate::domain::metrics::ReturnMetrics;
use crate::domain::planner::DateRange;
use crate::domain::preset::{build_sma_crossover, CrossoverContext, CrossoverParams};
use crate::domain::prices::PriceTable;
use crate::domain::strategy::Strategy;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub starting_equity: f64,
    pub trade_lag: usize,
    /// Mark the account through the last tick. When off, the account is only
    /// marked through the last fill, so returns end there.
    pub run_final_calc: bool,
    /// `None` infers it from the return dates.
    pub periods_per_year: Option<f64>,
    pub prices: Option<PathBuf>,
    /// Rules fire from this date.
    pub start_date: Option<NaiveDate>,
    /// Rules fire through the end of this date.
    pub end_date: Option<NaiveDate>,
    pub preset: CrossoverParams,
}

impl BacktestConfig {
    /// Validates and reads the `[strategy]`, `[data]` and `[preset]` sections.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StratsimError> {
        validate_config(config)?;
        let defaults = CrossoverParams::default();
        let periods_per_year = config.get_double("strategy", "periods_per_year", 0.0);
        Ok(BacktestConfig {
            starting_equity: config.get_double("strategy", "starting_equity", 0.0),
            trade_lag: config.get_int("strategy", "trade_lag", 0) as usize,
            run_final_calc: config.get_bool("strategy", "run_final_calc", true),
            periods_per_year: (periods_per_year > 0.0).then_some(periods_per_year),
            prices: config
                .get_string("data", "prices")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            start_date: config.get_date("data", "start_date")?,
            end_date: config.get_date("data", "end_date")?,
            preset: CrossoverParams {
                fast_period: config.get_int("preset", "fast_period", defaults.fast_period as i64)
                    as usize,
                slow_period: config.get_int("preset", "slow_period", defaults.slow_period as i64)
                    as usize,
                order_size: config.get_double("preset", "order_size", defaults.order_size),
                commission_per_trade: config.get_double(
                    "preset",
                    "commission_per_trade",
                    defaults.commission_per_trade,
                ),
                commission_pct: config.get_double(
                    "preset",
                    "commission_pct",
                    defaults.commission_pct,
                ),
            },
        })
    }

    /// Rule date range: from the start date's midnight up to, not including,
    /// the midnight after the end date.
    pub fn date_range(&self) -> DateRange {
        let start = self.start_date.map(|d| d.and_time(NaiveTime::default()));
        let end = self
            .end_date
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map(|d| d.and_time(NaiveTime::default()));
        DateRange::new(start, end)
    }
}

pub struct BacktestResult {
    pub strategy: Strategy<CrossoverContext>,
    pub metrics: ReturnMetrics,
}

impl std::fmt::Debug for BacktestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestResult")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Builds the preset over `prices`, runs it and evaluates account returns.
pub fn run_backtest(
    config: &BacktestConfig,
    prices: PriceTable,
) -> Result<BacktestResult, StratsimError> {
    tracing::info!(
        entities = prices.entities.len(),
        ticks = prices.len(),
        fast = config.preset.fast_period,
        slow = config.preset.slow_period,
        "starting backtest"
    );
    let mut strategy = build_sma_crossover(
        prices,
        config.starting_equity,
        config.trade_lag,
        config.preset.clone(),
    )?
    .with_final_calc(config.run_final_calc);

    strategy.run_indicators(None, None, false)?;
    strategy.run_signals(None, None, false)?;
    strategy.run_rules(None, None, config.date_range())?;
    if !config.run_final_calc {
        let last_fill = strategy
            .trades(None, None, None)
            .iter()
            .map(|t| t.timestamp)
            .max();
        match last_fill {
            Some(timestamp) => strategy.mark_to_market(timestamp),
            None => tracing::warn!("no fills and final calc is off, returns will be empty"),
        }
    }

    let evaluator = strategy.evaluate_returns(None, config.periods_per_year)?;
    let metrics = ReturnMetrics::from_evaluator(&evaluator)?;
    tracing::info!(
        trades = strategy.trades(None, None, None).len(),
        gmean = metrics.gmean,
        sharpe0 = metrics.sharpe0,
        "backtest finished"
    );
    Ok(BacktestResult { strategy, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn sample_config() -> BacktestConfig {
        BacktestConfig {
            starting_equity: 100_000.0,
            trade_lag: 0,
            run_final_calc: true,
            periods_per_year: None,
            prices: None,
            start_date: None,
            end_date: None,
            preset: CrossoverParams::default(),
        }
    }

    #[test]
    fn reads_all_sections() {
        let config = make_config(
            "[strategy]\nstarting_equity = 5000\ntrade_lag = 1\nrun_final_calc = false\nperiods_per_year = 52\n\
             [data]\nprices = p.csv\nstart_date = 2020-01-01\nend_date = 2020-06-30\n\
             [preset]\nfast_period = 3\nslow_period = 8\norder_size = 7\ncommission_per_trade = 2\n",
        );
        let c = BacktestConfig::from_config(&config).unwrap();
        assert!((c.starting_equity - 5000.0).abs() < f64::EPSILON);
        assert_eq!(c.trade_lag, 1);
        assert!(!c.run_final_calc);
        assert_eq!(c.periods_per_year, Some(52.0));
        assert_eq!(c.prices, Some(PathBuf::from("p.csv")));
        assert_eq!(c.start_date, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(c.preset.fast_period, 3);
        assert_eq!(c.preset.slow_period, 8);
        assert!((c.preset.order_size - 7.0).abs() < f64::EPSILON);
        assert!((c.preset.commission_per_trade - 2.0).abs() < f64::EPSILON);
        assert!((c.preset.commission_pct - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_periods_per_year_means_infer() {
        let config = make_config("[strategy]\nstarting_equity = 10\nperiods_per_year = 0\n");
        let c = BacktestConfig::from_config(&config).unwrap();
        assert_eq!(c.periods_per_year, None);
        assert!(c.run_final_calc);
        assert_eq!(c.prices, None);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = make_config("[strategy]\nstarting_equity = -1\n");
        assert!(BacktestConfig::from_config(&config).is_err());
    }

    fn peak_prices() -> PriceTable {
        let closes = vec![10.0, 10.0, 10.0, 12.0, 14.0, 16.0, 12.0, 8.0, 6.0, 6.0, 6.0, 6.0];
        let timestamps = (1..=12)
            .map(|d| {
                NaiveDate::from_ymd_opt(2024, 3, d)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            })
            .collect();
        PriceTable::new(timestamps, vec![("ACME".to_string(), closes)]).unwrap()
    }

    fn peak_config(run_final_calc: bool) -> BacktestConfig {
        BacktestConfig {
            starting_equity: 1_000.0,
            trade_lag: 1,
            run_final_calc,
            preset: CrossoverParams {
                fast_period: 2,
                slow_period: 3,
                order_size: 10.0,
                ..CrossoverParams::default()
            },
            ..sample_config()
        }
    }

    #[test]
    fn final_calc_marks_through_last_tick() {
        let result = run_backtest(&peak_config(true), peak_prices()).unwrap();
        let series = result.strategy.returns(None).unwrap();
        assert_eq!(series.timestamps.len(), 12);
        assert_eq!(
            series.timestamps.last(),
            result.strategy.timestamps().last()
        );
    }

    #[test]
    fn without_final_calc_returns_end_at_last_fill() {
        let with = run_backtest(&peak_config(true), peak_prices()).unwrap();
        let without = run_backtest(&peak_config(false), peak_prices()).unwrap();

        let trades = without.strategy.trades(None, None, None);
        assert_eq!(trades.len(), 2);
        let last_fill = trades[1].timestamp;
        let series = without.strategy.returns(None).unwrap();
        assert_eq!(series.timestamps.last(), Some(&last_fill));
        assert!(series.timestamps.len() < with.strategy.returns(None).unwrap().timestamps.len());
        assert_eq!(without.metrics.up_periods, 1);
        assert_eq!(without.metrics.down_periods, 3);
    }

    #[test]
    fn without_final_calc_or_fills_metrics_are_empty() {
        let config = BacktestConfig {
            run_final_calc: false,
            ..sample_config()
        };
        let result = run_backtest(&config, peak_prices()).unwrap();
        assert!(result.strategy.trades(None, None, None).is_empty());
        assert!(result.strategy.returns(None).unwrap().returns.is_empty());
        assert!(result.metrics.gmean.is_nan());
    }

    #[test]
    fn date_range_covers_whole_end_day() {
        let c = BacktestConfig {
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2020, 1, 31),
            ..sample_config()
        };
        let range = c.date_range();
        let late = NaiveDate::from_ymd_opt(2020, 1, 31)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap();
        let next = NaiveDate::from_ymd_opt(2020, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(range.contains(late));
        assert!(!range.contains(next));
        assert_eq!(sample_config().date_range(), DateRange::all());
    }
}

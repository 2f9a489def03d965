//! CLI integration tests: config loading, price loading and full preset runs
//! against files on disk.

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use stratsim::adapters::file_config_adapter::FileConfigAdapter;
use stratsim::cli::{self, Cli};
use stratsim::domain::backtest::BacktestConfig;
use stratsim::domain::error::StratsimError;
use tempfile::TempDir;

const PRICES: &str = "timestamp,ACME,GLOBEX\n\
2024-03-01,10,50\n\
2024-03-02,10,51\n\
2024-03-03,10,52\n\
2024-03-04,12,53\n\
2024-03-05,14,52\n\
2024-03-06,16,51\n\
2024-03-07,12,50\n\
2024-03-08,8,49\n\
2024-03-09,6,50\n\
2024-03-10,6,51\n";

fn ini(prices: &str, extra: &str) -> String {
    format!(
        "[strategy]\nstarting_equity = 1000\ntrade_lag = 1\nrun_final_calc = true\n\
         [data]\nprices = {prices}\n\
         [preset]\nfast_period = 2\nslow_period = 3\norder_size = 10\n{extra}"
    )
}

fn workspace(config: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("prices.csv"), PRICES).unwrap();
    let config_path = dir.path().join("config.ini");
    fs::write(&config_path, config).unwrap();
    (dir, config_path)
}

mod config_loading {
    use super::*;

    #[test]
    fn backtest_config_from_ini() {
        let adapter = FileConfigAdapter::from_string(&ini("prices.csv", "")).unwrap();
        let config = BacktestConfig::from_config(&adapter).unwrap();
        assert!((config.starting_equity - 1000.0).abs() < f64::EPSILON);
        assert_eq!(config.trade_lag, 1);
        assert_eq!(config.preset.fast_period, 2);
        assert_eq!(config.prices, Some(PathBuf::from("prices.csv")));
    }

    #[test]
    fn missing_config_file_fails() {
        let err = cli::execute(Path::new("/nonexistent/config.ini"), None, None).unwrap_err();
        assert!(matches!(err, StratsimError::ConfigParse { .. }));
        assert_eq!(ExitCode::from(&err), ExitCode::from(2));
    }

    #[test]
    fn invalid_preset_fails_before_loading_prices() {
        let (_dir, config) = workspace(&ini("missing.csv", "commission_pct = -1\n"));
        let err = cli::execute(&config, None, None).unwrap_err();
        assert!(matches!(err, StratsimError::ConfigInvalid { key, .. } if key == "commission_pct"));
    }

    #[test]
    fn missing_price_file_is_a_csv_error() {
        let (_dir, config) = workspace(&ini("missing.csv", ""));
        let err = cli::execute(&config, None, None).unwrap_err();
        assert!(matches!(err, StratsimError::Csv { .. }));
    }
}

mod full_run {
    use super::*;

    #[test]
    fn preset_trades_round_trip() {
        let (_dir, config) = workspace(&ini("prices.csv", ""));
        let result = cli::execute(&config, None, None).unwrap();
        let strategy = &result.strategy;

        let acme = strategy.trades(Some("ACME"), None, None);
        assert_eq!(acme.len(), 2);
        assert_eq!(acme[0].qty, 10.0);
        assert_eq!(acme[0].price, 14.0);
        assert_eq!(acme[1].qty, -10.0);
        assert_eq!(acme[1].price, 6.0);

        let series = strategy.returns(None).unwrap();
        assert_eq!(series.equity.len(), 10);
        assert!(result.metrics.up_periods + result.metrics.down_periods <= 10);
        assert!(result.metrics.mdd_pct < 0.0);
    }

    #[test]
    fn commissions_reduce_equity() {
        let (_dir, free) = workspace(&ini("prices.csv", ""));
        let (_dir2, costly) = workspace(&ini("prices.csv", "commission_per_trade = 5\n"));
        let free = cli::execute(&free, None, None).unwrap();
        let costly = cli::execute(&costly, None, None).unwrap();

        let last = |r: &stratsim::domain::backtest::BacktestResult| {
            *r.strategy.returns(None).unwrap().equity.last().unwrap()
        };
        let fills = costly.strategy.trades(None, None, None).len() as f64;
        assert!((last(&free) - last(&costly) - 5.0 * fills).abs() < 1e-9);
    }

    #[test]
    fn date_range_limits_entries() {
        let config = ini("prices.csv", "").replace("[preset]", "start_date = 2024-03-05\n[preset]");
        let (_dir, config) = workspace(&config);
        let result = cli::execute(&config, None, None).unwrap();
        assert!(result.strategy.trades(Some("ACME"), None, None).is_empty());
    }

    #[test]
    fn prices_override_and_export() {
        let (dir, config) = workspace(&ini("missing.csv", ""));
        let prices = dir.path().join("prices.csv");
        let output = dir.path().join("out.csv");
        let result = cli::execute(&config, Some(&prices), Some(&output)).unwrap();

        let written = fs::read_to_string(&output).unwrap();
        let header = written.lines().next().unwrap();
        assert_eq!(
            header,
            "timestamp,entity,close,fast_ma,slow_ma,cross,position,price,net_pnl,i"
        );
        assert_eq!(written.lines().count(), 1 + 2 * result.strategy.timestamps().len());
    }
}

mod commands {
    use super::*;

    #[test]
    fn validate_accepts_good_config() {
        let (_dir, config) = workspace(&ini("prices.csv", ""));
        let cli = Cli::try_parse_from(["stratsim", "validate", "--config", config.to_str().unwrap()])
            .unwrap();
        assert_eq!(cli::run(cli), ExitCode::SUCCESS);
    }

    #[test]
    fn validate_reports_config_errors() {
        let (_dir, config) = workspace("[strategy]\nstarting_equity = 0\n");
        let cli = Cli::try_parse_from(["stratsim", "validate", "-c", config.to_str().unwrap()])
            .unwrap();
        assert_eq!(cli::run(cli), ExitCode::from(2));
    }

    #[test]
    fn run_command_succeeds() {
        let (_dir, config) = workspace(&ini("prices.csv", ""));
        let cli = Cli::try_parse_from(["stratsim", "run", "-c", config.to_str().unwrap()]).unwrap();
        assert_eq!(cli::run(cli), ExitCode::SUCCESS);
    }
}

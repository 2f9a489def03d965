//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{run_backtest, BacktestConfig, BacktestResult};
use crate::domain::config_validation::validate_config;
use crate::domain::error::StratsimError;
use crate::ports::data_port::PriceDataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "stratsim", about = "Event-driven trading strategy simulator")]
pub struct Cli {
    /// Log per-tick activity (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the moving-average crossover backtest
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Price CSV, overriding [data] prices
        #[arg(short, long)]
        prices: Option<PathBuf>,
        /// Write indicators, signals and P&L per tick to this CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run {
            config,
            prices,
            output,
        } => run_command(&config, prices.as_deref(), output.as_deref()),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Resolves the price file: the override as given, otherwise the configured
/// path relative to the config file's directory.
pub fn resolve_prices(
    config_path: &Path,
    config: &BacktestConfig,
    prices_override: Option<&Path>,
) -> Result<PathBuf, StratsimError> {
    if let Some(path) = prices_override {
        return Ok(path.to_path_buf());
    }
    let configured = config
        .prices
        .as_ref()
        .ok_or_else(|| StratsimError::ConfigMissing {
            section: "data".to_string(),
            key: "prices".to_string(),
        })?;
    let base = config_path.parent().unwrap_or_else(|| Path::new(""));
    Ok(base.join(configured))
}

/// Loads config and prices, runs the backtest and writes the optional export.
pub fn execute(
    config_path: &Path,
    prices_override: Option<&Path>,
    output_path: Option<&Path>,
) -> Result<BacktestResult, StratsimError> {
    let adapter = FileConfigAdapter::from_file(config_path)?;
    let config = BacktestConfig::from_config(&adapter)?;
    let prices_path = resolve_prices(config_path, &config, prices_override)?;

    let csv = CsvAdapter::new(PathBuf::new());
    let prices = csv.load_prices(&prices_path)?;
    let result = run_backtest(&config, prices)?;

    if let Some(output) = output_path {
        let table = result.strategy.data_frame(None, true, None, None)?;
        csv.write_table(&table, output)?;
    }
    Ok(result)
}

fn run_command(
    config_path: &Path,
    prices_override: Option<&Path>,
    output_path: Option<&Path>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let result = match execute(config_path, prices_override, output_path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let strategy = &result.strategy;
    let orders = strategy.orders(None, None, None);
    let trades = strategy.trades(None, None, None);
    println!(
        "{} entities, {} ticks, {} orders, {} trades",
        strategy.entities().len(),
        strategy.timestamps().len(),
        orders.len(),
        trades.len()
    );
    print!("{}", result.metrics);
    if let Some(output) = output_path {
        eprintln!("Wrote {}", output.display());
    }
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_config(&adapter) {
        eprintln!("error: {e}");
        return (&e).into();
    }
    eprintln!("Configuration is valid.");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::preset::CrossoverParams;

    fn config_with(prices: Option<&str>) -> BacktestConfig {
        BacktestConfig {
            starting_equity: 1_000.0,
            trade_lag: 0,
            run_final_calc: true,
            periods_per_year: None,
            prices: prices.map(PathBuf::from),
            start_date: None,
            end_date: None,
            preset: CrossoverParams::default(),
        }
    }

    #[test]
    fn prices_resolve_next_to_config() {
        let path = resolve_prices(
            Path::new("/runs/demo/config.ini"),
            &config_with(Some("prices.csv")),
            None,
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/runs/demo/prices.csv"));
    }

    #[test]
    fn override_wins() {
        let path = resolve_prices(
            Path::new("/runs/demo/config.ini"),
            &config_with(Some("prices.csv")),
            Some(Path::new("other.csv")),
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("other.csv"));
    }

    #[test]
    fn missing_prices_is_a_config_error() {
        let err = resolve_prices(Path::new("config.ini"), &config_with(None), None).unwrap_err();
        assert!(matches!(err, StratsimError::ConfigMissing { key, .. } if key == "prices"));
    }

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "stratsim", "run", "--config", "c.ini", "--output", "out.csv", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Run {
                config,
                prices,
                output,
            } => {
                assert_eq!(config, PathBuf::from("c.ini"));
                assert_eq!(prices, None);
                assert_eq!(output, Some(PathBuf::from("out.csv")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

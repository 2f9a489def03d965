//! Return metrics: pure functions over per-period returns, assembled through
//! the dependency evaluator.
//!
//! Every function tolerates empty input and answers NaN, `None` or an empty
//! vector instead of failing.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;

use super::error::StratsimError;
use super::evaluator::{Evaluator, MetricOutput, MetricValue};
use super::series::ensure_increasing;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Arithmetic mean ignoring NaN.
pub fn amean(returns: &[f64]) -> f64 {
    let finite: Vec<f64> = returns.iter().copied().filter(|r| !r.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

/// Population standard deviation ignoring NaN.
pub fn std(returns: &[f64]) -> f64 {
    let finite: Vec<f64> = returns.iter().copied().filter(|r| !r.is_nan()).collect();
    population_std(&finite)
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// 252 times the number of periods per day, inferred from the most common
/// spacing between consecutive timestamps. Ties go to the shorter spacing.
pub fn periods_per_year(dates: &[NaiveDateTime]) -> f64 {
    if dates.len() < 2 {
        return f64::NAN;
    }
    let mut spacing_counts: BTreeMap<i64, usize> = BTreeMap::new();
    for pair in dates.windows(2) {
        let seconds = (pair[1] - pair[0]).num_seconds();
        *spacing_counts.entry(seconds).or_default() += 1;
    }
    let mut typical = 0i64;
    let mut best = 0usize;
    for (&seconds, &count) in &spacing_counts {
        if count > best {
            best = count;
            typical = seconds;
        }
    }
    if typical <= 0 {
        return f64::NAN;
    }
    let spacing_days = typical as f64 / SECONDS_PER_DAY;
    TRADING_DAYS_PER_YEAR / spacing_days
}

/// Geometric mean return per period, annualized.
pub fn gmean(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() || !(periods_per_year > 0.0) {
        return f64::NAN;
    }
    let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
    let per_period = growth.powf(1.0 / returns.len() as f64);
    per_period.powf(periods_per_year) - 1.0
}

fn finite_or_zero(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .map(|&r| if r.is_finite() { r } else { 0.0 })
        .collect()
}

fn risk_adjusted(returns: &[f64], amean: f64, periods_per_year: f64, downside_only: bool) -> f64 {
    if returns.is_empty() || !amean.is_finite() || !(periods_per_year > 0.0) {
        return f64::NAN;
    }
    let mut cleaned = finite_or_zero(returns);
    if downside_only {
        for r in cleaned.iter_mut() {
            if *r > 0.0 {
                *r = 0.0;
            }
        }
    }
    let denominator = population_std(&cleaned);
    if denominator == 0.0 {
        return f64::NAN;
    }
    amean / denominator * periods_per_year.sqrt()
}

/// Sharpe ratio with a zero risk-free rate.
pub fn sharpe0(returns: &[f64], amean: f64, periods_per_year: f64) -> f64 {
    risk_adjusted(returns, amean, periods_per_year, false)
}

/// Like [`sharpe0`] but the denominator only sees returns clipped to `<= 0`.
pub fn sortino(returns: &[f64], amean: f64, periods_per_year: f64) -> f64 {
    risk_adjusted(returns, amean, periods_per_year, true)
}

/// `starting_equity * cumprod(1 + r)`.
pub fn equity(starting_equity: f64, returns: &[f64]) -> Vec<f64> {
    let mut level = starting_equity;
    returns
        .iter()
        .map(|r| {
            level *= 1.0 + r;
            level
        })
        .collect()
}

/// Drawdown from the running maximum as a non-positive fraction of it.
pub fn rolling_drawdown(equity: &[f64]) -> Vec<f64> {
    let mut running_max = f64::NEG_INFINITY;
    equity
        .iter()
        .map(|&e| {
            running_max = running_max.max(e);
            if e >= running_max {
                0.0
            } else {
                (e - running_max) / running_max
            }
        })
        .collect()
}

pub fn max_drawdown_pct(rolling_dd: &[f64]) -> f64 {
    if rolling_dd.is_empty() {
        return f64::NAN;
    }
    rolling_dd.iter().copied().fold(f64::INFINITY, f64::min)
}

fn argmin(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v >= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Date of the deepest drawdown (first occurrence).
pub fn max_drawdown_date(dates: &[NaiveDateTime], rolling_dd: &[f64]) -> Option<NaiveDateTime> {
    if dates.len() != rolling_dd.len() {
        return None;
    }
    argmin(rolling_dd).map(|i| dates[i])
}

/// Last date before `mdd_date` at which the drawdown was back to zero.
pub fn max_drawdown_start(
    dates: &[NaiveDateTime],
    rolling_dd: &[f64],
    mdd_date: Option<NaiveDateTime>,
) -> Option<NaiveDateTime> {
    let mdd_date = mdd_date?;
    dates
        .iter()
        .zip(rolling_dd)
        .filter(|&(date, &dd)| dd >= 0.0 && *date < mdd_date)
        .map(|(date, _)| *date)
        .last()
}

/// Annualized mean return over the (negative) max drawdown.
pub fn mar(returns: &[f64], periods_per_year: f64, mdd_pct: f64) -> f64 {
    if returns.is_empty() || mdd_pct.is_nan() || mdd_pct == 0.0 {
        return f64::NAN;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    mean * periods_per_year / mdd_pct
}

/// `last` with its year moved back by three. February 29 maps to February 28.
pub fn three_year_start(last: NaiveDateTime) -> NaiveDateTime {
    let year = last.year() - 3;
    let date = last
        .date()
        .with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, last.month(), 28))
        .unwrap_or(NaiveDate::MIN);
    date.and_time(last.time())
}

fn three_year_mask(dates: &[NaiveDateTime]) -> Option<NaiveDateTime> {
    dates.last().map(|&last| three_year_start(last))
}

/// Dates on or after the three-year start.
pub fn dates_3yr(dates: &[NaiveDateTime]) -> Vec<NaiveDateTime> {
    match three_year_mask(dates) {
        Some(start) => dates.iter().copied().filter(|d| *d >= start).collect(),
        None => Vec::new(),
    }
}

pub fn returns_3yr(dates: &[NaiveDateTime], returns: &[f64]) -> Vec<f64> {
    match three_year_mask(dates) {
        Some(start) => dates
            .iter()
            .zip(returns)
            .filter(|&(d, _)| *d >= start)
            .map(|(_, &r)| r)
            .collect(),
        None => Vec::new(),
    }
}

/// Drawdown recomputed from the windowed equity, so its running max only
/// sees the last three years.
pub fn rolling_drawdown_3yr(
    dates: &[NaiveDateTime],
    equity: &[f64],
) -> (Vec<NaiveDateTime>, Vec<f64>) {
    let Some(start) = three_year_mask(dates) else {
        return (Vec::new(), Vec::new());
    };
    let (window_dates, window_equity): (Vec<NaiveDateTime>, Vec<f64>) = dates
        .iter()
        .zip(equity)
        .filter(|&(d, _)| *d >= start)
        .map(|(d, e)| (*d, *e))
        .unzip();
    let dd = rolling_drawdown(&window_equity);
    (window_dates, dd)
}

/// Raw returns grouped by calendar year.
pub fn bucketed_returns(dates: &[NaiveDateTime], returns: &[f64]) -> (Vec<i32>, Vec<Vec<f64>>) {
    let mut by_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for (date, &r) in dates.iter().zip(returns) {
        by_year.entry(date.year()).or_default().push(r);
    }
    by_year.into_iter().unzip()
}

/// Annualized geometric mean return per calendar year.
pub fn annual_returns(
    dates: &[NaiveDateTime],
    returns: &[f64],
    periods_per_year: f64,
) -> (Vec<i32>, Vec<f64>) {
    let (years, groups) = bucketed_returns(dates, returns);
    let values = groups
        .iter()
        .map(|group| gmean(group, periods_per_year))
        .collect();
    (years, values)
}

pub fn up_periods(returns: &[f64]) -> usize {
    returns.iter().filter(|&&r| r > 0.0).count()
}

pub fn down_periods(returns: &[f64]) -> usize {
    returns.iter().filter(|&&r| r < 0.0).count()
}

fn float(v: f64) -> Result<MetricOutput, StratsimError> {
    Ok(MetricValue::Float(v).into())
}

/// Builds and computes the standard return metrics.
///
/// `periods_per_year` overrides the inferred frequency when positive.
/// Non-finite returns are treated as zero.
pub fn compute_return_metrics(
    dates: &[NaiveDateTime],
    returns: &[f64],
    starting_equity: f64,
    periods_per_year: Option<f64>,
) -> Result<Evaluator, StratsimError> {
    if !(starting_equity > 0.0) {
        return Err(StratsimError::NonPositiveEquity {
            value: starting_equity,
        });
    }
    if dates.len() != returns.len() {
        return Err(StratsimError::InputLength {
            what: "returns".to_string(),
            expected: dates.len(),
            actual: returns.len(),
        });
    }
    ensure_increasing(dates)?;

    let mut seed = vec![
        ("dates".to_string(), MetricValue::Timestamps(dates.to_vec())),
        (
            "returns".to_string(),
            MetricValue::Floats(finite_or_zero(returns)),
        ),
        (
            "starting_equity".to_string(),
            MetricValue::Float(starting_equity),
        ),
    ];
    if let Some(ppy) = periods_per_year.filter(|p| *p > 0.0) {
        seed.push(("periods_per_year".to_string(), MetricValue::Float(ppy)));
    }

    let mut ev = Evaluator::new(seed);
    register_return_metrics(&mut ev);
    ev.compute(None)?;
    tracing::debug!(periods = dates.len(), "computed return metrics");
    Ok(ev)
}

fn register_return_metrics(ev: &mut Evaluator) {
    ev.add_scalar_metric(
        "periods_per_year",
        |i| float(periods_per_year(i.timestamps("dates")?)),
        &["dates"],
    );
    ev.add_scalar_metric("amean", |i| float(amean(i.floats("returns")?)), &["returns"]);
    ev.add_scalar_metric("std", |i| float(std(i.floats("returns")?)), &["returns"]);
    ev.add_scalar_metric(
        "up_periods",
        |i| Ok(MetricValue::Count(up_periods(i.floats("returns")?)).into()),
        &["returns"],
    );
    ev.add_scalar_metric(
        "down_periods",
        |i| Ok(MetricValue::Count(down_periods(i.floats("returns")?)).into()),
        &["returns"],
    );
    ev.add_scalar_metric(
        "up_pct",
        |i| {
            let up = i.count("up_periods")?;
            let down = i.count("down_periods")?;
            if up + down == 0 {
                float(f64::NAN)
            } else {
                float(up as f64 / (up + down) as f64)
            }
        },
        &["up_periods", "down_periods"],
    );
    ev.add_scalar_metric(
        "gmean",
        |i| float(gmean(i.floats("returns")?, i.float("periods_per_year")?)),
        &["returns", "periods_per_year"],
    );
    ev.add_scalar_metric(
        "sharpe0",
        |i| {
            float(sharpe0(
                i.floats("returns")?,
                i.float("amean")?,
                i.float("periods_per_year")?,
            ))
        },
        &["returns", "periods_per_year", "amean"],
    );
    ev.add_scalar_metric(
        "sortino",
        |i| {
            float(sortino(
                i.floats("returns")?,
                i.float("amean")?,
                i.float("periods_per_year")?,
            ))
        },
        &["returns", "periods_per_year", "amean"],
    );
    ev.add_scalar_metric(
        "equity",
        |i| {
            Ok(MetricValue::Floats(equity(
                i.float("starting_equity")?,
                i.floats("returns")?,
            ))
            .into())
        },
        &["starting_equity", "returns"],
    );

    ev.add_rolling_metric(
        "rolling_dd",
        |i| {
            let dates = i.timestamps("dates")?;
            let dd = rolling_drawdown(i.floats("equity")?);
            Ok(MetricOutput::rolling(dates.to_vec(), MetricValue::Floats(dd)))
        },
        &["dates", "equity"],
    );
    ev.add_scalar_metric(
        "mdd_pct",
        |i| float(max_drawdown_pct(i.floats("rolling_dd")?)),
        &["rolling_dd"],
    );
    ev.add_scalar_metric(
        "mdd_date",
        |i| {
            let date = max_drawdown_date(i.timestamps("rolling_dd_dates")?, i.floats("rolling_dd")?);
            Ok(MetricValue::Date(date).into())
        },
        &["rolling_dd_dates", "rolling_dd"],
    );
    ev.add_scalar_metric(
        "mdd_start",
        |i| {
            let start = max_drawdown_start(
                i.timestamps("rolling_dd_dates")?,
                i.floats("rolling_dd")?,
                i.date("mdd_date")?,
            );
            Ok(MetricValue::Date(start).into())
        },
        &["rolling_dd_dates", "rolling_dd", "mdd_date"],
    );
    ev.add_scalar_metric(
        "mar",
        |i| {
            float(mar(
                i.floats("returns")?,
                i.float("periods_per_year")?,
                i.float("mdd_pct")?,
            ))
        },
        &["returns", "periods_per_year", "mdd_pct"],
    );

    ev.add_scalar_metric(
        "dates_3yr",
        |i| Ok(MetricValue::Timestamps(dates_3yr(i.timestamps("dates")?)).into()),
        &["dates"],
    );
    ev.add_scalar_metric(
        "returns_3yr",
        |i| {
            Ok(MetricValue::Floats(returns_3yr(i.timestamps("dates")?, i.floats("returns")?)).into())
        },
        &["dates", "returns"],
    );
    ev.add_rolling_metric(
        "rolling_dd_3yr",
        |i| {
            let (dates, dd) = rolling_drawdown_3yr(i.timestamps("dates")?, i.floats("equity")?);
            Ok(MetricOutput::rolling(dates, MetricValue::Floats(dd)))
        },
        &["dates", "equity"],
    );
    ev.add_scalar_metric(
        "mdd_pct_3yr",
        |i| float(max_drawdown_pct(i.floats("rolling_dd_3yr")?)),
        &["rolling_dd_3yr"],
    );
    ev.add_scalar_metric(
        "mdd_date_3yr",
        |i| {
            let date = max_drawdown_date(
                i.timestamps("rolling_dd_3yr_dates")?,
                i.floats("rolling_dd_3yr")?,
            );
            Ok(MetricValue::Date(date).into())
        },
        &["rolling_dd_3yr_dates", "rolling_dd_3yr"],
    );
    ev.add_scalar_metric(
        "mdd_start_3yr",
        |i| {
            let start = max_drawdown_start(
                i.timestamps("rolling_dd_3yr_dates")?,
                i.floats("rolling_dd_3yr")?,
                i.date("mdd_date_3yr")?,
            );
            Ok(MetricValue::Date(start).into())
        },
        &["rolling_dd_3yr_dates", "rolling_dd_3yr", "mdd_date_3yr"],
    );
    ev.add_scalar_metric(
        "calmar",
        |i| {
            float(mar(
                i.floats("returns_3yr")?,
                i.float("periods_per_year")?,
                i.float("mdd_pct_3yr")?,
            ))
        },
        &["returns_3yr", "periods_per_year", "mdd_pct_3yr"],
    );

    ev.add_bucketed_metric(
        "annual_returns",
        |i| {
            let (years, values) = annual_returns(
                i.timestamps("dates")?,
                i.floats("returns")?,
                i.float("periods_per_year")?,
            );
            Ok(MetricOutput::bucketed(
                MetricValue::Years(years),
                MetricValue::Floats(values),
            ))
        },
        &["dates", "returns", "periods_per_year"],
    );
    ev.add_bucketed_metric(
        "bucketed_returns",
        |i| {
            let (years, groups) = bucketed_returns(i.timestamps("dates")?, i.floats("returns")?);
            Ok(MetricOutput::bucketed(
                MetricValue::Years(years),
                MetricValue::Groups(groups),
            ))
        },
        &["dates", "returns"],
    );
}

/// Typed summary of the computed return metrics, for reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMetrics {
    pub periods_per_year: f64,
    pub gmean: f64,
    pub amean: f64,
    pub std: f64,
    pub sharpe0: f64,
    pub sortino: f64,
    pub mar: f64,
    pub calmar: f64,
    pub mdd_pct: f64,
    pub mdd_start: Option<NaiveDateTime>,
    pub mdd_date: Option<NaiveDateTime>,
    pub mdd_pct_3yr: f64,
    pub mdd_start_3yr: Option<NaiveDateTime>,
    pub mdd_date_3yr: Option<NaiveDateTime>,
    pub up_periods: usize,
    pub down_periods: usize,
    pub up_pct: f64,
    pub annual_returns: Vec<(i32, f64)>,
}

impl ReturnMetrics {
    pub fn from_evaluator(ev: &Evaluator) -> Result<Self, StratsimError> {
        let years = ev.years("annual_returns_buckets")?;
        let values = ev.floats("annual_returns")?;
        Ok(ReturnMetrics {
            periods_per_year: ev.scalar("periods_per_year")?,
            gmean: ev.scalar("gmean")?,
            amean: ev.scalar("amean")?,
            std: ev.scalar("std")?,
            sharpe0: ev.scalar("sharpe0")?,
            sortino: ev.scalar("sortino")?,
            mar: ev.scalar("mar")?,
            calmar: ev.scalar("calmar")?,
            mdd_pct: ev.scalar("mdd_pct")?,
            mdd_start: ev.date("mdd_start")?,
            mdd_date: ev.date("mdd_date")?,
            mdd_pct_3yr: ev.scalar("mdd_pct_3yr")?,
            mdd_start_3yr: ev.date("mdd_start_3yr")?,
            mdd_date_3yr: ev.date("mdd_date_3yr")?,
            up_periods: ev.count("up_periods")?,
            down_periods: ev.count("down_periods")?,
            up_pct: ev.scalar("up_pct")?,
            annual_returns: years.iter().copied().zip(values.iter().copied()).collect(),
        })
    }
}

fn fmt_date(date: Option<NaiveDateTime>) -> String {
    date.map(|d| d.date().to_string())
        .unwrap_or_else(|| "NaT".to_string())
}

impl fmt::Display for ReturnMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "gmean      {:.4}", self.gmean)?;
        writeln!(f, "amean      {:.6}", self.amean)?;
        writeln!(f, "std        {:.6}", self.std)?;
        writeln!(f, "sharpe0    {:.4}", self.sharpe0)?;
        writeln!(f, "sortino    {:.4}", self.sortino)?;
        writeln!(f, "mar        {:.4}", self.mar)?;
        writeln!(f, "calmar     {:.4}", self.calmar)?;
        writeln!(
            f,
            "mdd        {:.4} ({}/{})",
            self.mdd_pct,
            fmt_date(self.mdd_start),
            fmt_date(self.mdd_date)
        )?;
        writeln!(
            f,
            "mdd 3y     {:.4} ({}/{})",
            self.mdd_pct_3yr,
            fmt_date(self.mdd_start_3yr),
            fmt_date(self.mdd_date_3yr)
        )?;
        writeln!(
            f,
            "up/down    {}/{}/{:.3}",
            self.up_periods, self.down_periods, self.up_pct
        )?;
        for (year, ret) in &self.annual_returns {
            writeln!(f, "{year}       {ret:.4}")?;
        }
        Ok(())
    }
}

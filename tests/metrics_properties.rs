//! Property and scenario tests for the return metrics.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;
use stratsim::domain::evaluator::{Evaluator, MetricValue};
use stratsim::domain::metrics::{compute_return_metrics, equity, rolling_drawdown, ReturnMetrics};

fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn arb_returns() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.5f64..0.5, 1..200)
}

proptest! {
    /// equity[0] = start * (1 + r0) and each step compounds the next return.
    #[test]
    fn equity_compounds(returns in arb_returns(), start in 1.0f64..1e6) {
        let eq = equity(start, &returns);
        prop_assert_eq!(eq.len(), returns.len());
        let first = start * (1.0 + returns[0]);
        prop_assert!((eq[0] - first).abs() <= 1e-9 * first.abs().max(1.0));
        for i in 1..eq.len() {
            let expected = eq[i - 1] * (1.0 + returns[i]);
            prop_assert!((eq[i] - expected).abs() <= 1e-9 * expected.abs().max(1.0));
        }
    }

    /// Drawdown is never positive and is zero exactly at new highs.
    #[test]
    fn drawdown_non_positive(returns in arb_returns()) {
        let eq = equity(100.0, &returns);
        let dd = rolling_drawdown(&eq);
        let mut running_max = f64::NEG_INFINITY;
        for (e, d) in eq.iter().zip(&dd) {
            running_max = running_max.max(*e);
            prop_assert!(*d <= 0.0);
            if *e == running_max {
                prop_assert_eq!(*d, 0.0);
            }
        }
    }
}

#[test]
fn empty_returns_give_nan_and_empty_pairs() {
    let ev = compute_return_metrics(&[], &[], 100.0, None).unwrap();
    for name in [
        "periods_per_year",
        "amean",
        "std",
        "gmean",
        "sharpe0",
        "sortino",
        "mdd_pct",
        "mar",
        "calmar",
        "up_pct",
        "mdd_pct_3yr",
    ] {
        assert!(ev.scalar(name).unwrap().is_nan(), "{name} should be NaN");
    }
    assert!(ev.floats("rolling_dd").unwrap().is_empty());
    assert!(ev.timestamps("rolling_dd_dates").unwrap().is_empty());
    assert!(ev.floats("annual_returns").unwrap().is_empty());
    assert!(ev.years("annual_returns_buckets").unwrap().is_empty());
    assert_eq!(ev.date("mdd_date").unwrap(), None);

    let summary = ReturnMetrics::from_evaluator(&ev).unwrap();
    assert!(summary.annual_returns.is_empty());
    assert_eq!(summary.up_periods, 0);
}

#[test]
fn three_years_and_a_day_keeps_first_return() {
    let first = day(2020, 1, 1);
    let last = day(2023, 1, 1);
    let n = (last - first).num_days() as usize + 1;
    let dates: Vec<NaiveDateTime> = (0..n).map(|i| first + Duration::days(i as i64)).collect();
    let mut returns = vec![0.0; n];
    returns[0] = 0.05;

    let ev = compute_return_metrics(&dates, &returns, 100.0, None).unwrap();
    let window = ev.timestamps("dates_3yr").unwrap();
    assert_eq!(window.first(), Some(&first));
    assert_eq!(ev.floats("returns_3yr").unwrap()[0], 0.05);

    let mut earlier = vec![first - Duration::days(1)];
    earlier.extend_from_slice(&dates);
    let returns = vec![0.01; earlier.len()];
    let ev = compute_return_metrics(&earlier, &returns, 100.0, None).unwrap();
    assert_eq!(ev.timestamps("dates_3yr").unwrap().first(), Some(&first));
    assert_eq!(ev.floats("returns_3yr").unwrap().len(), n);
}

#[test]
fn computing_twice_is_stable_and_runs_each_metric_once() {
    let calls = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&calls);
    let mut ev = Evaluator::new([("x".to_string(), MetricValue::Float(2.0))]);
    ev.add_scalar_metric(
        "double",
        move |i| {
            counter.set(counter.get() + 1);
            Ok(MetricValue::Float(i.float("x")? * 2.0).into())
        },
        &["x"],
    );
    ev.add_scalar_metric(
        "quad",
        |i| Ok(MetricValue::Float(i.float("double")? * 2.0).into()),
        &["double"],
    );

    ev.compute(None).unwrap();
    ev.compute(None).unwrap();
    ev.compute(Some(&["quad"])).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(ev.scalar("quad").unwrap(), 8.0);

    let dates: Vec<NaiveDateTime> = (0..30).map(|i| day(2021, 1, 1) + Duration::days(i)).collect();
    let returns: Vec<f64> = (0..30).map(|i| ((i % 7) as f64 - 3.0) / 100.0).collect();
    let a = compute_return_metrics(&dates, &returns, 1_000.0, None).unwrap();
    let b = compute_return_metrics(&dates, &returns, 1_000.0, None).unwrap();
    let a = ReturnMetrics::from_evaluator(&a).unwrap();
    let b = ReturnMetrics::from_evaluator(&b).unwrap();
    assert_eq!(format!("{a:?}"), format!("{b:?}"));
}

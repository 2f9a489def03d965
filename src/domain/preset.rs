//! Built-in moving-average crossover strategy used by the command line.
//!
//! Indicators `close`, `fast_ma` and `slow_ma`; signal `cross` is `1` when
//! the fast average crosses above the slow one, `-1` when it crosses below
//! and `0` otherwise. `enter_long` buys a fixed size while flat and
//! `exit_long` sells the whole position while long. Orders fill at the
//! close through the `fill_at_close` market simulator.

use chrono::NaiveDateTime;

use super::error::{CallbackError, StratsimError};
use super::ledger::SimpleLedger;
use super::order::{Order, OrderKind, Trade};
use super::prices::PriceTable;
use super::series::{Series, SignalValue};
use super::strategy::{MarketSimCall, RuleCall, Strategy};

#[derive(Debug, Clone, PartialEq)]
pub struct CrossoverParams {
    pub fast_period: usize,
    pub slow_period: usize,
    pub order_size: f64,
    pub commission_per_trade: f64,
    /// Percentage of traded value, e.g. `0.1` for 0.1%.
    pub commission_pct: f64,
}

impl Default for CrossoverParams {
    fn default() -> Self {
        CrossoverParams {
            fast_period: 10,
            slow_period: 30,
            order_size: 100.0,
            commission_per_trade: 0.0,
            commission_pct: 0.0,
        }
    }
}

impl CrossoverParams {
    pub fn validate(&self) -> Result<(), StratsimError> {
        if self.fast_period == 0 {
            return Err(invalid("fast_period", "must be positive"));
        }
        if self.slow_period <= self.fast_period {
            return Err(invalid("slow_period", "must be greater than fast_period"));
        }
        if !(self.order_size > 0.0) {
            return Err(invalid("order_size", "must be positive"));
        }
        if self.commission_per_trade < 0.0 || self.commission_pct < 0.0 {
            return Err(invalid("commission", "must not be negative"));
        }
        Ok(())
    }

    /// Fee charged on a fill worth `trade_value`.
    pub fn commission(&self, trade_value: f64) -> f64 {
        self.commission_per_trade + trade_value.abs() * self.commission_pct / 100.0
    }
}

fn invalid(key: &str, reason: &str) -> StratsimError {
    StratsimError::ConfigInvalid {
        section: "preset".to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// State shared by the preset's callbacks.
#[derive(Debug, Clone)]
pub struct CrossoverContext {
    pub prices: PriceTable,
    pub params: CrossoverParams,
    pub trade_lag: usize,
    pub fills: usize,
}

/// Trailing mean over `period` values. NaN until the window is full or
/// while it contains a NaN.
pub fn simple_moving_average(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < period {
                return f64::NAN;
            }
            let window = &values[i + 1 - period..=i];
            window.iter().sum::<f64>() / period as f64
        })
        .collect()
}

/// `1` on an upward cross of `fast` over `slow`, `-1` on a downward cross,
/// `0` otherwise. NaN where either side is missing at this or the previous
/// tick.
pub fn crossover(fast: &[f64], slow: &[f64]) -> Vec<f64> {
    let n = fast.len().min(slow.len());
    let diff: Vec<f64> = (0..n).map(|i| fast[i] - slow[i]).collect();
    (0..n)
        .map(|i| {
            if i == 0 || diff[i].is_nan() || diff[i - 1].is_nan() {
                f64::NAN
            } else if diff[i - 1] <= 0.0 && diff[i] > 0.0 {
                1.0
            } else if diff[i - 1] >= 0.0 && diff[i] < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
        .collect()
}

fn close_prices(
    entity: &str,
    ctx: &CrossoverContext,
) -> Result<Series, CallbackError> {
    ctx.prices
        .series(entity)
        .map(|p| Series::from(p.to_vec()))
        .ok_or_else(|| format!("no prices for {entity}").into())
}

fn enter_long(call: RuleCall<'_, CrossoverContext>) -> Result<Vec<Order>, CallbackError> {
    let size = call.context.params.order_size;
    let order = Order::market(call.entity, call.timestamps[call.index], size)
        .with_reason("enter_long");
    Ok(vec![order])
}

fn exit_long(call: RuleCall<'_, CrossoverContext>) -> Result<Vec<Order>, CallbackError> {
    let now = call.timestamps[call.index];
    let position = call.ledger.position(call.entity, now);
    Ok(vec![Order::market(call.entity, now, -position).with_reason("exit_long")])
}

/// Fills every order that has waited out the trade lag at the tick's close,
/// or the last valid price before it. Limit orders fill only at or through
/// their limit.
fn fill_at_close(call: MarketSimCall<'_, CrossoverContext>) -> Result<Vec<Trade>, CallbackError> {
    let now = call.timestamps[call.index];
    let ctx = call.context;
    let mut trades = Vec::new();
    for order in call.orders.iter_mut() {
        let created = created_at(call.timestamps, order.timestamp);
        if call.index < created + ctx.trade_lag {
            continue;
        }
        let Some(price) = ctx.prices.last_valid_price(&order.entity, call.index) else {
            continue;
        };
        let qty = order.remaining_qty();
        if let OrderKind::Limit { price: limit } = order.kind {
            if (qty > 0.0 && price > limit) || (qty < 0.0 && price < limit) {
                continue;
            }
        }
        let fee = ctx.params.commission(qty * price);
        trades.push(Trade::for_order(order, qty, price, fee, now));
        order.fill(qty);
        ctx.fills += 1;
    }
    Ok(trades)
}

fn created_at(timestamps: &[NaiveDateTime], timestamp: NaiveDateTime) -> usize {
    timestamps.partition_point(|t| *t < timestamp)
}

/// Wires the crossover preset over every entity in `prices`.
pub fn build_sma_crossover(
    prices: PriceTable,
    starting_equity: f64,
    trade_lag: usize,
    params: CrossoverParams,
) -> Result<Strategy<CrossoverContext>, StratsimError> {
    params.validate()?;
    let timestamps = prices.timestamps.clone();
    let entities = prices.entities.clone();
    let ledger = SimpleLedger::new(prices.clone(), starting_equity)?;
    let (fast, slow) = (params.fast_period, params.slow_period);
    let context = CrossoverContext {
        prices,
        params,
        trade_lag,
        fills: 0,
    };

    let mut strategy = Strategy::new(timestamps, entities, Box::new(ledger), context)?
        .with_trade_lag(trade_lag);

    strategy.add_indicator("close", |entity, _, _, ctx| close_prices(entity, ctx), None, None)?;
    strategy.add_indicator(
        "fast_ma",
        move |_, _, parents, _| Ok(Series::from(simple_moving_average(parents.numeric("close")?, fast))),
        None,
        Some(&["close"]),
    )?;
    strategy.add_indicator(
        "slow_ma",
        move |_, _, parents, _| Ok(Series::from(simple_moving_average(parents.numeric("close")?, slow))),
        None,
        Some(&["close"]),
    )?;
    strategy.add_signal(
        "cross",
        |_, _, indicators, _, _| {
            Ok(Series::from(crossover(
                indicators.numeric("fast_ma")?,
                indicators.numeric("slow_ma")?,
            )))
        },
        None,
        Some(&["fast_ma", "slow_ma"]),
        None,
    )?;
    strategy.add_rule(
        "exit_long",
        exit_long,
        "cross",
        Some(&[SignalValue::Number(-1.0)]),
        Some("positive"),
    )?;
    strategy.add_rule(
        "enter_long",
        enter_long,
        "cross",
        Some(&[SignalValue::Number(1.0)]),
        Some("zero"),
    )?;
    strategy.add_market_sim("fill_at_close", fill_at_close);
    Ok(strategy)
}

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use stratsim::domain::error::CallbackError;
use stratsim::domain::ledger::SimpleLedger;
use stratsim::domain::order::{Order, Trade};
use stratsim::domain::prices::PriceTable;
use stratsim::domain::series::Series;
use stratsim::domain::strategy::{MarketSimCall, Strategy};

pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// `n` consecutive midnights from 2024-01-01.
pub fn daily(n: u32) -> Vec<NaiveDateTime> {
    (1..=n).map(|d| at(d, 0)).collect()
}

/// One price column per entity, every price `price`.
pub fn flat_prices(timestamps: &[NaiveDateTime], entities: &[&str], price: f64) -> PriceTable {
    PriceTable::new(
        timestamps.to_vec(),
        entities
            .iter()
            .map(|e| (e.to_string(), vec![price; timestamps.len()]))
            .collect(),
    )
    .unwrap()
}

/// Strategy over `prices` with a [`SimpleLedger`] and the given context.
pub fn make_strategy<C>(prices: PriceTable, starting_equity: f64, context: C) -> Strategy<C> {
    let timestamps = prices.timestamps.clone();
    let entities = prices.entities.clone();
    let ledger = SimpleLedger::new(prices, starting_equity).unwrap();
    Strategy::new(timestamps, entities, Box::new(ledger), context).unwrap()
}

/// Registers a boolean signal `name` with the same values for every entity.
pub fn add_bool_signal<C: 'static>(strategy: &mut Strategy<C>, name: &str, values: Vec<bool>) {
    strategy
        .add_signal(
            name,
            move |_, _, _, _, _| Ok(Series::from(values.clone())),
            None,
            None,
            None,
        )
        .unwrap();
}

/// Market simulator filling every order older than `lag` ticks in full at
/// `price`, without fees.
pub fn fill_all<C>(
    lag: usize,
    price: f64,
) -> impl FnMut(MarketSimCall<'_, C>) -> Result<Vec<Trade>, CallbackError> + 'static
where
    C: 'static,
{
    move |call: MarketSimCall<'_, C>| {
        let now = call.timestamps[call.index];
        let mut trades = Vec::new();
        for order in call.orders.iter_mut() {
            let created = call.timestamps.partition_point(|t| *t < order.timestamp);
            if call.index < created + lag {
                continue;
            }
            let qty = order.remaining_qty();
            trades.push(Trade::for_order(order, qty, price, 0.0, now));
            order.fill(qty);
        }
        Ok(trades)
    }
}

/// Market simulator that never fills.
pub fn never_fill<C>(_call: MarketSimCall<'_, C>) -> Result<Vec<Trade>, CallbackError> {
    Ok(Vec::new())
}

pub fn buy(entity: &str, timestamp: NaiveDateTime, qty: f64) -> Order {
    Order::market(entity, timestamp, qty)
}

//! Cash and position ledger marked to market from a price table.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use super::error::StratsimError;
use super::order::Trade;
use super::prices::PriceTable;
use crate::ports::ledger_port::Ledger;

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PnlPoint {
    pub timestamp: NaiveDateTime,
    pub entity: String,
    pub position: f64,
    pub price: f64,
    /// Cumulative cash flow plus marked position value.
    pub net_pnl: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Holding {
    position: f64,
    cash_flow: f64,
}

#[derive(Debug, Clone)]
pub struct SimpleLedger {
    prices: PriceTable,
    starting_equity: f64,
    trades: Vec<Trade>,
    /// Per entity, `(timestamp, net position after the trade)` in timestamp
    /// order.
    positions: HashMap<String, Vec<(NaiveDateTime, f64)>>,
    equity_curve: Vec<EquityPoint>,
    pnl: Vec<PnlPoint>,
}

impl SimpleLedger {
    pub fn new(prices: PriceTable, starting_equity: f64) -> Result<Self, StratsimError> {
        if !(starting_equity > 0.0) {
            return Err(StratsimError::NonPositiveEquity {
                value: starting_equity,
            });
        }
        Ok(SimpleLedger {
            prices,
            starting_equity,
            trades: Vec::new(),
            positions: HashMap::new(),
            equity_curve: Vec::new(),
            pnl: Vec::new(),
        })
    }
}

impl Ledger for SimpleLedger {
    fn position(&self, entity: &str, timestamp: NaiveDateTime) -> f64 {
        let Some(history) = self.positions.get(entity) else {
            return 0.0;
        };
        match history.partition_point(|(t, _)| *t <= timestamp) {
            0 => 0.0,
            n => history[n - 1].1,
        }
    }

    fn add_trades(&mut self, trades: &[Trade]) {
        for trade in trades {
            let history = self.positions.entry(trade.entity.clone()).or_default();
            let at = history.partition_point(|(t, _)| *t <= trade.timestamp);
            let before = at.checked_sub(1).map_or(0.0, |j| history[j].1);
            history.insert(at, (trade.timestamp, before + trade.qty));
            // Back-dated trades shift every later running total.
            for entry in &mut history[at + 1..] {
                entry.1 += trade.qty;
            }
        }
        self.trades.extend_from_slice(trades);
    }

    /// Recomputes every mark from the first timestamp through `timestamp`.
    fn calc(&mut self, timestamp: NaiveDateTime) {
        self.equity_curve.clear();
        self.pnl.clear();
        let Some(last) = self.prices.index_at_or_before(timestamp) else {
            return;
        };

        let mut trades: Vec<&Trade> = self.trades.iter().collect();
        trades.sort_by_key(|t| t.timestamp);
        let mut pending = trades.into_iter().peekable();
        let mut holdings: HashMap<&str, Holding> = self
            .prices
            .entities
            .iter()
            .map(|e| (e.as_str(), Holding::default()))
            .collect();

        for i in 0..=last {
            let now = self.prices.timestamps[i];
            while let Some(trade) = pending.next_if(|t| t.timestamp <= now) {
                let holding = holdings.entry(trade.entity.as_str()).or_default();
                holding.position += trade.qty;
                holding.cash_flow += trade.cash_flow();
            }

            let mut equity = self.starting_equity;
            for entity in &self.prices.entities {
                let holding = holdings.get(entity.as_str()).copied().unwrap_or_default();
                let price = self.prices.last_valid_price(entity, i).unwrap_or(f64::NAN);
                let mark = if holding.position == 0.0 {
                    0.0
                } else {
                    holding.position * price
                };
                let net_pnl = holding.cash_flow + mark;
                equity += net_pnl;
                self.pnl.push(PnlPoint {
                    timestamp: now,
                    entity: entity.clone(),
                    position: holding.position,
                    price,
                    net_pnl,
                });
            }
            self.equity_curve.push(EquityPoint {
                timestamp: now,
                equity,
            });
        }
        tracing::debug!(through = %timestamp, points = self.equity_curve.len(), "ledger marked to market");
    }

    fn starting_equity(&self) -> f64 {
        self.starting_equity
    }

    fn equity_curve(&self) -> Vec<EquityPoint> {
        self.equity_curve.clone()
    }

    fn pnl(&self, entity: Option<&str>) -> Vec<PnlPoint> {
        self.pnl
            .iter()
            .filter(|p| entity.is_none_or(|e| p.entity == e))
            .cloned()
            .collect()
    }
}

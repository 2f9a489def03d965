//! Position ledger port trait.

use chrono::NaiveDateTime;

use crate::domain::ledger::{EquityPoint, PnlPoint};
use crate::domain::order::Trade;

/// Account state the simulation reads positions from and posts trades to.
pub trait Ledger {
    /// Net position in `entity` from trades stamped at or before `timestamp`.
    fn position(&self, entity: &str, timestamp: NaiveDateTime) -> f64;

    fn add_trades(&mut self, trades: &[Trade]);

    /// Marks the account to market up to and including `timestamp`.
    fn calc(&mut self, timestamp: NaiveDateTime);

    fn starting_equity(&self) -> f64;

    /// Equity per calculated timestamp.
    fn equity_curve(&self) -> Vec<EquityPoint>;

    /// Per-entity P&L rows, for one entity or all of them.
    fn pnl(&self, entity: Option<&str>) -> Vec<PnlPoint>;
}

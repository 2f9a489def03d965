//! Orders and trades exchanged between rules, market simulators and the ledger.

use chrono::NaiveDateTime;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    /// Expires once the calendar date moves past the creation date.
    Day,
    /// Fill or kill: cancelled if not filled at its first eligible tick.
    Fok,
    /// Good till cancelled.
    Gtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    CancelRequested,
    Cancelled,
    Filled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::CancelRequested => "cancel_requested",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Filled => "filled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Assigned by the simulation when the order is submitted.
    pub id: usize,
    pub entity: String,
    /// Signed: positive buys, negative sells.
    pub qty: f64,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub timestamp: NaiveDateTime,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub reason_code: String,
}

impl Order {
    pub fn market(entity: &str, timestamp: NaiveDateTime, qty: f64) -> Self {
        Order {
            id: 0,
            entity: entity.to_string(),
            qty,
            kind: OrderKind::Market,
            time_in_force: TimeInForce::Fok,
            timestamp,
            status: OrderStatus::Open,
            filled_qty: 0.0,
            reason_code: String::new(),
        }
    }

    pub fn limit(entity: &str, timestamp: NaiveDateTime, qty: f64, price: f64) -> Self {
        Order {
            kind: OrderKind::Limit { price },
            time_in_force: TimeInForce::Day,
            ..Order::market(entity, timestamp, qty)
        }
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    pub fn with_reason(mut self, reason_code: &str) -> Self {
        self.reason_code = reason_code.to_string();
        self
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Open | OrderStatus::PartiallyFilled | OrderStatus::CancelRequested
        )
    }

    pub fn cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
    }

    /// Asks the simulation to cancel at the next policy pass.
    pub fn request_cancel(&mut self) {
        if self.is_open() {
            self.status = OrderStatus::CancelRequested;
        }
    }

    pub fn remaining_qty(&self) -> f64 {
        self.qty - self.filled_qty
    }

    /// Records a fill of `qty` (same sign as the order).
    pub fn fill(&mut self, qty: f64) {
        self.filled_qty += qty;
        if self.remaining_qty().abs() <= 1e-9 * self.qty.abs().max(1.0) {
            self.status = OrderStatus::Filled;
        } else if self.status != OrderStatus::CancelRequested {
            self.status = OrderStatus::PartiallyFilled;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub order_id: usize,
    pub entity: String,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub timestamp: NaiveDateTime,
}

impl Trade {
    /// A trade filling `qty` of `order`.
    pub fn for_order(order: &Order, qty: f64, price: f64, fee: f64, timestamp: NaiveDateTime) -> Self {
        Trade {
            order_id: order.id,
            entity: order.entity.clone(),
            qty,
            price,
            fee,
            timestamp,
        }
    }

    /// Signed cash flow: buys spend, sells receive, fees always spend.
    pub fn cash_flow(&self) -> f64 {
        -self.qty * self.price - self.fee
    }
}

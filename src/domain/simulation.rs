//! Tick-by-tick simulation: order lifecycle policy, market simulation and
//! rule invocation.

use chrono::NaiveDateTime;

use super::error::StratsimError;
use super::order::{Order, OrderStatus, TimeInForce, Trade};
use super::planner::{self, DateRange, Firing, Schedule};
use super::series::Series;
use super::strategy::{MarketSimCall, RuleCall, Strategy};

/// Order log, open set and trade log of a run.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    log: Vec<Order>,
    open: Vec<Order>,
    trades: Vec<Trade>,
}

/// Tick at which an order stamped `timestamp` was created.
fn creation_index(timestamps: &[NaiveDateTime], timestamp: NaiveDateTime) -> usize {
    timestamps.partition_point(|t| *t < timestamp)
}

impl OrderBook {
    /// Assigns ids and appends `orders` to the log and, while open, to the
    /// open set. Orders stamped after tick `index` are rejected.
    pub fn submit(
        &mut self,
        orders: Vec<Order>,
        index: usize,
        timestamps: &[NaiveDateTime],
    ) -> Result<(), StratsimError> {
        for mut order in orders {
            let id = self.log.len();
            if creation_index(timestamps, order.timestamp) > index {
                return Err(StratsimError::InvalidOrder {
                    order_id: id,
                    entity: order.entity,
                    timestamp: order.timestamp,
                    index,
                });
            }
            order.id = id;
            self.log.push(order.clone());
            if order.is_open() {
                self.open.push(order);
            }
        }
        Ok(())
    }

    /// Moves orders that are no longer open out of the open set.
    pub fn prune(&mut self) {
        if self.open.iter().all(Order::is_open) {
            return;
        }
        let (open, closed): (Vec<Order>, Vec<Order>) =
            self.open.drain(..).partition(Order::is_open);
        for order in closed {
            if let Some(slot) = self.log.get_mut(order.id) {
                *slot = order;
            }
        }
        self.open = open;
    }

    pub fn open(&self) -> &[Order] {
        &self.open
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn record_trades(&mut self, trades: &[Trade]) {
        self.trades.extend_from_slice(trades);
    }

    /// The order log with open orders at their current state.
    pub fn snapshot(&self) -> Vec<Order> {
        let mut orders = self.log.clone();
        for order in &self.open {
            if let Some(slot) = orders.get_mut(order.id) {
                *slot = order.clone();
            }
        }
        orders
    }
}

/// Applies lag, fill-or-kill, cancel requests and day expiry at tick `index`.
pub fn apply_time_in_force(
    orders: &mut [Order],
    index: usize,
    timestamps: &[NaiveDateTime],
    trade_lag: usize,
) {
    let now = timestamps[index];
    for order in orders.iter_mut() {
        let age = index.saturating_sub(creation_index(timestamps, order.timestamp));
        if age < trade_lag {
            continue;
        }
        if age > trade_lag && order.time_in_force == TimeInForce::Fok {
            tracing::debug!(order = order.id, entity = %order.entity, "fill-or-kill order cancelled");
            order.cancel();
            continue;
        }
        if order.status == OrderStatus::CancelRequested {
            tracing::debug!(order = order.id, "cancel request honoured");
            order.cancel();
        }
        if order.time_in_force == TimeInForce::Day && now.date() > order.timestamp.date() {
            tracing::debug!(order = order.id, "day order expired");
            order.cancel();
        }
    }
}

impl<C> Strategy<C> {
    /// Plans and runs the selected rules over every tick.
    ///
    /// `rule_names` and `entities` default to everything registered.
    pub fn run_rules(
        &mut self,
        rule_names: Option<&[&str]>,
        entities: Option<&[&str]>,
        range: DateRange,
    ) -> Result<(), StratsimError> {
        let rules: Vec<usize> = match rule_names {
            None => (0..self.rules.len()).collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.rules
                        .iter()
                        .position(|r| r.spec.name == *name)
                        .ok_or_else(|| StratsimError::UnknownRule {
                            name: name.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        let entities = self.cache.select_entities(entities)?;
        let specs: Vec<_> = self.rules.iter().map(|r| r.spec.clone()).collect();
        let schedule = planner::plan(
            &specs,
            &rules,
            &entities,
            &self.cache,
            &self.timestamps,
            self.trade_lag,
            range,
        )?;

        tracing::info!(
            ticks = self.timestamps.len(),
            rules = rules.len(),
            entities = entities.len(),
            trade_lag = self.trade_lag,
            "running rules"
        );
        for i in 0..self.timestamps.len() {
            self.run_iteration(i, &schedule)?;
        }

        if self.run_final_calc {
            if let Some(&last) = self.timestamps.last() {
                self.ledger.calc(last);
            }
        }
        tracing::info!(
            orders = self.book.log.len(),
            trades = self.book.trades.len(),
            open = self.book.open.len(),
            "rules finished"
        );
        Ok(())
    }

    /// One tick: settle existing orders, then fire the scheduled rules in order.
    ///
    /// With no lag, the market is simulated again after every rule so later
    /// rules in the same tick see the fills.
    fn run_iteration(&mut self, i: usize, schedule: &Schedule) -> Result<(), StratsimError> {
        self.sim_market(i)?;
        for firing in schedule.slot(i) {
            let orders = self.get_orders(i, firing, schedule.signal(firing))?;
            if !orders.is_empty() {
                tracing::debug!(
                    tick = i,
                    rule = %self.rules[firing.rule].spec.name,
                    entity = %firing.entity,
                    count = orders.len(),
                    "rule produced orders"
                );
            }
            self.book.submit(orders, i, &self.timestamps)?;
            if self.trade_lag == 0 {
                self.sim_market(i)?;
            } else {
                self.book.prune();
            }
        }
        Ok(())
    }

    fn get_orders(
        &mut self,
        i: usize,
        firing: &Firing,
        signal: &Series,
    ) -> Result<Vec<Order>, StratsimError> {
        let rule = &mut self.rules[firing.rule];
        let position = self.ledger.position(&firing.entity, self.timestamps[i]);
        if !rule.spec.admits(position) {
            tracing::trace!(rule = %rule.spec.name, entity = %firing.entity, position, "position filter rejected rule");
            return Ok(Vec::new());
        }

        let call = RuleCall {
            entity: &firing.entity,
            index: i,
            timestamps: &self.timestamps,
            indicators: self.cache.indicator_values().bundle(&firing.entity),
            signal,
            ledger: self.ledger.as_ref(),
            open_orders: &mut self.book.open,
            context: &mut self.context,
        };
        (rule.func)(call).map_err(|source| StratsimError::Rule {
            rule: rule.spec.name.clone(),
            entity: firing.entity.clone(),
            index: i,
            source,
        })
    }

    /// Applies order policy, then runs each market simulator over the open set.
    fn sim_market(&mut self, i: usize) -> Result<(), StratsimError> {
        for order in &self.book.open {
            let created = creation_index(&self.timestamps, order.timestamp);
            if created > i || created >= self.timestamps.len() {
                return Err(StratsimError::InvalidOrder {
                    order_id: order.id,
                    entity: order.entity.clone(),
                    timestamp: order.timestamp,
                    index: i,
                });
            }
        }
        apply_time_in_force(&mut self.book.open, i, &self.timestamps, self.trade_lag);

        for sim in self.market_sims.iter_mut() {
            self.book.prune();
            let call = MarketSimCall {
                orders: &mut self.book.open,
                index: i,
                timestamps: &self.timestamps,
                indicators: self.cache.indicator_values(),
                signals: self.cache.signal_values(),
                context: &mut self.context,
            };
            let trades = (sim.func)(call).map_err(|source| StratsimError::MarketSimulator {
                name: sim.name.clone(),
                index: i,
                source,
            })?;
            if !trades.is_empty() {
                tracing::debug!(tick = i, simulator = %sim.name, count = trades.len(), "trades filled");
                self.ledger.add_trades(&trades);
                self.book.record_trades(&trades);
            }
        }
        self.book.prune();
        Ok(())
    }
}

//! Strategy engine: registers indicators, signals, rules and market
//! simulators, and exposes the run's orders, trades and returns.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::error::{CallbackError, StratsimError};
use super::evaluator::Evaluator;
use super::indicator_cache::IndicatorCache;
use super::metrics::compute_return_metrics;
use super::order::{Order, Trade};
use super::planner::DateRange;
use super::rule::RuleSpec;
use super::series::{ensure_increasing, Bundle, Series, SeriesStore, SignalValue};
use super::simulation::OrderBook;
use crate::ports::ledger_port::Ledger;

/// Everything a rule sees when it fires for one entity at one tick.
pub struct RuleCall<'a, C> {
    pub entity: &'a str,
    pub index: usize,
    pub timestamps: &'a [NaiveDateTime],
    /// The entity's indicators.
    pub indicators: Bundle<'a>,
    /// The triggering signal, masked to the run's date range.
    pub signal: &'a Series,
    pub ledger: &'a dyn Ledger,
    /// Orders still open. Rules may request cancels.
    pub open_orders: &'a mut [Order],
    pub context: &'a mut C,
}

/// Everything a market simulator sees at one tick.
pub struct MarketSimCall<'a, C> {
    pub orders: &'a mut [Order],
    pub index: usize,
    pub timestamps: &'a [NaiveDateTime],
    pub indicators: &'a SeriesStore,
    pub signals: &'a SeriesStore,
    pub context: &'a mut C,
}

pub type RuleFn<C> = Box<dyn FnMut(RuleCall<'_, C>) -> Result<Vec<Order>, CallbackError>>;

pub type MarketSimFn<C> =
    Box<dyn FnMut(MarketSimCall<'_, C>) -> Result<Vec<Trade>, CallbackError>>;

pub(crate) struct RuleEntry<C> {
    pub(crate) spec: RuleSpec,
    pub(crate) func: RuleFn<C>,
}

pub(crate) struct MarketSimEntry<C> {
    pub(crate) name: String,
    pub(crate) func: MarketSimFn<C>,
}

/// Equity sampled once per calendar date, with period returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSeries {
    pub timestamps: Vec<NaiveDateTime>,
    pub equity: Vec<f64>,
    pub returns: Vec<f64>,
}

pub struct Strategy<C = ()> {
    pub(crate) timestamps: Vec<NaiveDateTime>,
    pub(crate) ledger: Box<dyn Ledger>,
    pub(crate) trade_lag: usize,
    pub(crate) run_final_calc: bool,
    pub(crate) context: C,
    pub(crate) cache: IndicatorCache<C>,
    pub(crate) rules: Vec<RuleEntry<C>>,
    pub(crate) market_sims: Vec<MarketSimEntry<C>>,
    pub(crate) book: OrderBook,
}

fn within(
    timestamp: NaiveDateTime,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
) -> bool {
    start.is_none_or(|s| timestamp >= s) && end.is_none_or(|e| timestamp <= e)
}

impl<C> Strategy<C> {
    /// Creates a strategy over strictly increasing `timestamps`.
    ///
    /// Trade lag defaults to 0 and the final ledger calculation is on.
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        entities: Vec<String>,
        ledger: Box<dyn Ledger>,
        context: C,
    ) -> Result<Self, StratsimError> {
        ensure_increasing(&timestamps)?;
        if entities.is_empty() {
            return Err(StratsimError::NoEntities);
        }
        let starting_equity = ledger.starting_equity();
        if !(starting_equity > 0.0) {
            return Err(StratsimError::NonPositiveEquity {
                value: starting_equity,
            });
        }
        Ok(Strategy {
            timestamps,
            ledger,
            trade_lag: 0,
            run_final_calc: true,
            context,
            cache: IndicatorCache::new(entities),
            rules: Vec::new(),
            market_sims: Vec::new(),
            book: OrderBook::default(),
        })
    }

    /// Ticks an order waits after creation before it is eligible to fill.
    pub fn with_trade_lag(mut self, trade_lag: usize) -> Self {
        self.trade_lag = trade_lag;
        self
    }

    pub fn with_final_calc(mut self, run_final_calc: bool) -> Self {
        self.run_final_calc = run_final_calc;
        self
    }

    pub fn add_indicator<F>(
        &mut self,
        name: &str,
        func: F,
        entities: Option<&[&str]>,
        depends_on: Option<&[&str]>,
    ) -> Result<(), StratsimError>
    where
        F: Fn(&str, &[NaiveDateTime], &Bundle<'_>, &C) -> Result<Series, CallbackError> + 'static,
    {
        self.cache.add_indicator(name, func, entities, depends_on)
    }

    pub fn add_signal<F>(
        &mut self,
        name: &str,
        func: F,
        entities: Option<&[&str]>,
        depends_on_indicators: Option<&[&str]>,
        depends_on_signals: Option<&[&str]>,
    ) -> Result<(), StratsimError>
    where
        F: Fn(&str, &[NaiveDateTime], &Bundle<'_>, &Bundle<'_>, &C) -> Result<Series, CallbackError>
            + 'static,
    {
        self.cache.add_signal(
            name,
            func,
            entities,
            depends_on_indicators,
            depends_on_signals,
        )
    }

    /// Registers a rule fired by `signal_name` when the signal takes one of
    /// `accepted` (default `[true]`), gated by an optional position filter.
    pub fn add_rule<F>(
        &mut self,
        name: &str,
        func: F,
        signal_name: &str,
        accepted: Option<&[SignalValue]>,
        position_filter: Option<&str>,
    ) -> Result<(), StratsimError>
    where
        F: FnMut(RuleCall<'_, C>) -> Result<Vec<Order>, CallbackError> + 'static,
    {
        if self.rules.iter().any(|r| r.spec.name == name) {
            return Err(StratsimError::DuplicateRule {
                name: name.to_string(),
            });
        }
        let spec = RuleSpec::new(name, signal_name, accepted, position_filter)?;
        self.rules.push(RuleEntry {
            spec,
            func: Box::new(func),
        });
        Ok(())
    }

    /// Market simulators run in registration order.
    pub fn add_market_sim<F>(&mut self, name: &str, func: F)
    where
        F: FnMut(MarketSimCall<'_, C>) -> Result<Vec<Trade>, CallbackError> + 'static,
    {
        self.market_sims.push(MarketSimEntry {
            name: name.to_string(),
            func: Box::new(func),
        });
    }

    pub fn run_indicators(
        &mut self,
        names: Option<&[&str]>,
        entities: Option<&[&str]>,
        clear: bool,
    ) -> Result<(), StratsimError> {
        self.cache
            .run_indicators(&self.timestamps, &self.context, names, entities, clear)
    }

    pub fn run_signals(
        &mut self,
        names: Option<&[&str]>,
        entities: Option<&[&str]>,
        clear: bool,
    ) -> Result<(), StratsimError> {
        self.cache
            .run_signals(&self.timestamps, &self.context, names, entities, clear)
    }

    /// Indicators, then signals, then every rule over the whole timeline.
    pub fn run(&mut self) -> Result<(), StratsimError> {
        self.run_indicators(None, None, false)?;
        self.run_signals(None, None, false)?;
        self.run_rules(None, None, DateRange::all())
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn entities(&self) -> &[String] {
        self.cache.entities()
    }

    pub fn trade_lag(&self) -> usize {
        self.trade_lag
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    /// Marks the ledger to market through `timestamp`. Needed before reading
    /// returns when the final calculation is off.
    pub fn mark_to_market(&mut self, timestamp: NaiveDateTime) {
        self.ledger.calc(timestamp);
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn indicator_values(&self) -> &SeriesStore {
        self.cache.indicator_values()
    }

    pub fn signal_values(&self) -> &SeriesStore {
        self.cache.signal_values()
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.spec.name.as_str()).collect()
    }

    /// Orders stamped within `[start, end]`, with their latest status.
    pub fn orders(
        &self,
        entity: Option<&str>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Vec<Order> {
        self.book
            .snapshot()
            .into_iter()
            .filter(|o| entity.is_none_or(|e| o.entity == e) && within(o.timestamp, start, end))
            .collect()
    }

    /// Trades stamped within `[start, end]`.
    pub fn trades(
        &self,
        entity: Option<&str>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Vec<Trade> {
        self.book
            .trades()
            .iter()
            .filter(|t| entity.is_none_or(|e| t.entity == e) && within(t.timestamp, start, end))
            .cloned()
            .collect()
    }

    /// Daily-sampled equity and returns, for the whole account or one entity.
    ///
    /// The first return is measured against the starting equity.
    pub fn returns(&self, entity: Option<&str>) -> Result<ReturnSeries, StratsimError> {
        let starting_equity = self.ledger.starting_equity();
        let points: Vec<(NaiveDateTime, f64)> = match entity {
            None => self
                .ledger
                .equity_curve()
                .into_iter()
                .map(|p| (p.timestamp, p.equity))
                .collect(),
            Some(name) => {
                if !self.entities().iter().any(|e| e == name) {
                    return Err(StratsimError::UnknownEntity {
                        name: name.to_string(),
                    });
                }
                self.ledger
                    .pnl(Some(name))
                    .into_iter()
                    .map(|p| (p.timestamp, starting_equity + p.net_pnl))
                    .collect()
            }
        };

        let mut daily: Vec<(NaiveDate, f64)> = Vec::new();
        let mut last_equity = f64::NAN;
        for (timestamp, equity) in points {
            if !equity.is_nan() {
                last_equity = equity;
            }
            let date = timestamp.date();
            match daily.last_mut() {
                Some((d, e)) if *d == date => *e = last_equity,
                _ => daily.push((date, last_equity)),
            }
        }
        daily.retain(|(_, e)| !e.is_nan());

        let timestamps: Vec<NaiveDateTime> = daily
            .iter()
            .map(|(d, _)| d.and_time(NaiveTime::default()))
            .collect();
        let equity: Vec<f64> = daily.iter().map(|(_, e)| *e).collect();
        let returns = equity
            .iter()
            .enumerate()
            .map(|(i, e)| match i {
                0 => e / starting_equity - 1.0,
                _ => e / equity[i - 1] - 1.0,
            })
            .collect();
        Ok(ReturnSeries {
            timestamps,
            equity,
            returns,
        })
    }

    /// Return metrics of [`Strategy::returns`].
    pub fn evaluate_returns(
        &self,
        entity: Option<&str>,
        periods_per_year: Option<f64>,
    ) -> Result<Evaluator, StratsimError> {
        let series = self.returns(entity)?;
        compute_return_metrics(
            &series.timestamps,
            &series.returns,
            self.ledger.starting_equity(),
            periods_per_year,
        )
    }
}

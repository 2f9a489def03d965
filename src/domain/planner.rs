//! Turns signal series into a per-tick schedule of rule firings.

use chrono::NaiveDateTime;
use std::ops::Range;

use super::error::StratsimError;
use super::indicator_cache::IndicatorCache;
use super::rule::RuleSpec;
use super::series::Series;

/// Optional bounds restricting when rules may fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    /// Inclusive.
    pub start: Option<NaiveDateTime>,
    /// Exclusive.
    pub end: Option<NaiveDateTime>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        DateRange { start, end }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// Index range of `timestamps` inside the bounds.
    pub fn index_range(&self, timestamps: &[NaiveDateTime]) -> Range<usize> {
        let lo = self
            .start
            .map_or(0, |s| timestamps.partition_point(|t| *t < s));
        let hi = self
            .end
            .map_or(timestamps.len(), |e| timestamps.partition_point(|t| *t < e));
        lo..hi.max(lo)
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start.is_none_or(|s| timestamp >= s) && self.end.is_none_or(|e| timestamp < e)
    }
}

/// One rule firing for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    /// Position of the rule in registration order.
    pub rule: usize,
    pub entity: String,
    signal: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Masked copies of the triggering signals, one per (rule, entity).
    signals: Vec<Series>,
    slots: Vec<Vec<Firing>>,
}

impl Schedule {
    pub fn slot(&self, index: usize) -> &[Firing] {
        self.slots.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn signal(&self, firing: &Firing) -> &Series {
        &self.signals[firing.signal]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn firing_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

/// Builds the schedule for `rules` (indices into `all_rules`, in registration
/// order) and `entities` (in registration order).
///
/// Firings within a slot are ordered by rule, then entity. With a positive
/// lag, a firing on the final timestamp is dropped.
pub fn plan<C>(
    all_rules: &[RuleSpec],
    rules: &[usize],
    entities: &[String],
    cache: &IndicatorCache<C>,
    timestamps: &[NaiveDateTime],
    trade_lag: usize,
    range: DateRange,
) -> Result<Schedule, StratsimError> {
    let mut schedule = Schedule {
        signals: Vec::new(),
        slots: vec![Vec::new(); timestamps.len()],
    };
    let keep = range.index_range(timestamps);
    let last = timestamps.len().checked_sub(1);

    for &rule_idx in rules {
        let spec = &all_rules[rule_idx];
        let applicable = cache.signal_entities(&spec.signal_name).ok_or_else(|| {
            StratsimError::MissingDependency {
                name: spec.signal_name.clone(),
            }
        })?;

        for entity in entities.iter().filter(|e| applicable.contains(*e)) {
            let stored = cache
                .signal_values()
                .get(entity, &spec.signal_name)
                .ok_or_else(|| StratsimError::MissingDependency {
                    name: format!("{} for {}", spec.signal_name, entity),
                })?;
            let mut signal = stored.clone();
            signal.mask_outside(keep.clone());

            let mut indices = signal.matching_indices(&spec.accepted);
            if trade_lag > 0 && indices.last().copied() == last {
                indices.pop();
            }
            if indices.is_empty() {
                continue;
            }

            let signal_idx = schedule.signals.len();
            schedule.signals.push(signal);
            for i in indices {
                schedule.slots[i].push(Firing {
                    rule: rule_idx,
                    entity: entity.clone(),
                    signal: signal_idx,
                });
            }
        }
    }
    tracing::debug!(
        rules = rules.len(),
        firings = schedule.firing_count(),
        "planned rule firings"
    );
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::SignalValue;
    use chrono::NaiveDate;

    fn timestamps(n: u32) -> Vec<NaiveDateTime> {
        (1..=n)
            .map(|d| {
                NaiveDate::from_ymd_opt(2024, 5, d)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            })
            .collect()
    }

    fn entities() -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    fn cache_with(ts: &[NaiveDateTime], signal: Vec<f64>) -> IndicatorCache<()> {
        let mut cache = IndicatorCache::new(entities());
        cache
            .add_signal(
                "sig",
                move |_, _, _, _, _| Ok(Series::from(signal.clone())),
                None,
                None,
                None,
            )
            .unwrap();
        cache.run_signals(ts, &(), None, None, false).unwrap();
        cache
    }

    fn rule(name: &str, accepted: &[SignalValue]) -> RuleSpec {
        RuleSpec::new(name, "sig", Some(accepted), None).unwrap()
    }

    #[test]
    fn orders_by_rule_then_entity() {
        let ts = timestamps(3);
        let cache = cache_with(&ts, vec![1.0, 0.0, 1.0]);
        let rules = vec![
            rule("first", &[SignalValue::Number(1.0)]),
            rule("second", &[SignalValue::Bool(true)]),
        ];
        let schedule = plan(&rules, &[0, 1], &entities(), &cache, &ts, 0, DateRange::all()).unwrap();

        let slot: Vec<(usize, &str)> = schedule
            .slot(0)
            .iter()
            .map(|f| (f.rule, f.entity.as_str()))
            .collect();
        assert_eq!(slot, vec![(0, "A"), (0, "B"), (1, "A"), (1, "B")]);
        assert!(schedule.slot(1).is_empty());
        assert_eq!(schedule.slot(2).len(), 4);
    }

    #[test]
    fn lag_drops_last_index() {
        let ts = timestamps(3);
        let cache = cache_with(&ts, vec![1.0, 0.0, 1.0]);
        let rules = vec![rule("r", &[SignalValue::Number(1.0)])];
        let schedule = plan(&rules, &[0], &entities(), &cache, &ts, 1, DateRange::all()).unwrap();
        assert_eq!(schedule.slot(0).len(), 2);
        assert!(schedule.slot(2).is_empty());
    }

    #[test]
    fn date_range_masks_a_copy() {
        let ts = timestamps(4);
        let cache = cache_with(&ts, vec![1.0, 1.0, 1.0, 1.0]);
        let rules = vec![rule("r", &[SignalValue::Number(1.0)])];
        let range = DateRange::new(Some(ts[1]), Some(ts[3]));
        let schedule = plan(&rules, &[0], &entities(), &cache, &ts, 0, range).unwrap();

        assert!(schedule.slot(0).is_empty());
        assert_eq!(schedule.slot(1).len(), 2);
        assert_eq!(schedule.slot(2).len(), 2);
        assert!(schedule.slot(3).is_empty());

        let stored = cache.signal_values().get("A", "sig").unwrap();
        assert_eq!(stored.as_numeric().unwrap(), &[1.0, 1.0, 1.0, 1.0]);
        let masked = schedule.signal(&schedule.slot(1)[0]).as_numeric().unwrap();
        assert!(masked[0].is_nan() && masked[3].is_nan());
    }

    #[test]
    fn unregistered_signal_is_missing() {
        let ts = timestamps(2);
        let cache = cache_with(&ts, vec![1.0, 1.0]);
        let rules = vec![RuleSpec::new("r", "other", None, None).unwrap()];
        let err = plan(&rules, &[0], &entities(), &cache, &ts, 0, DateRange::all()).unwrap_err();
        assert!(matches!(err, StratsimError::MissingDependency { name } if name == "other"));
    }

    #[test]
    fn index_range_bounds() {
        let ts = timestamps(5);
        assert_eq!(DateRange::all().index_range(&ts), 0..5);
        assert_eq!(DateRange::new(Some(ts[2]), None).index_range(&ts), 2..5);
        assert_eq!(DateRange::new(None, Some(ts[2])).index_range(&ts), 0..2);
        assert_eq!(DateRange::new(Some(ts[4]), Some(ts[1])).index_range(&ts), 4..4);
        assert!(DateRange::new(Some(ts[1]), None).contains(ts[1]));
        assert!(!DateRange::new(None, Some(ts[1])).contains(ts[1]));
    }
}

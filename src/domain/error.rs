//! Domain error types.

use chrono::NaiveDateTime;

/// Error type user callbacks (indicators, signals, rules, market simulators) return.
///
/// Boxed so that any error type can flow through; the simulation wraps it with
/// call-site context and keeps it reachable through [`std::error::Error::source`].
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for stratsim.
#[derive(Debug, thiserror::Error)]
pub enum StratsimError {
    #[error("timestamps must be strictly increasing: {previous} followed by {next} at index {index}")]
    NonMonotonicTimestamps {
        index: usize,
        previous: NaiveDateTime,
        next: NaiveDateTime,
    },

    #[error("at least one entity is required")]
    NoEntities,

    #[error("unknown entity: {name}")]
    UnknownEntity { name: String },

    #[error("starting equity must be positive, got {value}")]
    NonPositiveEquity { value: f64 },

    #[error("rule {name} already exists")]
    DuplicateRule { name: String },

    #[error("unknown rule: {name}")]
    UnknownRule { name: String },

    #[error("unknown position filter {token:?}: expected zero, nonzero, positive or negative")]
    UnknownPositionFilter { token: String },

    #[error("missing dependency: {name}")]
    MissingDependency { name: String },

    #[error("cyclic dependency detected at {name}")]
    CyclicDependency { name: String },

    #[error("unknown metric kind: {kind}")]
    UnknownMetricKind { kind: String },

    #[error("{name}: expected {expected}, found {found}")]
    MetricType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("metric {name}: {reason}")]
    MetricShape { name: String, reason: String },

    #[error("series {name}: expected {expected} values")]
    SeriesType {
        name: String,
        expected: &'static str,
    },

    #[error("{name} for {entity} has {actual} values, expected {expected}")]
    SeriesLength {
        name: String,
        entity: String,
        expected: usize,
        actual: usize,
    },

    #[error("{what}: expected {expected} values, got {actual}")]
    InputLength {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("order {order_id} for {entity} is stamped {timestamp}, after tick {index}")]
    InvalidOrder {
        order_id: usize,
        entity: String,
        timestamp: NaiveDateTime,
        index: usize,
    },

    #[error("indicator {name} failed for {entity}: {source}")]
    Indicator {
        name: String,
        entity: String,
        #[source]
        source: CallbackError,
    },

    #[error("signal {name} failed for {entity}: {source}")]
    Signal {
        name: String,
        entity: String,
        #[source]
        source: CallbackError,
    },

    #[error("rule {rule} failed for {entity} at index {index}: {source}")]
    Rule {
        rule: String,
        entity: String,
        index: usize,
        #[source]
        source: CallbackError,
    },

    #[error("market simulator {name} failed at index {index}: {source}")]
    MarketSimulator {
        name: String,
        index: usize,
        #[source]
        source: CallbackError,
    },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("csv error: {reason}")]
    Csv { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StratsimError {
    /// The user callback error wrapped by this error, if any.
    pub fn callback_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            StratsimError::Indicator { source, .. }
            | StratsimError::Signal { source, .. }
            | StratsimError::Rule { source, .. }
            | StratsimError::MarketSimulator { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<&StratsimError> for std::process::ExitCode {
    fn from(err: &StratsimError) -> Self {
        let code: u8 = match err {
            StratsimError::Io(_) => 1,
            StratsimError::ConfigParse { .. }
            | StratsimError::ConfigMissing { .. }
            | StratsimError::ConfigInvalid { .. } => 2,
            StratsimError::Csv { .. } | StratsimError::InputLength { .. } => 3,
            StratsimError::NonMonotonicTimestamps { .. }
            | StratsimError::NoEntities
            | StratsimError::UnknownEntity { .. }
            | StratsimError::NonPositiveEquity { .. }
            | StratsimError::DuplicateRule { .. }
            | StratsimError::UnknownRule { .. }
            | StratsimError::UnknownPositionFilter { .. } => 4,
            StratsimError::MissingDependency { .. }
            | StratsimError::CyclicDependency { .. }
            | StratsimError::UnknownMetricKind { .. }
            | StratsimError::MetricType { .. }
            | StratsimError::MetricShape { .. }
            | StratsimError::SeriesType { .. }
            | StratsimError::SeriesLength { .. } => 5,
            StratsimError::InvalidOrder { .. }
            | StratsimError::Indicator { .. }
            | StratsimError::Signal { .. }
            | StratsimError::Rule { .. }
            | StratsimError::MarketSimulator { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn rule_error_keeps_source() {
        let err = StratsimError::Rule {
            rule: "enter".into(),
            entity: "IBM".into(),
            index: 7,
            source: Box::new(Boom),
        };
        assert_eq!(
            err.to_string(),
            "rule enter failed for IBM at index 7: boom"
        );
        let source = err.source().unwrap();
        assert!(source.downcast_ref::<Boom>().is_some());
        assert!(err.callback_source().unwrap().downcast_ref::<Boom>().is_some());
    }

    #[test]
    fn non_callback_errors_have_no_callback_source() {
        let err = StratsimError::MissingDependency { name: "x".into() };
        assert!(err.callback_source().is_none());
    }

    #[test]
    fn position_filter_message_lists_tokens() {
        let err = StratsimError::UnknownPositionFilter {
            token: "flat".into(),
        };
        assert!(err.to_string().contains("\"flat\""));
        assert!(err.to_string().contains("nonzero"));
    }
}

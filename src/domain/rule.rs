//! Rule registration: which signal triggers a rule and when it may fire.

use std::fmt;
use std::str::FromStr;

use super::error::StratsimError;
use super::series::SignalValue;

/// Gate on the current position before a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionFilter {
    Zero,
    NonZero,
    Positive,
    Negative,
}

/// Zero test with a relative tolerance of 1e-9.
pub fn is_flat(position: f64) -> bool {
    position.abs() <= 1e-9 * position.abs().max(1.0)
}

impl PositionFilter {
    pub fn accepts(self, position: f64) -> bool {
        let flat = is_flat(position);
        match self {
            PositionFilter::Zero => flat,
            PositionFilter::NonZero => !flat,
            PositionFilter::Positive => !flat && position > 0.0,
            PositionFilter::Negative => !flat && position < 0.0,
        }
    }

    /// Parses an optional filter token. An empty token means no filter.
    pub fn parse_optional(token: Option<&str>) -> Result<Option<Self>, StratsimError> {
        match token.map(str::trim) {
            None | Some("") => Ok(None),
            Some(t) => t.parse().map(Some),
        }
    }
}

impl FromStr for PositionFilter {
    type Err = StratsimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zero" => Ok(PositionFilter::Zero),
            "nonzero" => Ok(PositionFilter::NonZero),
            "positive" => Ok(PositionFilter::Positive),
            "negative" => Ok(PositionFilter::Negative),
            other => Err(StratsimError::UnknownPositionFilter {
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for PositionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            PositionFilter::Zero => "zero",
            PositionFilter::NonZero => "nonzero",
            PositionFilter::Positive => "positive",
            PositionFilter::Negative => "negative",
        };
        f.write_str(token)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSpec {
    pub name: String,
    pub signal_name: String,
    /// Signal values that trigger the rule. Defaults to `[true]`.
    pub accepted: Vec<SignalValue>,
    pub position_filter: Option<PositionFilter>,
}

impl RuleSpec {
    pub fn new(
        name: &str,
        signal_name: &str,
        accepted: Option<&[SignalValue]>,
        position_filter: Option<&str>,
    ) -> Result<Self, StratsimError> {
        let accepted = match accepted {
            Some(values) => values.to_vec(),
            None => vec![SignalValue::Bool(true)],
        };
        Ok(RuleSpec {
            name: name.to_string(),
            signal_name: signal_name.to_string(),
            accepted,
            position_filter: PositionFilter::parse_optional(position_filter)?,
        })
    }

    /// Whether the rule may fire with the given current position.
    pub fn admits(&self, position: f64) -> bool {
        self.position_filter
            .is_none_or(|filter| filter.accepts(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tokens() {
        assert_eq!("zero".parse::<PositionFilter>().unwrap(), PositionFilter::Zero);
        assert_eq!(
            "nonzero".parse::<PositionFilter>().unwrap(),
            PositionFilter::NonZero
        );
        assert_eq!(
            "positive".parse::<PositionFilter>().unwrap(),
            PositionFilter::Positive
        );
        assert_eq!(
            "negative".parse::<PositionFilter>().unwrap(),
            PositionFilter::Negative
        );
        assert!("long".parse::<PositionFilter>().is_err());
    }

    #[test]
    fn empty_token_means_no_filter() {
        assert_eq!(PositionFilter::parse_optional(None).unwrap(), None);
        assert_eq!(PositionFilter::parse_optional(Some("")).unwrap(), None);
        assert_eq!(
            PositionFilter::parse_optional(Some("zero")).unwrap(),
            Some(PositionFilter::Zero)
        );
    }

    #[test]
    fn zero_uses_tolerance() {
        assert!(PositionFilter::Zero.accepts(0.0));
        assert!(PositionFilter::Zero.accepts(1e-12));
        assert!(!PositionFilter::Zero.accepts(0.5));
        assert!(PositionFilter::NonZero.accepts(-2.0));
        assert!(!PositionFilter::NonZero.accepts(-1e-12));
    }

    #[test]
    fn sign_filters() {
        assert!(PositionFilter::Positive.accepts(100.0));
        assert!(!PositionFilter::Positive.accepts(-100.0));
        assert!(!PositionFilter::Positive.accepts(0.0));
        assert!(PositionFilter::Negative.accepts(-1.0));
        assert!(!PositionFilter::Negative.accepts(1e-15));
    }

    #[test]
    fn rule_spec_defaults_to_true() {
        let spec = RuleSpec::new("enter", "cross", None, None).unwrap();
        assert_eq!(spec.accepted, vec![SignalValue::Bool(true)]);
        assert!(spec.admits(5.0));
    }

    #[test]
    fn rule_spec_rejects_unknown_filter() {
        let err = RuleSpec::new("enter", "cross", None, Some("flat")).unwrap_err();
        assert!(matches!(err, StratsimError::UnknownPositionFilter { token } if token == "flat"));
    }

    #[test]
    fn display_round_trips_token() {
        for filter in [
            PositionFilter::Zero,
            PositionFilter::NonZero,
            PositionFilter::Positive,
            PositionFilter::Negative,
        ] {
            assert_eq!(filter.to_string().parse::<PositionFilter>().unwrap(), filter);
        }
    }
}

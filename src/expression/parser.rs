//! Expression text parser
//!
//! Grammar, whitespace-insensitive between tokens:
//!
//! ```text
//! <func>(<metric>) over <period>[s|m|h] <op> <threshold> every <interval>[m|h]
//! ```
//!
//! The period defaults to seconds and the interval to minutes.

use std::sync::OnceLock;

use regex::Regex;

use super::{Comparator, Expression, Func};

const EXPRESSION_PATTERN: &str = r"(?x)
    ^\s*
    (?P<func>[A-Za-z_][A-Za-z0-9_]*) \s* \( \s* (?P<metric>[^()\s]+) \s* \)
    \s+ over \s+ (?P<period>\d+) \s* (?P<period_unit>[smh])?
    \s* (?P<op>>=|<=|==|!=|>|<)
    \s* (?P<threshold>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)
    \s+ every \s+ (?P<interval>\d+) \s* (?P<interval_unit>[mh])?
    \s*$";

fn expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EXPRESSION_PATTERN).expect("expression grammar is a valid regex"))
}

/// Parse an expression string
pub fn parse_expression(text: &str) -> Result<Expression, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let caps = expression_regex()
        .captures(text)
        .ok_or_else(|| ParseError::Malformed(text.trim().to_string()))?;

    let func: Func = caps["func"].parse()?;
    let metric = caps["metric"].to_string();
    let comparator: Comparator = caps["op"].parse()?;

    let period = parse_count(&caps["period"])?;
    let period_secs = match caps.name("period_unit").map(|m| m.as_str()) {
        None | Some("s") => Some(period),
        Some("m") => period.checked_mul(60),
        Some("h") => period.checked_mul(3600),
        Some(unit) => return Err(ParseError::InvalidUnit(unit.to_string())),
    }
    .ok_or_else(|| ParseError::InvalidNumber(caps["period"].to_string()))?;

    let interval = parse_count(&caps["interval"])?;
    let interval_mins = match caps.name("interval_unit").map(|m| m.as_str()) {
        None | Some("m") => Some(interval),
        Some("h") => interval.checked_mul(60),
        Some(unit) => return Err(ParseError::InvalidUnit(unit.to_string())),
    }
    .ok_or_else(|| ParseError::InvalidNumber(caps["interval"].to_string()))?;

    let threshold: f64 = caps["threshold"]
        .parse()
        .map_err(|_| ParseError::InvalidNumber(caps["threshold"].to_string()))?;

    Expression::new(func, metric, period_secs, interval_mins, comparator, threshold)
}

fn parse_count(s: &str) -> Result<u64, ParseError> {
    s.parse()
        .map_err(|_| ParseError::InvalidNumber(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty expression")]
    Empty,

    #[error("Malformed expression: {0}")]
    Malformed(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown comparator: {0}")]
    UnknownComparator(String),

    #[error("Invalid time unit: {0}")]
    InvalidUnit(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Aggregation period must be greater than zero")]
    ZeroPeriod,

    #[error("Poll interval must be greater than zero")]
    ZeroInterval,

    #[error("Aggregation period of {0}s is too long")]
    PeriodTooLong(u64),

    #[error("Poll interval of {0}m is too long")]
    IntervalTooLong(u64),
}

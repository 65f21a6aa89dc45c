//! Metric expressions evaluated for external conditions
//!
//! An expression names an aggregate function over a metric, the window the
//! aggregate is computed on, a threshold comparison and how often to poll:
//!
//! ```text
//! avg(heap_used) over 60s > 1000.0 every 1m
//! ```

pub mod parser;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use parser::{parse_expression, ParseError};

/// Longest period or interval accepted, in seconds; its millis fit in `i64`
pub const MAX_DURATION_SECS: u64 = i64::MAX as u64 / 1000;

/// Aggregate functions supported by the metrics backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Func {
    Avg,
    Min,
    Max,
    Sum,
    Count,
}

impl Func {
    pub fn as_str(&self) -> &'static str {
        match self {
            Func::Avg => "avg",
            Func::Min => "min",
            Func::Max => "max",
            Func::Sum => "sum",
            Func::Count => "count",
        }
    }
}

impl FromStr for Func {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avg" => Ok(Func::Avg),
            "min" => Ok(Func::Min),
            "max" => Ok(Func::Max),
            "sum" => Ok(Func::Sum),
            "count" => Ok(Func::Count),
            _ => Err(ParseError::UnknownFunction(s.to_string())),
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }

    /// Apply `value <op> threshold`
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Gte => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Lte => value <= threshold,
            Comparator::Eq => value == threshold,
            Comparator::Ne => value != threshold,
        }
    }
}

impl FromStr for Comparator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Gte),
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Lte),
            "==" => Ok(Comparator::Eq),
            "!=" => Ok(Comparator::Ne),
            _ => Err(ParseError::UnknownComparator(s.to_string())),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Parsed evaluation rule of an external condition
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    func: Func,
    metric: String,
    /// Aggregation window in seconds, > 0
    period_secs: u64,
    /// Poll interval in minutes, > 0
    interval_mins: u64,
    comparator: Comparator,
    threshold: f64,
}

impl Expression {
    pub fn new(
        func: Func,
        metric: impl Into<String>,
        period_secs: u64,
        interval_mins: u64,
        comparator: Comparator,
        threshold: f64,
    ) -> Result<Self, ParseError> {
        if period_secs == 0 {
            return Err(ParseError::ZeroPeriod);
        }
        if interval_mins == 0 {
            return Err(ParseError::ZeroInterval);
        }
        if period_secs > MAX_DURATION_SECS {
            return Err(ParseError::PeriodTooLong(period_secs));
        }
        if interval_mins > MAX_DURATION_SECS / 60 {
            return Err(ParseError::IntervalTooLong(interval_mins));
        }
        if !threshold.is_finite() {
            return Err(ParseError::InvalidNumber(threshold.to_string()));
        }
        Ok(Self {
            func,
            metric: metric.into(),
            period_secs,
            interval_mins,
            comparator,
            threshold,
        })
    }

    pub fn func(&self) -> Func {
        self.func
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn period_secs(&self) -> u64 {
        self.period_secs
    }

    pub fn interval_mins(&self) -> u64 {
        self.interval_mins
    }

    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Aggregation window
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// Time between evaluations
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_mins.saturating_mul(60))
    }

    /// Whether an observed aggregate satisfies the expression
    pub fn is_true(&self, value: f64) -> bool {
        self.comparator.compare(value, self.threshold)
    }
}

impl FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_expression(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) over {}s {} {} every {}m",
            self.func,
            self.metric,
            self.period_secs,
            self.comparator,
            self.threshold,
            self.interval_mins
        )
    }
}

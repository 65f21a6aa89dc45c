//! Per-condition evaluation pipeline
//!
//! A tick moves through querying the metrics backend, evaluating the
//! expression and, on a match, emitting to alert ingestion. Any failure
//! abandons the tick; the next scheduled tick starts fresh.

pub mod runner;

pub use runner::{EvalError, ExpressionRunner, TickOutcome, DEFAULT_QUERY_TIMEOUT};

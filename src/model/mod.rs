//! Definitions model shared by the reconciler and the runners
//!
//! Triggers and conditions are owned by the definitions service and are
//! read-only here. Evaluation results are built once per matching tick and
//! handed off to alert ingestion.

pub mod condition;
pub mod eval;
pub mod trigger;

pub use condition::{
    AvailabilityCondition, AvailabilityOperator, CompareCondition, Condition, ConditionKey,
    ExternalCondition, StringCondition, StringOperator, ThresholdCondition,
};
pub use eval::{ConditionEval, Data};
pub use trigger::{Tag, Trigger};

//! Evaluation results and the data sent to alert ingestion

use serde::{Deserialize, Serialize};

use super::condition::ExternalCondition;

/// A single string datum for the alerting engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    /// Data ID the receiving condition is keyed on
    pub id: String,
    /// Unix millis
    pub timestamp: i64,
    pub value: String,
}

impl Data {
    pub fn new(id: impl Into<String>, timestamp: i64, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            value: value.into(),
        }
    }
}

/// Outcome of one evaluation of an external condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionEval {
    pub matched: bool,
    /// When the evaluation ran (unix millis)
    pub eval_timestamp: i64,
    /// Timestamp of the metric data the evaluation used (unix millis)
    pub data_timestamp: i64,
    pub condition: ExternalCondition,
    /// Observed aggregate, stringified
    pub value: String,
}

impl ConditionEval {
    pub fn new(
        matched: bool,
        eval_timestamp: i64,
        data_timestamp: i64,
        condition: ExternalCondition,
        value: impl Into<String>,
    ) -> Self {
        Self {
            matched,
            eval_timestamp,
            data_timestamp,
            condition,
            value: value.into(),
        }
    }

    pub fn trigger_id(&self) -> &str {
        &self.condition.trigger_id
    }

    pub fn condition_set_size(&self) -> u32 {
        self.condition.condition_set_size
    }

    pub fn condition_set_index(&self) -> u32 {
        self.condition.condition_set_index
    }

    /// The datum forwarded to alert ingestion for this evaluation
    pub fn to_data(&self) -> Data {
        Data::new(
            self.condition.data_id.clone(),
            self.eval_timestamp,
            self.value.clone(),
        )
    }

    pub fn log(&self) -> String {
        format!(
            "{}, evalTimestamp={}, dataTimestamp={}",
            self.condition.log(&self.value),
            self.eval_timestamp,
            self.data_timestamp
        )
    }
}

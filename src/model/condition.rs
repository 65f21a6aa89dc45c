//! Condition definitions
//!
//! Only [`ExternalCondition`]s are evaluated by this crate. The other
//! variants are evaluated by the alerting engine itself and are carried so
//! that trigger condition sets can be read without loss.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expression::Comparator;

/// Scheduling key of a condition: its stable backing ID within a tenant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConditionKey {
    pub tenant_id: String,
    pub condition_id: String,
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.condition_id)
    }
}

/// A trigger condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    Threshold(ThresholdCondition),
    Compare(CompareCondition),
    String(StringCondition),
    Availability(AvailabilityCondition),
    External(ExternalCondition),
}

impl Condition {
    pub fn tenant_id(&self) -> &str {
        match self {
            Condition::Threshold(c) => &c.tenant_id,
            Condition::Compare(c) => &c.tenant_id,
            Condition::String(c) => &c.tenant_id,
            Condition::Availability(c) => &c.tenant_id,
            Condition::External(c) => &c.tenant_id,
        }
    }

    pub fn trigger_id(&self) -> &str {
        match self {
            Condition::Threshold(c) => &c.trigger_id,
            Condition::Compare(c) => &c.trigger_id,
            Condition::String(c) => &c.trigger_id,
            Condition::Availability(c) => &c.trigger_id,
            Condition::External(c) => &c.trigger_id,
        }
    }

    pub fn condition_id(&self) -> &str {
        match self {
            Condition::Threshold(c) => &c.condition_id,
            Condition::Compare(c) => &c.condition_id,
            Condition::String(c) => &c.condition_id,
            Condition::Availability(c) => &c.condition_id,
            Condition::External(c) => &c.condition_id,
        }
    }

    pub fn key(&self) -> ConditionKey {
        ConditionKey {
            tenant_id: self.tenant_id().to_string(),
            condition_id: self.condition_id().to_string(),
        }
    }

    /// The external condition, if this is one
    pub fn as_external(&self) -> Option<&ExternalCondition> {
        match self {
            Condition::External(c) => Some(c),
            _ => None,
        }
    }
}

/// Backing condition ID used when none is assigned explicitly
pub fn default_condition_id(trigger_id: &str, set_size: u32, set_index: u32) -> String {
    format!("{}-{}-{}", trigger_id, set_size, set_index)
}

/// `data_id <comparator> threshold`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    pub tenant_id: String,
    pub trigger_id: String,
    pub condition_id: String,
    pub data_id: String,
    pub comparator: Comparator,
    pub threshold: f64,
}

/// `data_id <comparator> data2_id * data2_multiplier`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareCondition {
    pub tenant_id: String,
    pub trigger_id: String,
    pub condition_id: String,
    pub data_id: String,
    pub data2_id: String,
    pub comparator: Comparator,
    #[serde(default = "default_multiplier")]
    pub data2_multiplier: f64,
}

fn default_multiplier() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringOperator {
    Equal,
    NotEqual,
    StartsWith,
    EndsWith,
    Contains,
    Match,
}

/// String pattern match on a data value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringCondition {
    pub tenant_id: String,
    pub trigger_id: String,
    pub condition_id: String,
    pub data_id: String,
    pub operator: StringOperator,
    pub pattern: String,
    #[serde(default)]
    pub ignore_case: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityOperator {
    Down,
    NotUp,
    Up,
}

/// Availability state check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityCondition {
    pub tenant_id: String,
    pub trigger_id: String,
    pub condition_id: String,
    pub data_id: String,
    pub operator: AvailabilityOperator,
}

/// Condition whose truth value is computed outside the alerting engine.
///
/// `system_id` names the integration responsible for it and `expression`
/// is that integration's rule text. When the rule holds, the integration
/// sends the observed value as data keyed by `data_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCondition {
    pub tenant_id: String,
    pub trigger_id: String,
    pub condition_id: String,
    pub system_id: String,
    pub data_id: String,
    pub expression: String,
    #[serde(default = "default_set_size")]
    pub condition_set_size: u32,
    #[serde(default = "default_set_index")]
    pub condition_set_index: u32,
}

fn default_set_size() -> u32 {
    1
}

fn default_set_index() -> u32 {
    1
}

impl ExternalCondition {
    /// Create a single-condition-set external condition with the default backing ID
    pub fn new(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        system_id: impl Into<String>,
        data_id: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        let trigger_id = trigger_id.into();
        Self {
            tenant_id: tenant_id.into(),
            condition_id: default_condition_id(&trigger_id, 1, 1),
            trigger_id,
            system_id: system_id.into(),
            data_id: data_id.into(),
            expression: expression.into(),
            condition_set_size: 1,
            condition_set_index: 1,
        }
    }

    /// Place the condition in its set; the backing ID follows the position
    pub fn with_position(mut self, set_size: u32, set_index: u32) -> Self {
        self.condition_set_size = set_size;
        self.condition_set_index = set_index;
        self.condition_id = default_condition_id(&self.trigger_id, set_size, set_index);
        self
    }

    pub fn with_condition_id(mut self, condition_id: impl Into<String>) -> Self {
        self.condition_id = condition_id.into();
        self
    }

    pub fn key(&self) -> ConditionKey {
        ConditionKey {
            tenant_id: self.tenant_id.clone(),
            condition_id: self.condition_id.clone(),
        }
    }

    /// One-line description of an evaluation of this condition
    pub fn log(&self, value: &str) -> String {
        format!(
            "{}: {}[{}] {} = {}",
            self.trigger_id, self.system_id, self.data_id, self.expression, value
        )
    }
}

impl From<ExternalCondition> for Condition {
    fn from(condition: ExternalCondition) -> Self {
        Condition::External(condition)
    }
}

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::shared::ValidationError;

/// One field of a job's staging schema.
///
/// `type` is kept as text here and parsed when the engine is built, so that an unknown type is
/// reported with the job that declared it.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Layout of the hash counter a job drains.
///
/// Each partition is one hash keyed by `<name>:<partition values...>`, and each hash field encodes
/// the group key values joined by `:`, with `:` and `\` inside values escaped by `\`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CounterConfig {
    pub name: String,
    #[serde(default)]
    pub group_keys: Vec<String>,
    #[serde(default)]
    pub partition_keys: Vec<String>,
    /// Row key receiving the counter value.
    #[serde(default = "default_value_field")]
    pub value_field: String,
}

/// A destination table and the way staged rows are merged into it.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DestinationConfig {
    pub table: String,
    pub schema: Option<String>,
    /// Target columns written by the merge.
    pub take: Vec<String>,
    #[serde(default)]
    pub key_fields: Vec<String>,
    #[serde(default)]
    pub increment_fields: Vec<String>,
    /// Increment fields concatenated rather than added, for expression sources.
    #[serde(default)]
    pub text_increment_fields: Vec<String>,
    /// Target column to staging column or SQL expression.
    #[serde(default)]
    pub map: BTreeMap<String, String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub source_conditions: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    pub matching_expr: Option<String>,
    pub value_delimiter: Option<String>,
}

/// A named dump job.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobConfig {
    pub name: String,
    pub temp_table_name: Option<String>,
    /// Seeds the run's common parameters with its arguments.
    #[serde(default = "default_inherit_args")]
    pub inherit_args: bool,
    pub fields: Vec<FieldConfig>,
    pub counter: CounterConfig,
    pub destinations: Vec<DestinationConfig>,
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let prefix = format!("jobs.{}", self.name);

        if self.name.is_empty() {
            return Err(ValidationError::invalid("jobs.name", "must not be empty"));
        }
        if self.fields.is_empty() {
            return Err(ValidationError::invalid(
                format!("{prefix}.fields"),
                "must declare at least one field",
            ));
        }
        if self.counter.name.is_empty() {
            return Err(ValidationError::invalid(
                format!("{prefix}.counter.name"),
                "must not be empty",
            ));
        }
        if self.destinations.is_empty() {
            return Err(ValidationError::invalid(
                format!("{prefix}.destinations"),
                "must declare at least one destination",
            ));
        }

        for destination in &self.destinations {
            if destination.take.is_empty() {
                return Err(ValidationError::invalid(
                    format!("{prefix}.destinations.{}.take", destination.table),
                    "must not be empty",
                ));
            }
            if destination.key_fields.is_empty() && destination.matching_expr.is_none() {
                return Err(ValidationError::invalid(
                    format!("{prefix}.destinations.{}.key_fields", destination.table),
                    "must not be empty unless matching_expr is set",
                ));
            }
        }

        Ok(())
    }
}

fn default_value_field() -> String {
    "value".to_string()
}

fn default_inherit_args() -> bool {
    true
}

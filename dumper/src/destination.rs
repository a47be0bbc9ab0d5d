use std::collections::BTreeMap;

use pg_escape::{quote_identifier, quote_literal};
use postgres::schema::TableName;

use crate::bail;
use crate::error::{DumpResult, ErrorKind};
use crate::schema::{FieldSchema, FieldType};
use crate::sql::{bind_named_params, is_identifier};
use crate::types::Params;

/// Delimiter joining string increments when none is configured.
pub const DEFAULT_VALUE_DELIMITER: &str = ",";

/// Where the value of a target column comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// A staging buffer column.
    Column(String),
    /// A scalar or aggregate SQL expression over the staging buffer, e.g. `sum(value)`.
    Expression(String),
}

impl FieldSource {
    /// Plain identifiers are columns, anything else is an expression.
    pub fn parse(source: &str) -> FieldSource {
        let source = source.trim();
        if is_identifier(source) {
            FieldSource::Column(source.to_string())
        } else {
            FieldSource::Expression(source.to_string())
        }
    }
}

/// A target table and the rules used to merge the staging buffer into it.
///
/// Field names in `fields`, `key_fields`, `increment_fields` and conditions are target column
/// names. A target column reads the staging column of the same name unless it is mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    target: TableName,
    fields: Vec<String>,
    key_fields: Vec<String>,
    increment_fields: Vec<String>,
    text_increment_fields: Vec<String>,
    sources: BTreeMap<String, FieldSource>,
    conditions: Vec<String>,
    source_conditions: Vec<String>,
    group_by: Vec<String>,
    matching_expr: Option<String>,
    value_delimiter: String,
}

impl Destination {
    /// Creates a destination writing `fields` into `target`.
    pub fn new<I, S>(target: TableName, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target,
            fields: fields.into_iter().map(Into::into).collect(),
            key_fields: Vec::new(),
            increment_fields: Vec::new(),
            text_increment_fields: Vec::new(),
            sources: BTreeMap::new(),
            conditions: Vec::new(),
            source_conditions: Vec::new(),
            group_by: Vec::new(),
            matching_expr: None,
            value_delimiter: DEFAULT_VALUE_DELIMITER.to_string(),
        }
    }

    pub fn key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn increment_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.increment_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Increment fields concatenated with the value delimiter instead of added.
    ///
    /// Increments fed by a string column are concatenated anyway. Increments fed by an expression
    /// are added unless listed here.
    pub fn text_increment_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.text_increment_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Reads target column `field` from a staging column or an expression.
    pub fn map(mut self, field: impl Into<String>, source: &str) -> Self {
        self.sources.insert(field.into(), FieldSource::parse(source));
        self
    }

    /// Adds a predicate over `target.*` and `source.*` columns restricting matched rows.
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// Adds a predicate over staging columns restricting the source rows.
    pub fn source_condition(mut self, condition: impl Into<String>) -> Self {
        self.source_conditions.push(condition.into());
        self
    }

    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces key equality with a custom match predicate.
    pub fn matching_expr(mut self, expr: impl Into<String>) -> Self {
        self.matching_expr = Some(expr.into());
        self
    }

    pub fn value_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.value_delimiter = delimiter.into();
        self
    }

    pub fn target(&self) -> &TableName {
        &self.target
    }

    fn source_of(&self, field: &str) -> FieldSource {
        self.sources
            .get(field)
            .cloned()
            .unwrap_or_else(|| FieldSource::Column(field.to_string()))
    }

    /// Type of the staging column feeding `field`, if it is fed by a column.
    fn source_type<'a>(&self, field: &str, schema: &'a FieldSchema) -> Option<&'a FieldType> {
        match self.source_of(field) {
            FieldSource::Column(column) => schema.get(&column).map(|field| &field.field_type),
            FieldSource::Expression(_) => None,
        }
    }

    fn is_text_increment(&self, field: &str, schema: &FieldSchema) -> bool {
        self.text_increment_fields.iter().any(|text| text == field)
            || matches!(self.source_type(field, schema), Some(FieldType::String))
    }

    /// Checks the destination against the job's field schema.
    pub fn validate(&self, schema: &FieldSchema) -> DumpResult<()> {
        if self.fields.is_empty() {
            bail!(
                ErrorKind::SchemaError,
                "Destination takes no fields",
                self.target.to_string()
            );
        }

        if self.key_fields.is_empty() && self.matching_expr.is_none() {
            bail!(
                ErrorKind::SchemaError,
                "Destination has neither key fields nor a matching expression",
                self.target.to_string()
            );
        }

        for field in self.key_fields.iter().chain(&self.increment_fields) {
            if !self.fields.contains(field) {
                bail!(
                    ErrorKind::SchemaError,
                    "Destination key or increment field is not taken",
                    format!("field `{field}` of {}", self.target)
                );
            }
        }

        for field in &self.increment_fields {
            if self.key_fields.contains(field) {
                bail!(
                    ErrorKind::SchemaError,
                    "Destination field is both a key and an increment",
                    format!("field `{field}` of {}", self.target)
                );
            }
        }

        for field in self.fields.iter().chain(self.sources.keys()) {
            if let FieldSource::Column(column) = self.source_of(field)
                && !schema.contains(&column)
            {
                bail!(
                    ErrorKind::SchemaError,
                    "Destination references an unknown field",
                    format!("field `{column}` used by {} is not in the schema", self.target)
                );
            }
        }

        for field in &self.increment_fields {
            if let Some(field_type) = self.source_type(field, schema)
                && !field_type.is_incrementable()
            {
                bail!(
                    ErrorKind::SchemaError,
                    "Destination increments a field that cannot be incremented",
                    format!("field `{field}` of {} has type {field_type}", self.target)
                );
            }
        }

        for field in &self.text_increment_fields {
            if !self.increment_fields.contains(field) {
                bail!(
                    ErrorKind::SchemaError,
                    "Destination text increment is not an increment field",
                    format!("field `{field}` of {}", self.target)
                );
            }

            if let Some(field_type) = self.source_type(field, schema)
                && *field_type != FieldType::String
            {
                bail!(
                    ErrorKind::SchemaError,
                    "Destination text increment is fed by a non-string field",
                    format!("field `{field}` of {} has type {field_type}", self.target)
                );
            }
        }

        Ok(())
    }

    /// Builds the single statement merging `staging` into the target table.
    ///
    /// Rows matching on the key (and conditions) are updated and returned by a CTE, the remaining
    /// source rows are inserted through an anti-join on that CTE.
    pub fn merge_sql(
        &self,
        schema: &FieldSchema,
        staging: &TableName,
        params: &Params,
    ) -> DumpResult<String> {
        let target_table = self.target.as_quoted_identifier();
        let target_fields = self.quoted_fields().join(", ");
        let matching = self.matching_expression(params)?;
        let extra_conditions = self.extra_conditions(params)?;

        let mut source_view = format!(
            "SELECT {} FROM {}",
            self.selected_fields(params)?,
            staging.as_quoted_identifier()
        );
        if !self.source_conditions.is_empty() {
            let conditions = self.bound_conjunction(&self.source_conditions, params)?;
            source_view.push_str(&format!(" WHERE {conditions}"));
        }
        if !self.group_by.is_empty() {
            let group_by = self
                .group_by
                .iter()
                .map(|field| quote_identifier(field).to_string())
                .collect::<Vec<_>>()
                .join(", ");
            source_view.push_str(&format!(" GROUP BY {group_by}"));
        }

        let selected_source_fields = self
            .quoted_fields()
            .iter()
            .map(|field| format!("source.{field}"))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "WITH source AS ({source_view}), \
             updated AS (\
             UPDATE {target_table} AS target SET {updates} \
             FROM source \
             WHERE {matching}{extra_conditions} \
             RETURNING target.*\
             ) \
             INSERT INTO {target_table} ({target_fields}) \
             SELECT {selected_source_fields} FROM source \
             WHERE NOT EXISTS (\
             SELECT 1 FROM updated AS target \
             WHERE {matching}{extra_conditions}\
             )",
            updates = self.updating_expression(schema),
        ))
    }

    fn quoted_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| quote_identifier(field).to_string())
            .collect()
    }

    fn selected_fields(&self, params: &Params) -> DumpResult<String> {
        let mut selected = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            let source = match self.source_of(field) {
                FieldSource::Column(column) => quote_identifier(&column).to_string(),
                FieldSource::Expression(expr) => bind_named_params(&expr, params)?,
            };
            selected.push(format!("{source} AS {}", quote_identifier(field)));
        }

        Ok(selected.join(", "))
    }

    fn updating_expression(&self, schema: &FieldSchema) -> String {
        let mut updates = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            if self.key_fields.contains(field) {
                continue;
            }

            let column = quote_identifier(field);
            let update = if !self.increment_fields.contains(field) {
                format!("{column} = source.{column}")
            } else if self.is_text_increment(field, schema) {
                format!(
                    "{column} = CONCAT_WS({}, source.{column}, NULLIF(target.{column}, ''))",
                    quote_literal(&self.value_delimiter)
                )
            } else {
                format!("{column} = COALESCE(target.{column}, 0) + source.{column}")
            };
            updates.push(update);
        }

        // A key-only destination still needs a SET list for the matching update.
        if updates.is_empty()
            && let Some(field) = self.fields.first()
        {
            let column = quote_identifier(field);
            updates.push(format!("{column} = target.{column}"));
        }

        updates.join(", ")
    }

    fn matching_expression(&self, params: &Params) -> DumpResult<String> {
        if let Some(expr) = &self.matching_expr {
            return Ok(format!("({})", bind_named_params(expr, params)?));
        }

        let source_keys = self
            .key_fields
            .iter()
            .map(|field| format!("source.{}", quote_identifier(field)))
            .collect::<Vec<_>>()
            .join(", ");
        let target_keys = self
            .key_fields
            .iter()
            .map(|field| format!("target.{}", quote_identifier(field)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("({source_keys}) = ({target_keys})"))
    }

    fn extra_conditions(&self, params: &Params) -> DumpResult<String> {
        if self.conditions.is_empty() {
            return Ok(String::new());
        }

        Ok(format!(
            " AND {}",
            self.bound_conjunction(&self.conditions, params)?
        ))
    }

    fn bound_conjunction(&self, conditions: &[String], params: &Params) -> DumpResult<String> {
        let mut bound = Vec::with_capacity(conditions.len());
        for condition in conditions {
            bound.push(format!("({})", bind_named_params(condition, params)?));
        }

        Ok(bound.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![
            Field::new("record_id", FieldType::Integer),
            Field::new("column_id", FieldType::Integer),
            Field::new("visits", FieldType::Integer),
            Field::new("stats_day", FieldType::Date),
            Field::new("referers", FieldType::String),
            Field::new("active", FieldType::Boolean),
        ])
        .unwrap()
    }

    fn staging() -> TableName {
        TableName::unqualified("tmp_stats")
    }

    fn params() -> Params {
        Params::new().with("stats_day", "2015-01-20")
    }

    #[test]
    fn merge_updates_then_inserts_unmatched_rows() {
        let destination = Destination::new(
            TableName::unqualified("stats_by_days"),
            ["record_id", "column_id", "hits", "stats_day"],
        )
        .key_fields(["record_id", "column_id", "stats_day"])
        .increment_fields(["hits"])
        .map("hits", "visits")
        .condition("target.stats_day = :stats_day");

        destination.validate(&schema()).unwrap();
        let sql = destination
            .merge_sql(&schema(), &staging(), &params())
            .unwrap();

        assert_eq!(
            sql,
            "WITH source AS (SELECT record_id AS record_id, column_id AS column_id, \
             visits AS hits, stats_day AS stats_day FROM tmp_stats), \
             updated AS (UPDATE stats_by_days AS target \
             SET hits = COALESCE(target.hits, 0) + source.hits \
             FROM source \
             WHERE (source.record_id, source.column_id, source.stats_day) = \
             (target.record_id, target.column_id, target.stats_day) \
             AND (target.stats_day = '2015-01-20') \
             RETURNING target.*) \
             INSERT INTO stats_by_days (record_id, column_id, hits, stats_day) \
             SELECT source.record_id, source.column_id, source.hits, source.stats_day FROM source \
             WHERE NOT EXISTS (SELECT 1 FROM updated AS target \
             WHERE (source.record_id, source.column_id, source.stats_day) = \
             (target.record_id, target.column_id, target.stats_day) \
             AND (target.stats_day = '2015-01-20'))"
        );
    }

    #[test]
    fn aggregate_sources_are_grouped() {
        let destination = Destination::new(
            TableName::new(Some("stats".to_string()), "stats_agg_totals".to_string()),
            ["record_id", "hits"],
        )
        .key_fields(["record_id"])
        .increment_fields(["hits"])
        .map("hits", "sum(visits)")
        .group_by(["record_id"])
        .source_condition("stats_day >= :stats_day");

        destination.validate(&schema()).unwrap();
        let sql = destination
            .merge_sql(&schema(), &staging(), &params())
            .unwrap();

        assert!(sql.starts_with(
            "WITH source AS (SELECT record_id AS record_id, sum(visits) AS hits FROM tmp_stats \
             WHERE (stats_day >= '2015-01-20') GROUP BY record_id), "
        ));
        assert!(sql.contains("UPDATE stats.stats_agg_totals AS target"));
        assert!(sql.contains("INSERT INTO stats.stats_agg_totals (record_id, hits)"));
    }

    #[test]
    fn string_increments_concatenate_new_before_old() {
        let destination = Destination::new(
            TableName::unqualified("stats_referers"),
            ["record_id", "referers", "active"],
        )
        .key_fields(["record_id"])
        .increment_fields(["referers"])
        .value_delimiter(";");

        destination.validate(&schema()).unwrap();
        let sql = destination
            .merge_sql(&schema(), &staging(), &params())
            .unwrap();

        assert!(sql.contains(
            "SET referers = CONCAT_WS(';', source.referers, NULLIF(target.referers, '')), \
             active = source.active FROM source"
        ));
    }

    #[test]
    fn expression_increments_follow_the_declared_kind() {
        let aggregated = Destination::new(
            TableName::unqualified("record_totals"),
            ["record_id", "referers", "hits"],
        )
        .key_fields(["record_id"])
        .increment_fields(["referers", "hits"])
        .map("referers", "string_agg(referers, ',')")
        .map("hits", "sum(visits)")
        .group_by(["record_id"]);

        let sql = aggregated
            .clone()
            .text_increment_fields(["referers"])
            .merge_sql(&schema(), &staging(), &params())
            .unwrap();
        assert!(sql.contains(
            "SET referers = CONCAT_WS(',', source.referers, NULLIF(target.referers, '')), \
             hits = COALESCE(target.hits, 0) + source.hits FROM source"
        ));

        let sql = aggregated
            .merge_sql(&schema(), &staging(), &params())
            .unwrap();
        assert!(sql.contains("SET referers = COALESCE(target.referers, 0) + source.referers"));
    }

    #[test]
    fn text_increments_must_be_string_increments() {
        let not_an_increment = Destination::new(
            TableName::unqualified("record_totals"),
            ["record_id", "referers"],
        )
        .key_fields(["record_id"])
        .text_increment_fields(["referers"]);
        let err = not_an_increment.validate(&schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);

        let integer_column = Destination::new(
            TableName::unqualified("record_totals"),
            ["record_id", "visits"],
        )
        .key_fields(["record_id"])
        .increment_fields(["visits"])
        .text_increment_fields(["visits"]);
        let err = integer_column.validate(&schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn custom_matching_expression_replaces_key_equality() {
        let destination = Destination::new(
            TableName::unqualified("stats_referers"),
            ["record_id", "referers", "hits"],
        )
        .key_fields(["record_id", "referers"])
        .increment_fields(["hits"])
        .map("hits", "visits")
        .matching_expr(
            "source.record_id = target.record_id \
             AND COALESCE(source.referers, '') = COALESCE(target.referers, '')",
        );

        let sql = destination
            .merge_sql(&schema(), &staging(), &params())
            .unwrap();

        assert!(sql.contains(
            "WHERE (source.record_id = target.record_id \
             AND COALESCE(source.referers, '') = COALESCE(target.referers, '')) RETURNING"
        ));
        assert!(!sql.contains("(source.record_id, source.referers)"));
    }

    #[test]
    fn key_only_destination_keeps_a_set_list() {
        let destination = Destination::new(TableName::unqualified("seen_records"), ["record_id"])
            .key_fields(["record_id"]);

        let sql = destination
            .merge_sql(&schema(), &staging(), &params())
            .unwrap();

        assert!(sql.contains("SET record_id = target.record_id FROM source"));
    }

    #[test]
    fn unknown_fields_are_schema_errors() {
        let destination = Destination::new(
            TableName::unqualified("stats_totals"),
            ["record_id", "hits"],
        )
        .key_fields(["record_id"])
        .increment_fields(["hits"]);

        let err = destination.validate(&schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
        assert!(err.detail().unwrap().contains("`hits`"));
    }

    #[test]
    fn keys_and_increments_must_be_taken() {
        let destination = Destination::new(TableName::unqualified("stats_totals"), ["record_id"])
            .key_fields(["record_id", "column_id"]);

        let err = destination.validate(&schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn non_incrementable_fields_are_rejected() {
        let destination = Destination::new(
            TableName::unqualified("stats_totals"),
            ["record_id", "active"],
        )
        .key_fields(["record_id"])
        .increment_fields(["active"]);

        let err = destination.validate(&schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn destinations_need_keys_or_matching_expression() {
        let destination =
            Destination::new(TableName::unqualified("stats_totals"), ["record_id"]);

        let err = destination.validate(&schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn unbound_condition_parameters_fail_merge() {
        let destination = Destination::new(TableName::unqualified("stats_totals"), ["record_id"])
            .key_fields(["record_id"])
            .condition("target.region = :region");

        let err = destination
            .merge_sql(&schema(), &staging(), &params())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);
    }
}

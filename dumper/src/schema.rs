//! Field schema of a dump job and conversion of counter values into staging literals.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use pg_escape::{quote_identifier, quote_literal};

use crate::error::{DumpError, DumpResult, ErrorKind};
use crate::types::{DATE_FORMAT, Row, TIMESTAMP_FORMAT, Value};
use crate::{bail, dump_error};

/// Column type used for string fields in the staging buffer.
const STRING_COLUMN_TYPE: &str = "character varying(4000)";

/// Column type used for integer fields in the staging buffer.
///
/// Counter values are 64-bit, staging them as `bigint` keeps large totals exact.
const INTEGER_COLUMN_TYPE: &str = "bigint";

/// Prefix of enumerated type declarations, e.g. `enum:visit_kind`.
const ENUM_TYPE_PREFIX: &str = "enum:";

/// Data type of a schema field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Integer,
    Date,
    Timestamp,
    Boolean,
    Hstore,
    /// A Postgres enumerated type, by name.
    Enum(String),
}

impl FieldType {
    /// Returns the staging buffer column type.
    ///
    /// Enumerated type names are quoted, a `schema.name` declaration is quoted per part.
    pub fn column_type(&self) -> String {
        match self {
            FieldType::String => STRING_COLUMN_TYPE.to_string(),
            FieldType::Integer => INTEGER_COLUMN_TYPE.to_string(),
            FieldType::Date => "date".to_string(),
            FieldType::Timestamp => "timestamp".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Hstore => "hstore".to_string(),
            FieldType::Enum(name) => match name.split_once('.') {
                Some((schema, name)) => {
                    format!("{}.{}", quote_identifier(schema), quote_identifier(name))
                }
                None => quote_identifier(name).to_string(),
            },
        }
    }

    /// Returns `true` if the type can be incremented on merge.
    ///
    /// Integers are added, strings are concatenated.
    pub fn is_incrementable(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::String)
    }

    /// Encodes `value` as a SQL literal for a column of this type.
    ///
    /// Integers are written unquoted, nulls as `NULL` and everything else as a quoted string.
    /// Strings holding dates, timestamps, integers or booleans are parsed first so that a bad
    /// value fails here instead of inside the relational store.
    pub fn encode(&self, field: &str, value: &Value) -> DumpResult<String> {
        if value.is_null() {
            return Ok("NULL".to_string());
        }

        let literal = match (self, value) {
            (FieldType::Integer, Value::Integer(value)) => value.to_string(),
            (FieldType::Integer, Value::String(text)) => text.trim().parse::<i64>()?.to_string(),

            (FieldType::Date, Value::Date(date)) => quote_date(date),
            (FieldType::Date, Value::Timestamp(timestamp)) => quote_date(&timestamp.date()),
            (FieldType::Date, Value::String(text)) => {
                quote_date(&NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)?)
            }

            (FieldType::Timestamp, Value::Timestamp(timestamp)) => quote_timestamp(timestamp),
            (FieldType::Timestamp, Value::Date(date)) => {
                quote_timestamp(&date.and_time(chrono::NaiveTime::MIN))
            }
            (FieldType::Timestamp, Value::String(text)) => quote_timestamp(&parse_timestamp(text)?),

            (FieldType::Boolean, Value::Bool(value)) => quote_literal(&value.to_string()).to_string(),
            (FieldType::Boolean, Value::Integer(value @ (0 | 1))) => {
                quote_literal(&(*value == 1).to_string()).to_string()
            }
            (FieldType::Boolean, Value::String(text)) => {
                quote_literal(&parse_bool(field, text)?.to_string()).to_string()
            }

            (FieldType::Hstore, Value::Map(_) | Value::String(_)) => {
                quote_literal(&value.to_string()).to_string()
            }

            (FieldType::String | FieldType::Enum(_), Value::Map(_)) => {
                bail!(
                    ErrorKind::ConversionError,
                    "Value cannot be encoded for its field type",
                    format!("field `{field}` of type {self} cannot hold a key/value map")
                );
            }
            (FieldType::String | FieldType::Enum(_), value) => {
                quote_literal(&value.to_string()).to_string()
            }

            (_, value) => {
                bail!(
                    ErrorKind::ConversionError,
                    "Value cannot be encoded for its field type",
                    format!("field `{field}` of type {self} cannot hold {value:?}")
                );
            }
        };

        Ok(literal)
    }
}

fn quote_date(date: &NaiveDate) -> String {
    quote_literal(&date.format(DATE_FORMAT).to_string()).to_string()
}

fn quote_timestamp(timestamp: &NaiveDateTime) -> String {
    quote_literal(&timestamp.format(TIMESTAMP_FORMAT).to_string()).to_string()
}

fn parse_timestamp(text: &str) -> DumpResult<NaiveDateTime> {
    let text = text.trim();

    if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
        return Ok(timestamp);
    }
    if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(timestamp);
    }

    let date = NaiveDate::parse_from_str(text, DATE_FORMAT)?;
    Ok(date.and_time(chrono::NaiveTime::MIN))
}

fn parse_bool(field: &str, text: &str) -> DumpResult<bool> {
    match text.trim().to_lowercase().as_str() {
        "t" | "true" | "1" | "yes" => Ok(true),
        "f" | "false" | "0" | "no" => Ok(false),
        other => Err(dump_error!(
            ErrorKind::ConversionError,
            "Value cannot be encoded for its field type",
            format!("field `{field}` expects a boolean, got `{other}`")
        )),
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Date => f.write_str("date"),
            FieldType::Timestamp => f.write_str("timestamp"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Hstore => f.write_str("hstore"),
            FieldType::Enum(name) => write!(f, "{ENUM_TYPE_PREFIX}{name}"),
        }
    }
}

/// Parses the declaration names used in job configuration.
impl FromStr for FieldType {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let declared = s.trim();

        if let Some(name) = declared.strip_prefix(ENUM_TYPE_PREFIX) {
            let name = name.trim();
            if name.is_empty() {
                bail!(
                    ErrorKind::UnknownFieldType,
                    "Enumerated field type has no name",
                    declared.to_string()
                );
            }
            return Ok(FieldType::Enum(name.to_string()));
        }

        let field_type = match declared.to_lowercase().as_str() {
            "string" | "text" => FieldType::String,
            "integer" | "serial" | "number" => FieldType::Integer,
            "date" => FieldType::Date,
            "timestamp" => FieldType::Timestamp,
            "boolean" => FieldType::Boolean,
            "hstore" => FieldType::Hstore,
            _ => bail!(
                ErrorKind::UnknownFieldType,
                "Unknown field type",
                format!("`{declared}` is not a supported field type")
            ),
        };

        Ok(field_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Ordered fields of a job, which are also the columns of its staging buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<Field>,
}

impl FieldSchema {
    /// Builds a schema, rejecting empty schemas and duplicate names.
    pub fn new(fields: Vec<Field>) -> DumpResult<Self> {
        if fields.is_empty() {
            bail!(ErrorKind::SchemaError, "Field schema declares no fields");
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                bail!(
                    ErrorKind::SchemaError,
                    "Field schema declares a field twice",
                    field.name.clone()
                );
            }
        }

        Ok(Self { fields })
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns `name type, ...` for `CREATE TABLE`.
    pub fn column_definitions(&self) -> String {
        self.fields
            .iter()
            .map(|field| {
                format!(
                    "{} {}",
                    quote_identifier(&field.name),
                    field.field_type.column_type()
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns the quoted column list in schema order.
    pub fn column_list(&self) -> String {
        self.fields
            .iter()
            .map(|field| quote_identifier(&field.name).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Projects a prepared row onto the schema and encodes it as `(v1, v2, ...)`.
    ///
    /// Extra keys are ignored. A missing key fails the row.
    pub fn encode_row(&self, row: &Row) -> DumpResult<String> {
        let mut literals = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            let Some(value) = row.get(&field.name) else {
                bail!(
                    ErrorKind::MissingField,
                    "Row is missing a declared field",
                    format!("field `{}` is absent from row {row:?}", field.name)
                );
            };

            literals.push(field.field_type.encode(&field.name, value)?);
        }

        Ok(format!("({})", literals.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Params;

    fn stats_schema() -> FieldSchema {
        FieldSchema::new(vec![
            Field::new("record_id", FieldType::Integer),
            Field::new("stats_day", FieldType::Date),
            Field::new("referer", FieldType::String),
            Field::new("hits", FieldType::Integer),
        ])
        .unwrap()
    }

    #[test]
    fn parses_declared_types() {
        assert_eq!("text".parse::<FieldType>().unwrap(), FieldType::String);
        assert_eq!("serial".parse::<FieldType>().unwrap(), FieldType::Integer);
        assert_eq!("Number".parse::<FieldType>().unwrap(), FieldType::Integer);
        assert_eq!("hstore".parse::<FieldType>().unwrap(), FieldType::Hstore);
        assert_eq!(
            "enum:visit_kind".parse::<FieldType>().unwrap(),
            FieldType::Enum("visit_kind".to_string())
        );
    }

    #[test]
    fn unknown_types_are_rejected() {
        let err = "float".parse::<FieldType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownFieldType);

        let err = "enum:".parse::<FieldType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownFieldType);
    }

    #[test]
    fn column_types_follow_field_types() {
        assert_eq!(FieldType::String.column_type(), "character varying(4000)");
        assert_eq!(FieldType::Integer.column_type(), "bigint");
        assert_eq!(FieldType::Timestamp.column_type(), "timestamp");
        assert_eq!(
            FieldType::Enum("visit_kind".to_string()).column_type(),
            "visit_kind"
        );
    }

    #[test]
    fn enum_type_names_are_quoted() {
        assert_eq!(
            FieldType::Enum("stats.visit_kind".to_string()).column_type(),
            "stats.visit_kind"
        );
        assert_eq!(
            FieldType::Enum("VisitKind".to_string()).column_type(),
            "\"VisitKind\""
        );
        assert_eq!(
            FieldType::Enum("visit kind); drop table records; --".to_string()).column_type(),
            "\"visit kind); drop table records; --\""
        );
        assert_eq!(
            FieldType::Enum("Stats.visit_kind".to_string()).column_type(),
            "\"Stats\".visit_kind"
        );
    }

    #[test]
    fn integers_pass_through_and_others_are_quoted() {
        assert_eq!(
            FieldType::Integer.encode("hits", &Value::Integer(42)).unwrap(),
            "42"
        );
        assert_eq!(
            FieldType::Integer.encode("hits", &Value::from(" 17 ")).unwrap(),
            "17"
        );
        assert_eq!(
            FieldType::String.encode("referer", &Value::Integer(5)).unwrap(),
            "'5'"
        );
        assert_eq!(
            FieldType::Date.encode("stats_day", &Value::from("2024-01-01")).unwrap(),
            "'2024-01-01'"
        );
        assert_eq!(
            FieldType::Boolean.encode("active", &Value::from("t")).unwrap(),
            "'true'"
        );
        assert_eq!(FieldType::Date.encode("stats_day", &Value::Null).unwrap(), "NULL");
    }

    #[test]
    fn bad_values_fail_with_conversion_error() {
        let err = FieldType::Integer
            .encode("hits", &Value::from("many"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);

        let err = FieldType::Date
            .encode("stats_day", &Value::from("20/01/2015"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);

        let err = FieldType::Integer
            .encode("hits", &Value::Bool(true))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn duplicate_and_empty_schemas_are_rejected() {
        let err = FieldSchema::new(vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);

        let err = FieldSchema::new(vec![
            Field::new("hits", FieldType::Integer),
            Field::new("hits", FieldType::String),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn encode_row_projects_in_schema_order() {
        let row = Params::new()
            .with("hits", 3)
            .with("referer", "example.org")
            .with("stats_day", "2024-01-01")
            .with("record_id", 1)
            .with("unused", "ignored");

        assert_eq!(
            stats_schema().encode_row(&row).unwrap(),
            "(1, '2024-01-01', 'example.org', 3)"
        );
    }

    #[test]
    fn encode_row_requires_every_field() {
        let row = Params::new().with("record_id", 1).with("hits", 3);

        let err = stats_schema().encode_row(&row).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert!(err.detail().unwrap().contains("stats_day"));
    }
}

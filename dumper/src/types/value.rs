use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use pg_escape::quote_literal;

/// Format used for dates in literals and counter keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format used for timestamps in literals.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single value of a row, run argument or common parameter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    String(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Key/value blob stored as `hstore`.
    Map(BTreeMap<String, Option<String>>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value as a SQL literal without type information.
    ///
    /// Integers are written as is, `Null` as `NULL`, everything else as a quoted string.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(value) => value.to_string(),
            other => quote_literal(&other.to_string()).to_string(),
        }
    }
}

/// Text form of a value, as written into quoted literals.
///
/// Maps use the `hstore` input syntax.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Integer(value) => write!(f, "{value}"),
            Value::String(value) => f.write_str(value),
            Value::Date(value) => write!(f, "{}", value.format(DATE_FORMAT)),
            Value::Timestamp(value) => write!(f, "{}", value.format(TIMESTAMP_FORMAT)),
            Value::Map(entries) => {
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write_hstore_text(f, key)?;
                    f.write_str("=>")?;
                    match value {
                        Some(value) => write_hstore_text(f, value)?,
                        None => f.write_str("NULL")?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn write_hstore_text(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in text.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<BTreeMap<String, Option<String>>> for Value {
    fn from(value: BTreeMap<String, Option<String>>) -> Self {
        Value::Map(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

use std::fmt;

use pg_escape::quote_identifier;

/// A possibly schema-qualified Postgres table name.
///
/// Without a schema the table is resolved through the connection's `search_path`, which is also
/// how temporary tables are reached.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(schema: Option<String>, name: String) -> TableName {
        Self { schema, name }
    }

    /// Creates an unqualified table name.
    pub fn unqualified(name: impl Into<String>) -> TableName {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Returns the table name as a properly quoted Postgres identifier.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_name = quote_identifier(&self.name);

        match &self.schema {
            Some(schema) => format!("{}.{quoted_name}", quote_identifier(schema)),
            None => quoted_name.to_string(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

use thiserror::Error;

/// Errors reported by `validate()` on configuration types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },

    #[error("tls is enabled but no trusted root certificates were provided")]
    MissingTrustedRootCerts,

    #[error("job `{0}` is defined more than once")]
    DuplicateJob(String),
}

impl ValidationError {
    pub(crate) fn invalid(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        ValidationError::InvalidFieldValue {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}

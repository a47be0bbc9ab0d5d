//! Error types and result definitions for dump runs.
//!
//! [`DumpError`] carries a classification ([`ErrorKind`]), a static description, optional dynamic
//! detail and source, and the callsite where it was created. Several errors can be aggregated into
//! one value when more than one operation fails.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type for dump operations.
pub type DumpResult<T> = Result<T, DumpError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for dump runs.
#[derive(Debug, Clone)]
pub struct DumpError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    Many {
        errors: Vec<DumpError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors raised while building or running a dump.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Schema & Declaration Errors
    SchemaError,
    UnknownFieldType,

    // Row & Value Errors
    MissingField,
    MissingParameter,
    ConversionError,
    InvalidData,

    // Relational Store Errors
    RelationalConnectionFailed,
    RelationalQueryFailed,

    // Counter Store Errors
    CounterConnectionFailed,
    CounterQueryFailed,

    // Relational data committed, counter data not deleted
    PartialCommit,

    // Configuration & Lookup Errors
    ConfigError,
    UnknownJob,

    Unknown,

    #[cfg(feature = "failpoints")]
    FailpointTriggered,
}

impl ErrorKind {
    /// Returns `true` for failures reported by either store.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::RelationalConnectionFailed
                | ErrorKind::RelationalQueryFailed
                | ErrorKind::CounterConnectionFailed
                | ErrorKind::CounterQueryFailed
        )
    }
}

impl DumpError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if there is none.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(&payload.description),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the dynamic detail, or the first one found among aggregated errors.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        DumpError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for DumpError {
    fn eq(&self, other: &DumpError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail", detail)?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_indented(f, "Backtrace", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for DumpError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, title: &str, body: &str) -> fmt::Result {
    if body.trim().is_empty() {
        return write!(f, "\n  {title}: <empty>");
    }

    write!(f, "\n  {title}:")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for DumpError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> DumpError {
        DumpError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for DumpError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> DumpError {
        DumpError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors, returning the only element unwrapped when there is exactly one.
impl<E> From<Vec<E>> for DumpError
where
    E: Into<DumpError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> DumpError {
        let location = Location::caller();
        let mut errors: Vec<DumpError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        DumpError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::num::ParseIntError> for DumpError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> DumpError {
        let detail = err.to_string();
        DumpError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Integer parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<chrono::ParseError> for DumpError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> DumpError {
        let detail = err.to_string();
        DumpError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Date or time parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps pool and I/O failures to [`ErrorKind::RelationalConnectionFailed`] and everything else to
/// [`ErrorKind::RelationalQueryFailed`].
impl From<sqlx::Error> for DumpError {
    #[track_caller]
    fn from(err: sqlx::Error) -> DumpError {
        let kind = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut => ErrorKind::RelationalConnectionFailed,
            _ => ErrorKind::RelationalQueryFailed,
        };

        let detail = err.to_string();
        DumpError::from_components(
            kind,
            Cow::Borrowed("Relational store operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps connection level failures to [`ErrorKind::CounterConnectionFailed`] and everything else
/// to [`ErrorKind::CounterQueryFailed`].
impl From<fred::error::Error> for DumpError {
    #[track_caller]
    fn from(err: fred::error::Error) -> DumpError {
        use fred::error::ErrorKind as FredErrorKind;

        let kind = match err.kind() {
            FredErrorKind::IO
            | FredErrorKind::Auth
            | FredErrorKind::Timeout
            | FredErrorKind::Canceled => ErrorKind::CounterConnectionFailed,
            _ => ErrorKind::CounterQueryFailed,
        };

        let detail = err.to_string();
        DumpError::from_components(
            kind,
            Cow::Borrowed("Counter store operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, dump_error};

    fn failing(field: &str) -> DumpResult<()> {
        bail!(
            ErrorKind::MissingField,
            "Row is missing a declared field",
            format!("field `{field}` is absent")
        );
    }

    #[test]
    fn display_includes_kind_description_and_detail() {
        let err = failing("hits").unwrap_err();
        let rendered = err.to_string();

        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert!(rendered.starts_with("[MissingField] Row is missing a declared field @ "));
        assert!(rendered.contains("field `hits` is absent"));
        assert_eq!(err.detail(), Some("field `hits` is absent"));
    }

    #[test]
    fn aggregated_errors_report_all_kinds() {
        let err = DumpError::from(vec![
            dump_error!(ErrorKind::RelationalQueryFailed, "Merge failed"),
            dump_error!(ErrorKind::CounterQueryFailed, "Delete failed"),
        ]);

        assert_eq!(err.kind(), ErrorKind::RelationalQueryFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::RelationalQueryFailed, ErrorKind::CounterQueryFailed]
        );
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated"));
    }

    #[test]
    fn single_error_vector_is_unwrapped() {
        let err = DumpError::from(vec![dump_error!(ErrorKind::SchemaError, "Bad schema")]);
        assert_eq!(err.description(), Some("Bad schema"));
    }

    #[test]
    fn wrapped_source_is_exposed() {
        let inner = dump_error!(ErrorKind::CounterQueryFailed, "Delete failed");
        let err = dump_error!(
            ErrorKind::PartialCommit,
            "Counter data was merged but not deleted",
            source: inner
        );

        let source = error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("Delete failed"));
    }

    #[test]
    fn store_errors_are_classified() {
        assert!(ErrorKind::RelationalQueryFailed.is_store_error());
        assert!(ErrorKind::CounterConnectionFailed.is_store_error());
        assert!(!ErrorKind::PartialCommit.is_store_error());
        assert!(!ErrorKind::MissingField.is_store_error());
    }
}

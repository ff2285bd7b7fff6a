//! Error taxonomy shared by every public operation.
//!
//! Each failure surfaces as a single [`Error`] whose [`ErrorKind`] tells the
//! caller which category it belongs to:
//!
//! - [`ErrorKind::NotFound`] - missing root directory or file
//! - [`ErrorKind::Io`] - permission, medium, or transient I/O failures
//! - [`ErrorKind::Format`] - corrupt footer, unsupported encoding, codec failures
//! - [`ErrorKind::Schema`] - irreconcilable column types across fragments
//! - [`ErrorKind::Resource`] - materialization exceeded the configured memory budget
//! - [`ErrorKind::Invalid`] - invalid arguments (unknown columns, bad templates, bad URIs)
//! - [`ErrorKind::AlreadyExists`] - a write target already holds data
//! - [`ErrorKind::Cancelled`] - a scan observed its cancellation token

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use std::fmt;

/// Coarse error category, stable for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Io,
    Format,
    Schema,
    Resource,
    Invalid,
    AlreadyExists,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NotFound",
            Self::Io => "IOError",
            Self::Format => "FormatError",
            Self::Schema => "SchemaError",
            Self::Resource => "ResourceError",
            Self::Invalid => "Invalid",
            Self::AlreadyExists => "AlreadyExists",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// The single structured error returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("NotFound: {path}")]
    NotFound { path: String },

    #[error("IOError: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("FormatError: {context}: {message}")]
    Format { context: String, message: String },

    #[error("SchemaError: {0}")]
    Schema(String),

    #[error("ResourceError: {0}")]
    Resource(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("AlreadyExists: {path}")]
    AlreadyExists { path: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::Format { .. } => ErrorKind::Format,
            Self::Schema(_) => ErrorKind::Schema,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Wrap a std I/O error, promoting `ErrorKind::NotFound` to [`Error::NotFound`].
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        let context = context.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound { path: context };
        }
        Self::Io { context, source }
    }

    pub fn format(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Format {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Map an Arrow error raised while handling `context`.
    pub fn from_arrow(context: impl Into<String>, err: ArrowError) -> Self {
        match err {
            ArrowError::IoError(_, source) => Self::io(context, source),
            ArrowError::ExternalError(inner) => match inner.downcast::<Self>() {
                Ok(ours) => *ours,
                Err(other) => Self::format(context, other),
            },
            other => Self::format(context, other),
        }
    }

    /// Map a Parquet error raised while handling `context`.
    pub fn from_parquet(context: impl Into<String>, err: ParquetError) -> Self {
        match err {
            ParquetError::External(inner) => match inner.downcast::<std::io::Error>() {
                Ok(io) => Self::io(context, *io),
                Err(other) => Self::format(context, other),
            },
            other => Self::format(context, other),
        }
    }

    /// Wrap this error so it can travel through Arrow APIs and be recovered intact.
    #[must_use]
    pub fn into_arrow(self) -> ArrowError {
        ArrowError::ExternalError(Box::new(self))
    }
}

impl From<ArrowError> for Error {
    fn from(err: ArrowError) -> Self {
        Self::from_arrow("arrow", err)
    }
}

impl From<ParquetError> for Error {
    fn from(err: ParquetError) -> Self {
        Self::from_parquet("parquet", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_is_promoted() {
        let err = Error::io(
            "data/missing.parquet",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn arrow_round_trip_keeps_kind() {
        let original = Error::Cancelled("scan".into());
        let back = Error::from(original.into_arrow());
        assert_eq!(back.kind(), ErrorKind::Cancelled);
    }
}

//! Error values raised by flatbridge components.
//!
//! Every failure is reported through [`anyhow::Error`], the same way the rest of
//! the crate propagates errors with `?` and `.with_context(..)`. The root cause of
//! a failure raised by flatbridge itself is a [`FlatError`], which records which
//! component raised it and which category it belongs to. Hosts that need to react
//! to a category can recover it with [`error_kind`]:
//!
//! ```
//! use flatbridge::error::{FlatError, ErrorKind, error_kind};
//!
//! let err: anyhow::Error = FlatError::schema("segment HDR", "missing discriminator").into();
//! let err = err.context("build file schema");
//! assert_eq!(error_kind(&err), Some(ErrorKind::Schema));
//! ```

use std::fmt;
use thiserror::Error;

/// Category of a [`FlatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed rules, missing discriminators, cyclic or incomplete link trees,
    /// unknown field/table references.
    Schema,
    /// Open/read/write failures on a file.
    Io,
    /// Record framing problems: unterminated quoted field, separator embedded
    /// in unquoted content.
    Codec,
    /// A value does not fit its declared field type.
    Conversion,
    /// Non-conformant record sequencing or store constraint violations.
    Mapping,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Schema => "schema",
            ErrorKind::Io => "io",
            ErrorKind::Codec => "codec",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Mapping => "mapping",
        };
        f.write_str(s)
    }
}

/// The single error type raised by flatbridge components.
///
/// `source_id` names the object that raised the error (a segment, a table, a
/// file). Underlying causes are chained by `anyhow` when a `FlatError` is attached
/// as context to another error.
#[derive(Debug, Clone, Error)]
#[error("{kind} error in {source_id}: {message}")]
pub struct FlatError {
    pub kind: ErrorKind,
    pub source_id: String,
    pub message: String,
}

impl FlatError {
    pub fn new(kind: ErrorKind, source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    pub fn schema(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, source_id, message)
    }

    pub fn io(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, source_id, message)
    }

    pub fn codec(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Codec, source_id, message)
    }

    pub fn conversion(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conversion, source_id, message)
    }

    pub fn mapping(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Mapping, source_id, message)
    }
}

/// Return the kind of the outermost [`FlatError`] attached to `err`.
///
/// A component that rewraps a lower-level failure with its own `FlatError`
/// context decides the reported category.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    flat_error(err).map(|e| e.kind)
}

/// Return the outermost [`FlatError`] attached to `err`, whether it is the root
/// error or a context layer.
pub fn flat_error(err: &anyhow::Error) -> Option<&FlatError> {
    err.downcast_ref::<FlatError>().or_else(|| {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<FlatError>())
    })
}

/// Bail out of the current function with a [`FlatError`].
///
/// ```ignore
/// flat_bail!(schema, "segment HDR", "field {} declared twice", name);
/// ```
#[macro_export]
macro_rules! flat_bail {
    ($kind:ident, $source:expr, $($arg:tt)+) => {
        return Err(::anyhow::Error::new($crate::error::FlatError::$kind($source, format!($($arg)+))))
    };
}

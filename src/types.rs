//! Field codecs.
//!
//! [`FieldType`] is the closed set of value codecs shared by file fields and
//! table columns. Every variant converts raw field text to a [`Value`]
//! ([`FieldType::parse`]) and back ([`FieldType::format`]); a value that does not
//! fit is rejected with a conversion error rather than partially converted.
//!
//! | type       | format examples                  | fixed length          |
//! |------------|----------------------------------|-----------------------|
//! | `alpha`    | `X`, `X[10]`                     | `n` when bracketed    |
//! | `integer`  | `9`, `9[5]`                      | `n` when bracketed    |
//! | `decimal`  | `9.0`, `9[3]0[2]`, `9[5],0[2]`   | when both widths set  |
//! | `datetime` | `DD/MM/YYYY`, `YYYYMMDDhhmmss`   | always (pattern)      |
//! | `memo`     | (none)                           | never                 |
//!
//! ```
//! use flatbridge::types::{FieldType, Value};
//! use rust_decimal::Decimal;
//! use std::str::FromStr;
//!
//! let amount = FieldType::from_spec("decimal", "9[3]0[2]")?;
//! assert_eq!(amount.format(&Value::Decimal(Decimal::from_str("7.5")?))?, "00750");
//! assert_eq!(amount.parse("00750")?, Value::Decimal(Decimal::from_str("7.50")?));
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod alpha;
pub mod datetime;
pub mod decimal;
pub mod integer;
pub mod value;

pub use alpha::AlphaFormat;
pub use datetime::{DateTimeFormat, DateTimeKind};
pub use decimal::DecimalFormat;
pub use integer::IntegerFormat;
pub use value::Value;

use crate::error::FlatError;
use anyhow::Result;
use std::fmt;

/// A field or column codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Alpha(AlphaFormat),
    Integer(IntegerFormat),
    Decimal(DecimalFormat),
    DateTime(DateTimeFormat),
    /// Free text, variable length, passed through unchanged.
    Memo,
}

impl FieldType {
    /// Build a codec from a type name and its format string.
    ///
    /// # Errors
    /// Unknown type names and malformed formats are schema errors.
    pub fn from_spec(kind: &str, format: &str) -> Result<Self> {
        let format = format.trim();
        match kind.trim().to_ascii_lowercase().as_str() {
            "alpha" | "alphanumeric" | "text" | "x" => Ok(FieldType::Alpha(AlphaFormat::parse_spec(format)?)),
            "integer" | "int" => Ok(FieldType::Integer(IntegerFormat::parse_spec(format)?)),
            "decimal" | "numeric" => Ok(FieldType::Decimal(DecimalFormat::parse_spec(format)?)),
            "datetime" | "date" | "time" | "timestamp" => {
                Ok(FieldType::DateTime(DateTimeFormat::parse_spec(format)?))
            }
            "memo" => Ok(FieldType::Memo),
            other => Err(FlatError::schema(
                "field type",
                format!("unknown field type {other:?} (expected alpha, integer, decimal, datetime or memo)"),
            )
            .into()),
        }
    }

    /// Variable-length alphanumeric text.
    pub fn alpha() -> Self {
        FieldType::Alpha(AlphaFormat::variable())
    }

    pub fn alpha_fixed(length: usize) -> Self {
        FieldType::Alpha(AlphaFormat::fixed(length))
    }

    pub fn integer() -> Self {
        FieldType::Integer(IntegerFormat::variable())
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Alpha(_) => "alpha",
            FieldType::Integer(_) => "integer",
            FieldType::Decimal(_) => "decimal",
            FieldType::DateTime(_) => "datetime",
            FieldType::Memo => "memo",
        }
    }

    pub fn is_memo(&self) -> bool {
        matches!(self, FieldType::Memo)
    }

    /// Length in characters of every formatted value, when the format fixes it.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            FieldType::Alpha(f) => f.length,
            FieldType::Integer(f) => f.width,
            FieldType::Decimal(f) => f.fixed_len(),
            FieldType::DateTime(f) => Some(f.len()),
            FieldType::Memo => None,
        }
    }

    /// Convert raw field text to a value.
    ///
    /// # Errors
    /// Text that does not match the format is a conversion error.
    pub fn parse(&self, raw: &str) -> Result<Value> {
        match self {
            FieldType::Alpha(f) => f.parse(raw),
            FieldType::Integer(f) => f.parse(raw),
            FieldType::Decimal(f) => f.parse(raw),
            FieldType::DateTime(f) => f.parse(raw),
            FieldType::Memo => Ok(Value::Text(raw.to_string())),
        }
    }

    /// Convert a value to raw field text. Fixed formats always produce exactly
    /// [`fixed_len`](Self::fixed_len) characters.
    ///
    /// # Errors
    /// Values that do not fit the declared width, or cannot be converted to this
    /// type, are conversion errors.
    pub fn format(&self, value: &Value) -> Result<String> {
        match self {
            FieldType::Alpha(f) => f.format(value),
            FieldType::Integer(f) => f.format(value),
            FieldType::Decimal(f) => f.format(value),
            FieldType::DateTime(f) => f.format(value),
            FieldType::Memo => match value {
                Value::Null => Ok(String::new()),
                other => Ok(other.to_string()),
            },
        }
    }

    /// Convert a value produced by another codec to this type's value domain.
    ///
    /// # Errors
    /// Returns a conversion error when no lossless conversion exists.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            FieldType::Alpha(_) | FieldType::Memo => match value {
                Value::Text(s) => Ok(Value::Text(s)),
                other => Ok(Value::Text(other.to_string())),
            },
            FieldType::Integer(f) => f.coerce(value),
            FieldType::Decimal(f) => f.coerce(value),
            FieldType::DateTime(f) => f.coerce(value),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Alpha(a) => write!(f, "alpha({a})"),
            FieldType::Integer(i) => write!(f, "integer({i})"),
            FieldType::Decimal(d) => write!(f, "decimal({d})"),
            FieldType::DateTime(d) => write!(f, "datetime({})", d.pattern()),
            FieldType::Memo => f.write_str("memo"),
        }
    }
}

/// Parse a `L`, `L[n]`, `[n]` or `n` width spec where `L` is `letter`.
pub(crate) fn parse_width(spec: &str, letter: char) -> Result<Option<usize>> {
    let rest = spec.strip_prefix(letter).unwrap_or(spec).trim();
    if rest.is_empty() {
        return Ok(None);
    }
    let digits = rest
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .unwrap_or(rest);
    match digits.trim().parse::<usize>() {
        Ok(0) => Err(FlatError::schema("field format", format!("zero width in {spec:?}")).into()),
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(FlatError::schema("field format", format!("malformed width in {spec:?}")).into()),
    }
}

pub(crate) fn conversion_error(ty: &str, message: impl Into<String>) -> anyhow::Error {
    FlatError::conversion(format!("{ty} field"), message).into()
}

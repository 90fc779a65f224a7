//! Whole numbers; the fixed form is zero-padded on the left.

use super::{Value, conversion_error, parse_width};
use anyhow::Result;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerFormat {
    /// Declared width in characters, sign included.
    pub width: Option<usize>,
}

impl IntegerFormat {
    pub fn variable() -> Self {
        Self { width: None }
    }

    pub fn fixed(width: usize) -> Self {
        Self { width: Some(width) }
    }

    pub(crate) fn parse_spec(spec: &str) -> Result<Self> {
        Ok(Self {
            width: parse_width(spec, '9')?,
        })
    }

    pub fn parse(&self, raw: &str) -> Result<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }
        if let Some(n) = self.width
            && trimmed.chars().count() > n
        {
            return Err(conversion_error(
                "integer",
                format!("{raw:?} is wider than {n} characters"),
            ));
        }
        let digits = trimmed.strip_prefix(['-', '+']).unwrap_or(trimmed);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(conversion_error("integer", format!("{raw:?} is not an integer")));
        }
        trimmed
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| conversion_error("integer", format!("{raw:?}: {e}")))
    }

    pub fn format(&self, value: &Value) -> Result<String> {
        let n = match self.coerce(value.clone())? {
            Value::Null => {
                return Ok(" ".repeat(self.width.unwrap_or(0)));
            }
            Value::Integer(n) => n,
            other => {
                return Err(conversion_error("integer", format!("cannot format {} value", other.variant())));
            }
        };
        let digits = n.unsigned_abs().to_string();
        let sign = if n < 0 { "-" } else { "" };
        match self.width {
            None => Ok(format!("{sign}{digits}")),
            Some(w) => {
                let room = w - sign.len();
                if digits.len() > room {
                    return Err(conversion_error(
                        "integer",
                        format!("{n} overflows a width of {w}"),
                    ));
                }
                Ok(format!("{sign}{digits:0>room$}"))
            }
        }
    }

    pub(crate) fn coerce(&self, value: Value) -> Result<Value> {
        match value {
            Value::Null | Value::Integer(_) => Ok(value),
            Value::Decimal(d) => {
                if !d.fract().is_zero() {
                    return Err(conversion_error("integer", format!("{d} has a fractional part")));
                }
                i64::try_from(d.trunc())
                    .map(Value::Integer)
                    .map_err(|_| conversion_error("integer", format!("{d} is out of range")))
            }
            Value::Text(s) => IntegerFormat::variable().parse(&s),
            other => Err(conversion_error(
                "integer",
                format!("cannot convert a {} value", other.variant()),
            )),
        }
    }
}

impl fmt::Display for IntegerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.width {
            Some(n) => write!(f, "9[{n}]"),
            None => f.write_str("9"),
        }
    }
}

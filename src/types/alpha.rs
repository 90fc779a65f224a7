//! Alphanumeric text, variable or fixed length.

use super::{Value, conversion_error, parse_width};
use anyhow::Result;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaFormat {
    /// Declared length in characters; `None` takes the whole field.
    pub length: Option<usize>,
}

impl AlphaFormat {
    pub fn variable() -> Self {
        Self { length: None }
    }

    pub fn fixed(length: usize) -> Self {
        Self {
            length: Some(length),
        }
    }

    pub(crate) fn parse_spec(spec: &str) -> Result<Self> {
        Ok(Self {
            length: parse_width(spec, 'X')?,
        })
    }

    /// Input shorter than the declared length is accepted; a fixed field loses
    /// its trailing padding.
    pub fn parse(&self, raw: &str) -> Result<Value> {
        match self.length {
            None => Ok(Value::Text(raw.to_string())),
            Some(n) => {
                let len = raw.chars().count();
                if len > n {
                    return Err(conversion_error(
                        "alpha",
                        format!("{raw:?} is {len} characters, declared length is {n}"),
                    ));
                }
                Ok(Value::Text(raw.trim_end_matches(' ').to_string()))
            }
        }
    }

    /// Right-pads with spaces to the declared length.
    pub fn format(&self, value: &Value) -> Result<String> {
        let text = match value {
            Value::Null => String::new(),
            other => other.to_string(),
        };
        match self.length {
            None => Ok(text),
            Some(n) => {
                let len = text.chars().count();
                if len > n {
                    return Err(conversion_error(
                        "alpha",
                        format!("{text:?} is {len} characters, declared length is {n}"),
                    ));
                }
                let mut out = text;
                out.extend(std::iter::repeat_n(' ', n - len));
                Ok(out)
            }
        }
    }
}

impl fmt::Display for AlphaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.length {
            Some(n) => write!(f, "X[{n}]"),
            None => f.write_str("X"),
        }
    }
}

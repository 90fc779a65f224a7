//! Decimal numbers.
//!
//! A decimal format combines an integer part (`9`, optionally with a width
//! `9[i]`), an optional separator character, and a fraction part (`0`, optionally
//! with a width `0[f]`):
//!
//! - `9.0`, `9,0`: explicit separator, free widths;
//! - `9[5].0[2]`: separator, integer part zero-padded to 5, fraction to 2;
//! - `9[3]0[2]`: no separator, the digit boundary sits after 3 characters;
//! - `90[2]`: no separator, the last 2 digits are the fraction;
//! - `9[5]`: no separator, fraction is whatever follows the 5th character.
//!
//! When parsing, the separator (if any) decides where the fraction starts, then
//! the integer width, then the fraction width. Formatting truncates excess
//! fraction digits toward zero, never rounding.

use super::{Value, conversion_error};
use crate::error::FlatError;
use anyhow::Result;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalFormat {
    /// Integer part width, sign included.
    pub int_width: Option<usize>,
    pub separator: Option<char>,
    pub frac_width: Option<usize>,
}

impl DecimalFormat {
    pub fn with_separator(separator: char) -> Self {
        Self {
            int_width: None,
            separator: Some(separator),
            frac_width: None,
        }
    }

    pub fn fixed_digits(int_width: usize, frac_width: usize) -> Self {
        Self {
            int_width: Some(int_width),
            separator: None,
            frac_width: Some(frac_width),
        }
    }

    pub(crate) fn parse_spec(spec: &str) -> Result<Self> {
        if spec.is_empty() {
            return Ok(Self::with_separator('.'));
        }
        let bad = |why: &str| -> anyhow::Error {
            FlatError::schema("decimal format", format!("{spec:?}: {why}")).into()
        };
        let chars: Vec<char> = spec.chars().collect();
        let mut pos = 0;

        let take_width = |pos: &mut usize| -> Result<Option<usize>> {
            if chars.get(*pos) != Some(&'[') {
                return Ok(None);
            }
            let close = chars[*pos..]
                .iter()
                .position(|c| *c == ']')
                .map(|p| p + *pos)
                .ok_or_else(|| bad("unclosed '['"))?;
            let digits: String = chars[*pos + 1..close].iter().collect();
            let n = digits
                .trim()
                .parse::<usize>()
                .map_err(|_| bad("malformed width"))?;
            if n == 0 {
                return Err(bad("zero width"));
            }
            *pos = close + 1;
            Ok(Some(n))
        };

        if chars.first() != Some(&'9') {
            return Err(bad("must start with '9'"));
        }
        pos += 1;
        let int_width = take_width(&mut pos)?;

        let mut separator = None;
        let mut frac_width = None;
        match chars.get(pos) {
            None => {}
            Some('0') => {
                pos += 1;
                frac_width = take_width(&mut pos)?;
            }
            Some(c) if !c.is_ascii_digit() && *c != '[' && *c != ']' => {
                separator = Some(*c);
                pos += 1;
                if chars.get(pos) != Some(&'0') {
                    return Err(bad("separator must be followed by '0'"));
                }
                pos += 1;
                frac_width = take_width(&mut pos)?;
            }
            Some(_) => return Err(bad("unexpected character after the integer part")),
        }
        if pos != chars.len() {
            return Err(bad("trailing characters"));
        }
        if separator.is_none() && int_width.is_none() && frac_width.is_none() {
            return Err(bad("without a separator, an integer or fraction width is required"));
        }
        Ok(Self {
            int_width,
            separator,
            frac_width,
        })
    }

    pub fn fixed_len(&self) -> Option<usize> {
        match (self.int_width, self.frac_width) {
            (Some(i), Some(f)) => Some(i + f + usize::from(self.separator.is_some())),
            _ => None,
        }
    }

    pub fn parse(&self, raw: &str) -> Result<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }
        let chars: Vec<char> = trimmed.chars().collect();
        let (int_part, frac_part): (String, String) = if let Some(sep) = self.separator {
            match chars.iter().position(|c| *c == sep) {
                Some(p) => (chars[..p].iter().collect(), chars[p + 1..].iter().collect()),
                None => (trimmed.to_string(), String::new()),
            }
        } else if let Some(w) = self.int_width {
            let split = w.min(chars.len());
            (chars[..split].iter().collect(), chars[split..].iter().collect())
        } else {
            // frac_width is set, checked at construction
            let f = self.frac_width.unwrap_or(0);
            let split = chars.len().saturating_sub(f);
            (chars[..split].iter().collect(), chars[split..].iter().collect())
        };

        let (negative, int_digits) = match int_part.strip_prefix('-') {
            Some(rest) => (true, rest.to_string()),
            None => (false, int_part.strip_prefix('+').unwrap_or(&int_part).to_string()),
        };
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(&int_digits) || !all_digits(&frac_part) || (int_digits.is_empty() && frac_part.is_empty()) {
            return Err(conversion_error("decimal", format!("{raw:?} is not a decimal")));
        }
        let sign = if negative { "-" } else { "" };
        let int_digits = if int_digits.is_empty() { "0" } else { &int_digits };
        let literal = if frac_part.is_empty() {
            format!("{sign}{int_digits}")
        } else {
            format!("{sign}{int_digits}.{frac_part}")
        };
        Decimal::from_str(&literal)
            .map(Value::Decimal)
            .map_err(|e| conversion_error("decimal", format!("{raw:?}: {e}")))
    }

    pub fn format(&self, value: &Value) -> Result<String> {
        let d = match self.coerce(value.clone())? {
            Value::Null => return Ok(" ".repeat(self.fixed_len().unwrap_or(0))),
            Value::Decimal(d) => d,
            other => {
                return Err(conversion_error("decimal", format!("cannot format {} value", other.variant())));
            }
        };
        let negative = d.is_sign_negative() && !d.is_zero();
        let mut abs = d.abs();
        if let Some(f) = self.frac_width {
            abs = abs.round_dp_with_strategy(f as u32, RoundingStrategy::ToZero);
            abs.rescale(f as u32);
        }
        let text = abs.to_string();
        let (int_digits, frac_digits) = match text.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (text, String::new()),
        };

        let sign = if negative { "-" } else { "" };
        let int_text = match self.int_width {
            Some(w) => {
                let room = w.saturating_sub(sign.len());
                if int_digits.len() > room {
                    return Err(conversion_error(
                        "decimal",
                        format!("integer part of {d} does not fit in {w} characters"),
                    ));
                }
                format!("{sign}{int_digits:0>room$}")
            }
            None => format!("{sign}{int_digits}"),
        };

        Ok(match self.separator {
            Some(sep) if !frac_digits.is_empty() || self.frac_width.is_some() => {
                format!("{int_text}{sep}{frac_digits}")
            }
            Some(_) => int_text,
            None => format!("{int_text}{frac_digits}"),
        })
    }

    pub(crate) fn coerce(&self, value: Value) -> Result<Value> {
        match value {
            Value::Null | Value::Decimal(_) => Ok(value),
            Value::Integer(n) => Ok(Value::Decimal(Decimal::from(n))),
            Value::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return Ok(Value::Null);
                }
                Decimal::from_str(t)
                    .map(Value::Decimal)
                    .map_err(|e| conversion_error("decimal", format!("{s:?}: {e}")))
            }
            other => Err(conversion_error(
                "decimal",
                format!("cannot convert a {} value", other.variant()),
            )),
        }
    }
}

impl fmt::Display for DecimalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("9")?;
        if let Some(i) = self.int_width {
            write!(f, "[{i}]")?;
        }
        if let Some(sep) = self.separator {
            write!(f, "{sep}")?;
        }
        f.write_str("0")?;
        if let Some(w) = self.frac_width {
            write!(f, "[{w}]")?;
        }
        Ok(())
    }
}

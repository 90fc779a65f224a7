//! Dates, times and timestamps in positional patterns.
//!
//! A pattern is a sequence of tokens and literal characters. Tokens are
//! `DD` (day), `MM` (month), `YYYY` or `YY` (year), `hh` (hour), `mm` (minute)
//! and `ss` (second); anything else is a literal separator that must appear at
//! the same position in the data. `DD/MM/YYYY hh:mm` reads `31/12/2024 23:59`.
//!
//! Rules enforced when a pattern is built:
//! - day, month and year appear together or not at all;
//! - minute requires hour, second requires minute;
//! - the date tokens and the time tokens each form one contiguous run.
//!
//! Two-digit years pivot like `strptime`'s `%y`: `69..=99` is 19xx, `00..=68`
//! is 20xx.

use super::{Value, conversion_error};
use crate::error::FlatError;
use anyhow::Result;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Unit {
    Day,
    Month,
    Year4,
    Year2,
    Hour,
    Minute,
    Second,
}

impl Unit {
    fn width(self) -> usize {
        match self {
            Unit::Year4 => 4,
            _ => 2,
        }
    }

    fn is_date(self) -> bool {
        matches!(self, Unit::Day | Unit::Month | Unit::Year4 | Unit::Year2)
    }

    fn same_slot(self, other: Unit) -> bool {
        self == other || matches!((self, other), (Unit::Year4, Unit::Year2) | (Unit::Year2, Unit::Year4))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Token(Unit),
    Literal(char),
}

/// What a pattern produces when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeKind {
    Date,
    Time,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeFormat {
    pattern: String,
    pieces: Vec<Piece>,
    kind: DateTimeKind,
}

const TOKENS: [(&str, Unit); 7] = [
    ("YYYY", Unit::Year4),
    ("YY", Unit::Year2),
    ("DD", Unit::Day),
    ("MM", Unit::Month),
    ("hh", Unit::Hour),
    ("mm", Unit::Minute),
    ("ss", Unit::Second),
];

impl DateTimeFormat {
    /// # Errors
    /// Patterns breaking the token rules are schema errors.
    pub fn parse_spec(pattern: &str) -> Result<Self> {
        let bad = |why: String| -> anyhow::Error {
            FlatError::schema("datetime format", format!("{pattern:?}: {why}")).into()
        };

        let mut pieces = Vec::new();
        let mut rest = pattern;
        'outer: while !rest.is_empty() {
            for (text, unit) in TOKENS {
                if let Some(after) = rest.strip_prefix(text) {
                    pieces.push(Piece::Token(unit));
                    rest = after;
                    continue 'outer;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                pieces.push(Piece::Literal(c));
            }
            rest = chars.as_str();
        }

        let units: Vec<Unit> = pieces
            .iter()
            .filter_map(|p| match p {
                Piece::Token(u) => Some(*u),
                Piece::Literal(_) => None,
            })
            .collect();
        if units.is_empty() {
            return Err(bad("no date or time token".into()));
        }
        for (i, u) in units.iter().enumerate() {
            if units[..i].iter().any(|prev| prev.same_slot(*u)) {
                return Err(bad(format!("token {u:?} appears twice")));
            }
        }
        let has = |u: Unit| units.iter().any(|x| x.same_slot(u));

        let date_tokens = [has(Unit::Day), has(Unit::Month), has(Unit::Year4)];
        let has_date = date_tokens.iter().any(|b| *b);
        if has_date && !date_tokens.iter().all(|b| *b) {
            return Err(bad("day, month and year must all be present or all absent".into()));
        }
        if has(Unit::Minute) && !has(Unit::Hour) {
            return Err(bad("minutes require hours".into()));
        }
        if has(Unit::Second) && !has(Unit::Minute) {
            return Err(bad("seconds require minutes".into()));
        }
        let switches = units
            .windows(2)
            .filter(|w| w[0].is_date() != w[1].is_date())
            .count();
        if switches > 1 {
            return Err(bad("date and time tokens are interleaved".into()));
        }

        let kind = match (has_date, has(Unit::Hour)) {
            (true, true) => DateTimeKind::Timestamp,
            (true, false) => DateTimeKind::Date,
            _ => DateTimeKind::Time,
        };
        Ok(Self {
            pattern: pattern.to_string(),
            pieces,
            kind,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn kind(&self) -> DateTimeKind {
        self.kind
    }

    /// Formatted length in characters.
    pub fn len(&self) -> usize {
        self.pieces
            .iter()
            .map(|p| match p {
                Piece::Token(u) => u.width(),
                Piece::Literal(_) => 1,
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn parse(&self, raw: &str) -> Result<Value> {
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        let chars: Vec<char> = raw.trim_end().chars().collect();
        if chars.len() != self.len() {
            return Err(conversion_error(
                "datetime",
                format!("{raw:?} does not match pattern {:?}", self.pattern),
            ));
        }

        let (mut day, mut month, mut year) = (1u32, 1u32, 1970i32);
        let (mut hour, mut minute, mut second) = (0u32, 0u32, 0u32);
        let mut pos = 0;
        for piece in &self.pieces {
            match piece {
                Piece::Literal(c) => {
                    if chars[pos] != *c {
                        return Err(conversion_error(
                            "datetime",
                            format!("{raw:?}: expected {c:?} at position {pos}"),
                        ));
                    }
                    pos += 1;
                }
                Piece::Token(unit) => {
                    let w = unit.width();
                    let digits: String = chars[pos..pos + w].iter().collect();
                    let n: u32 = if digits.bytes().all(|b| b.is_ascii_digit()) {
                        digits.parse().unwrap_or_default()
                    } else {
                        return Err(conversion_error(
                            "datetime",
                            format!("{raw:?}: {digits:?} is not a number"),
                        ));
                    };
                    match unit {
                        Unit::Day => day = n,
                        Unit::Month => month = n,
                        Unit::Year4 => year = n as i32,
                        Unit::Year2 => year = if n >= 69 { 1900 + n as i32 } else { 2000 + n as i32 },
                        Unit::Hour => hour = n,
                        Unit::Minute => minute = n,
                        Unit::Second => second = n,
                    }
                    pos += w;
                }
            }
        }

        let date = || {
            NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| conversion_error("datetime", format!("{raw:?} is not a valid date")))
        };
        let time = || {
            NaiveTime::from_hms_opt(hour, minute, second)
                .ok_or_else(|| conversion_error("datetime", format!("{raw:?} is not a valid time")))
        };
        Ok(match self.kind {
            DateTimeKind::Date => Value::Date(date()?),
            DateTimeKind::Time => Value::Time(time()?),
            DateTimeKind::Timestamp => Value::Timestamp(NaiveDateTime::new(date()?, time()?)),
        })
    }

    pub fn format(&self, value: &Value) -> Result<String> {
        let (date, time) = match self.coerce(value.clone())? {
            Value::Null => return Ok(" ".repeat(self.len())),
            Value::Date(d) => (Some(d), None),
            Value::Time(t) => (None, Some(t)),
            Value::Timestamp(ts) => (Some(ts.date()), Some(ts.time())),
            other => {
                return Err(conversion_error(
                    "datetime",
                    format!("cannot format {} value", other.variant()),
                ));
            }
        };

        let mut out = String::with_capacity(self.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(c) => out.push(*c),
                Piece::Token(unit) => {
                    let n: i64 = match (unit, date, time) {
                        (Unit::Day, Some(d), _) => d.day().into(),
                        (Unit::Month, Some(d), _) => d.month().into(),
                        (Unit::Year4, Some(d), _) => d.year().into(),
                        (Unit::Year2, Some(d), _) => d.year().rem_euclid(100).into(),
                        (Unit::Hour, _, Some(t)) => t.hour().into(),
                        (Unit::Minute, _, Some(t)) => t.minute().into(),
                        (Unit::Second, _, Some(t)) => t.second().into(),
                        _ => 0,
                    };
                    if !(0..10i64.pow(unit.width() as u32)).contains(&n) {
                        return Err(conversion_error(
                            "datetime",
                            format!("{value} does not fit pattern {:?}", self.pattern),
                        ));
                    }
                    out.push_str(&format!("{n:0w$}", w = unit.width()));
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn coerce(&self, value: Value) -> Result<Value> {
        let converted = match (self.kind, value) {
            (_, Value::Null) => Value::Null,
            (_, Value::Text(s)) => return self.parse(&s),
            (DateTimeKind::Date, Value::Date(d)) => Value::Date(d),
            (DateTimeKind::Date, Value::Timestamp(ts)) => Value::Date(ts.date()),
            (DateTimeKind::Time, Value::Time(t)) => Value::Time(t),
            (DateTimeKind::Time, Value::Timestamp(ts)) => Value::Time(ts.time()),
            (DateTimeKind::Timestamp, Value::Timestamp(ts)) => Value::Timestamp(ts),
            (DateTimeKind::Timestamp, Value::Date(d)) => Value::Timestamp(d.and_time(NaiveTime::default())),
            (kind, other) => {
                return Err(conversion_error(
                    "datetime",
                    format!("cannot convert a {} value to {kind:?}", other.variant()),
                ));
            }
        };
        Ok(converted)
    }
}

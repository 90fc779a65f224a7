//! Integration tests for field codecs.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use flatbridge::error::{ErrorKind, error_kind};
use flatbridge::types::{DateTimeKind, FieldType, Value};
use rust_decimal::Decimal;
use std::str::FromStr;

fn dec(s: &str) -> Value {
    Value::Decimal(Decimal::from_str(s).unwrap())
}

fn assert_conversion_error(result: anyhow::Result<impl std::fmt::Debug>) {
    let err = result.unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Conversion), "{err:#}");
}

#[test]
fn test_alpha_padding_and_overflow() -> anyhow::Result<()> {
    let ty = FieldType::from_spec("alpha", "X[10]")?;
    assert_eq!(ty.format(&Value::text("AB"))?, "AB        ");
    assert_eq!(ty.fixed_len(), Some(10));
    assert_eq!(ty.parse("AB        ")?, Value::text("AB"));
    assert_eq!(ty.parse("AB")?, Value::text("AB"));
    assert_conversion_error(ty.format(&Value::text("ABCDEFGHIJK")));

    let free = FieldType::alpha();
    assert_eq!(free.format(&Value::text("anything at all"))?, "anything at all");
    assert_eq!(free.fixed_len(), None);
    Ok(())
}

#[test]
fn test_integer_width() -> anyhow::Result<()> {
    let ty = FieldType::from_spec("integer", "9[5]")?;
    assert_eq!(ty.format(&Value::Integer(42))?, "00042");
    assert_eq!(ty.format(&Value::Integer(-42))?, "-0042");
    assert_eq!(ty.parse("00042")?, Value::Integer(42));
    assert_eq!(ty.parse("     ")?, Value::Null);
    assert_conversion_error(ty.format(&Value::Integer(123_456)));
    assert_conversion_error(ty.parse("12a45"));
    assert_conversion_error(ty.parse("1234567"));
    Ok(())
}

#[test]
fn test_decimal_without_separator() -> anyhow::Result<()> {
    let ty = FieldType::from_spec("decimal", "9[3]0[2]")?;
    assert_eq!(ty.fixed_len(), Some(5));
    assert_eq!(ty.format(&dec("7.5"))?, "00750");
    assert_eq!(ty.parse("00750")?, dec("7.50"));
    assert_conversion_error(ty.format(&dec("1234.5")));
    Ok(())
}

#[test]
fn test_decimal_truncates_toward_zero() -> anyhow::Result<()> {
    let ty = FieldType::from_spec("decimal", "9.0[2]")?;
    assert_eq!(ty.format(&dec("1.239"))?, "1.23");
    assert_eq!(ty.format(&dec("-1.239"))?, "-1.23");
    assert_eq!(ty.parse("12.5")?, dec("12.5"));

    let comma = FieldType::from_spec("decimal", "9,0")?;
    assert_eq!(comma.parse("3,14")?, dec("3.14"));
    Ok(())
}

#[test]
fn test_decimal_spec_errors_are_schema_errors() {
    for spec in ["0.9", "9[0]0", "9.", "9[2"] {
        let err = FieldType::from_spec("decimal", spec).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "{spec}");
    }
}

#[test]
fn test_datetime_patterns() -> anyhow::Result<()> {
    let date = FieldType::from_spec("datetime", "DD/MM/YYYY")?;
    let d = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    assert_eq!(date.parse("31/12/2024")?, Value::Date(d));
    assert_eq!(date.format(&Value::Date(d))?, "31/12/2024");
    assert_eq!(date.fixed_len(), Some(10));
    assert_conversion_error(date.parse("31/02/2024"));
    assert_conversion_error(date.parse("31-12-2024"));

    let stamp = FieldType::from_spec("datetime", "YYYYMMDDhhmmss")?;
    let ts = NaiveDateTime::new(d, NaiveTime::from_hms_opt(23, 59, 1).unwrap());
    assert_eq!(stamp.parse("20241231235901")?, Value::Timestamp(ts));
    assert_eq!(stamp.format(&Value::Date(d))?, "20241231000000");

    let time = FieldType::from_spec("datetime", "hh:mm")?;
    assert_eq!(time.parse("07:05")?, Value::Time(NaiveTime::from_hms_opt(7, 5, 0).unwrap()));
    assert_conversion_error(time.parse("25:00"));
    Ok(())
}

#[test]
fn test_two_digit_year_pivot() -> anyhow::Result<()> {
    let ty = FieldType::from_spec("date", "DDMMYY")?;
    assert_eq!(ty.parse("010169")?, Value::Date(NaiveDate::from_ymd_opt(1969, 1, 1).unwrap()));
    assert_eq!(ty.parse("010168")?, Value::Date(NaiveDate::from_ymd_opt(2068, 1, 1).unwrap()));
    Ok(())
}

#[test]
fn test_datetime_pattern_rules() {
    for pattern in ["DD/MM", "mm:ss", "hhDDMMYYYYmm", "-"] {
        let err = FieldType::from_spec("datetime", pattern).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Schema), "{pattern}");
    }
    let FieldType::DateTime(f) = FieldType::from_spec("datetime", "YYYY-MM-DD hh:mm").unwrap() else {
        panic!("expected a datetime codec");
    };
    assert_eq!(f.kind(), DateTimeKind::Timestamp);
}

#[test]
fn test_coercion_between_codecs() -> anyhow::Result<()> {
    let int = FieldType::integer();
    assert_eq!(int.coerce(dec("12"))?, Value::Integer(12));
    assert_eq!(int.coerce(Value::text("7"))?, Value::Integer(7));
    assert_conversion_error(int.coerce(dec("1.5")));

    let text = FieldType::alpha();
    assert_eq!(text.coerce(Value::Integer(5))?, Value::text("5"));
    assert_eq!(text.coerce(Value::Null)?, Value::Null);
    Ok(())
}

#[test]
fn test_memo_passes_text_through() -> anyhow::Result<()> {
    let memo = FieldType::from_spec("memo", "")?;
    assert!(memo.is_memo());
    assert_eq!(memo.parse("line one")?, Value::text("line one"));
    assert_eq!(memo.format(&Value::Null)?, "");
    Ok(())
}

#[test]
fn test_unknown_type_name() {
    let err = FieldType::from_spec("blob", "").unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Schema));
}

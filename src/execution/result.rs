//! Result rows - engine values normalized into JSON-safe scalars

use crate::execution::engine::{EngineRow, EngineValue};
use chrono::SecondsFormat;
use serde_json::{Map, Number, Value};

/// Column name -> scalar (string, integer, float, ISO-8601 timestamp string, boolean or null)
pub type ResultRow = Map<String, Value>;

/// Normalize every row, preserving engine order
pub fn normalize_rows(rows: Vec<EngineRow>) -> Vec<ResultRow> {
    rows.into_iter().map(normalize_row).collect()
}

pub fn normalize_row(row: EngineRow) -> ResultRow {
    let mut out = Map::new();
    for (name, value) in row.columns {
        out.insert(name, normalize_value(value));
    }
    out
}

pub fn normalize_value(value: EngineValue) -> Value {
    match value {
        EngineValue::Null => Value::Null,
        EngineValue::Bool(b) => Value::Bool(b),
        EngineValue::Int64(i) => Value::Number(i.into()),
        EngineValue::Float64(f) => float_value(f),
        // Decimals become floats; text that does not parse is kept verbatim
        EngineValue::Numeric(s) => match s.parse::<f64>() {
            Ok(f) => float_value(f),
            Err(_) => Value::String(s),
        },
        EngineValue::Timestamp(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        EngineValue::Text(s) => Value::String(s),
    }
}

/// JSON has no NaN or infinity
fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_numeric_becomes_float() {
        let v = normalize_value(EngineValue::Numeric("1234.567890".to_string()));
        assert_eq!(v, serde_json::json!(1234.56789));
        assert!(v.is_f64());
    }

    #[test]
    fn test_timestamp_becomes_iso_string() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let v = normalize_value(EngineValue::Timestamp(ts));
        assert_eq!(v, Value::String("2024-03-01T12:30:00+00:00".to_string()));

        let with_micros = ts + chrono::Duration::microseconds(250);
        let v = normalize_value(EngineValue::Timestamp(with_micros));
        assert_eq!(v, Value::String("2024-03-01T12:30:00.000250+00:00".to_string()));
    }

    #[test]
    fn test_non_finite_floats_become_null() {
        assert_eq!(normalize_value(EngineValue::Float64(f64::NAN)), Value::Null);
        assert_eq!(normalize_value(EngineValue::Float64(f64::INFINITY)), Value::Null);
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(normalize_value(EngineValue::Int64(-7)), serde_json::json!(-7));
        assert_eq!(normalize_value(EngineValue::Bool(false)), Value::Bool(false));
        assert_eq!(normalize_value(EngineValue::Null), Value::Null);
        assert_eq!(
            normalize_value(EngineValue::Text("0xabc".to_string())),
            Value::String("0xabc".to_string())
        );
    }

    #[test]
    fn test_normalize_rows_keeps_order() {
        let rows = vec![
            EngineRow::new().with("n", EngineValue::Int64(2)),
            EngineRow::new().with("n", EngineValue::Int64(1)),
        ];
        let out = normalize_rows(rows);
        assert_eq!(out[0]["n"], serde_json::json!(2));
        assert_eq!(out[1]["n"], serde_json::json!(1));
    }
}

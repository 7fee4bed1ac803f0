use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use ordered_float::OrderedFloat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// A single cell value in engine-independent form. Connectors decode native
/// wire values into this enum; the migrator's row transforms and the
/// validator's hashing both operate on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(OrderedFloat<f64>),
    Decimal(Decimal),
    Text(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<FixedOffset>),
    Json(serde_json::Value),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Binary(_) => "binary",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::DateTimeTz(_) => "datetimetz",
            Value::Json(_) => "json",
            Value::Uuid(_) => "uuid",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(v.0),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Deterministic byte encoding used by `sample_hash`. Both sides of a
    /// migration encode through this function, so equal logical values hash
    /// equal regardless of engine.
    ///
    /// Timestamps with zone are normalized to UTC, floats to their shortest
    /// round-trip form, JSON to its sorted-key compact form.
    pub fn encode_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.extend_from_slice(b"\0N"),
            Value::Bool(b) => out.extend_from_slice(if *b { b"1" } else { b"0" }),
            Value::Int(v) => out.extend_from_slice(v.to_string().as_bytes()),
            Value::UInt(v) => out.extend_from_slice(v.to_string().as_bytes()),
            Value::Float(v) => out.extend_from_slice(format!("{}", v.0).as_bytes()),
            Value::Decimal(v) => out.extend_from_slice(v.normalize().to_string().as_bytes()),
            Value::Text(s) => out.extend_from_slice(s.as_bytes()),
            Value::Binary(b) => out.extend_from_slice(b),
            Value::Date(d) => out.extend_from_slice(d.format("%Y-%m-%d").to_string().as_bytes()),
            Value::Time(t) => out.extend_from_slice(t.format("%H:%M:%S%.f").to_string().as_bytes()),
            Value::DateTime(dt) => {
                out.extend_from_slice(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string().as_bytes())
            }
            Value::DateTimeTz(dt) => out.extend_from_slice(
                dt.naive_utc()
                    .format("%Y-%m-%d %H:%M:%S%.f")
                    .to_string()
                    .as_bytes(),
            ),
            Value::Json(v) => {
                // serde_json maps are sorted, so this is already canonical.
                out.extend_from_slice(v.to_string().as_bytes())
            }
            Value::Uuid(u) => out.extend_from_slice(u.hyphenated().to_string().as_bytes()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{}", v.0),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Binary(b) => write!(f, "0x{}", hex_lower(b)),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::DateTimeTz(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Json(v) => write!(f, "{v}"),
            Value::Uuid(u) => write!(f, "{}", u.hyphenated()),
        }
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encoded(value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        value.encode_canonical(&mut out);
        out
    }

    #[test]
    fn tz_values_encode_as_utc() {
        let offset = FixedOffset::east_opt(5 * 3600).unwrap();
        let with_zone = Value::DateTimeTz(
            offset
                .with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
                .single()
                .unwrap(),
        );
        let utc_naive = Value::DateTime(
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(5, 0, 0)
                .unwrap(),
        );
        assert_eq!(encoded(&with_zone), encoded(&utc_naive));
    }

    #[test]
    fn decimal_trailing_zeros_normalize() {
        let a = Value::Decimal("1.50".parse().unwrap());
        let b = Value::Decimal("1.5".parse().unwrap());
        assert_eq!(encoded(&a), encoded(&b));
    }

    #[test]
    fn null_encoding_is_distinct_from_empty_text() {
        assert_ne!(encoded(&Value::Null), encoded(&Value::Text(String::new())));
    }

    #[test]
    fn serde_round_trip() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(-7),
            Value::Text("héllo".into()),
            Value::Binary(vec![0, 1, 255]),
            Value::Uuid(Uuid::nil()),
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value, back);
        }
    }
}

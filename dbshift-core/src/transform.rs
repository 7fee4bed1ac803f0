use dbshift_types::canonical::{CanonicalKind, CanonicalType};
use dbshift_types::thiserror::{self, Error};
use dbshift_types::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("cannot transform {value_type} value as {source_kind}→{target}")]
    IncompatibleValue {
        value_type: &'static str,
        source_kind: CanonicalKind,
        target: CanonicalKind,
    },
}

/// A pure per-cell transform. NULL never reaches these functions.
pub type RowTransform = fn(Value) -> Result<Value, TransformError>;

fn identity(value: Value) -> Result<Value, TransformError> {
    Ok(value)
}

/// `BOOL → TINYINT(1)`: true↦1, false↦0.
fn bool_to_tinyint(value: Value) -> Result<Value, TransformError> {
    match value {
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        other => incompatible(other, CanonicalKind::Bool, CanonicalKind::Bool),
    }
}

/// `UUID → CHAR(36)`: lowercase, hyphenated.
fn uuid_to_char36(value: Value) -> Result<Value, TransformError> {
    match value {
        Value::Uuid(u) => Ok(Value::Text(u.hyphenated().to_string())),
        Value::Text(s) => Ok(Value::Text(s.to_lowercase())),
        other => incompatible(other, CanonicalKind::Uuid, CanonicalKind::Uuid),
    }
}

/// `JSON/JSONB → JSON`: canonical re-serialization happens at encode time
/// (sorted keys); the value itself passes through.
fn json_canonicalize(value: Value) -> Result<Value, TransformError> {
    match value {
        Value::Json(v) => Ok(Value::Json(v)),
        Value::Text(s) => Ok(Value::Text(s)),
        other => incompatible(other, CanonicalKind::Json, CanonicalKind::Json),
    }
}

/// `DATETIMETZ → DATETIME`: convert to UTC, drop the zone.
fn tz_to_utc_naive(value: Value) -> Result<Value, TransformError> {
    match value {
        Value::DateTimeTz(dt) => Ok(Value::DateTime(dt.naive_utc())),
        Value::DateTime(dt) => Ok(Value::DateTime(dt)),
        other => incompatible(other, CanonicalKind::Datetimetz, CanonicalKind::Datetime),
    }
}

/// Fallback for `UNKNOWN → LONGTEXT`: any value flattens to its display
/// form.
fn to_display_text(value: Value) -> Result<Value, TransformError> {
    match value {
        Value::Text(s) => Ok(Value::Text(s)),
        other => Ok(Value::Text(other.to_string())),
    }
}

fn incompatible(
    value: Value,
    source: CanonicalKind,
    target: CanonicalKind,
) -> Result<Value, TransformError> {
    Err(TransformError::IncompatibleValue {
        value_type: value.type_name(),
        source_kind: source,
        target,
    })
}

/// Static dispatch table keyed by (source canonical, target canonical).
/// Entries not present here are mapping-validation errors, so a missing
/// transform can never surface at row-load time.
const TRANSFORMS: &[((CanonicalKind, CanonicalKind), RowTransform)] = &[
    ((CanonicalKind::Bool, CanonicalKind::Bool), bool_to_tinyint),
    ((CanonicalKind::Bool, CanonicalKind::Int1), bool_to_tinyint),
    ((CanonicalKind::Uuid, CanonicalKind::Uuid), uuid_to_char36),
    ((CanonicalKind::Uuid, CanonicalKind::Text), uuid_to_char36),
    ((CanonicalKind::Json, CanonicalKind::Json), json_canonicalize),
    ((CanonicalKind::Json, CanonicalKind::Clob), json_canonicalize),
    ((CanonicalKind::Datetimetz, CanonicalKind::Datetime), tz_to_utc_naive),
    ((CanonicalKind::Datetimetz, CanonicalKind::Datetimetz), identity),
    ((CanonicalKind::Enum, CanonicalKind::Enum), identity),
    ((CanonicalKind::Enum, CanonicalKind::Text), identity),
    ((CanonicalKind::Enum, CanonicalKind::Clob), identity),
    ((CanonicalKind::Unknown, CanonicalKind::Clob), to_display_text),
    ((CanonicalKind::Unknown, CanonicalKind::Text), to_display_text),
];

/// Same-kind identity pairs: widths and parameters may differ, values do
/// not.
const IDENTITY_KINDS: &[CanonicalKind] = &[
    CanonicalKind::Int1,
    CanonicalKind::Int2,
    CanonicalKind::Int4,
    CanonicalKind::Int8,
    CanonicalKind::Float4,
    CanonicalKind::Float8,
    CanonicalKind::Decimal,
    CanonicalKind::Text,
    CanonicalKind::Ntext,
    CanonicalKind::Clob,
    CanonicalKind::Blob,
    CanonicalKind::BinaryFixed,
    CanonicalKind::Date,
    CanonicalKind::Time,
    CanonicalKind::Datetime,
];

/// Integer widenings the proposer may choose.
const WIDENINGS: &[(CanonicalKind, CanonicalKind)] = &[
    (CanonicalKind::Int1, CanonicalKind::Int2),
    (CanonicalKind::Int1, CanonicalKind::Int4),
    (CanonicalKind::Int1, CanonicalKind::Int8),
    (CanonicalKind::Int2, CanonicalKind::Int4),
    (CanonicalKind::Int2, CanonicalKind::Int8),
    (CanonicalKind::Int4, CanonicalKind::Int8),
    (CanonicalKind::Float4, CanonicalKind::Float8),
    (CanonicalKind::Text, CanonicalKind::Clob),
    (CanonicalKind::Ntext, CanonicalKind::Text),
    (CanonicalKind::Ntext, CanonicalKind::Clob),
    (CanonicalKind::BinaryFixed, CanonicalKind::Blob),
];

/// Look up the transform for a (source, target) canonical pair.
pub fn transform_for(source: &CanonicalType, target: &CanonicalType) -> Option<RowTransform> {
    let key = (source.kind(), target.kind());
    if let Some((_, transform)) = TRANSFORMS.iter().find(|(k, _)| *k == key) {
        return Some(*transform);
    }
    if key.0 == key.1 && IDENTITY_KINDS.contains(&key.0) {
        return Some(identity);
    }
    if WIDENINGS.contains(&key) {
        return Some(identity);
    }
    None
}

/// Apply a transform to one cell. NULL is preserved unchanged.
pub fn apply(transform: RowTransform, value: Value) -> Result<Value, TransformError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    transform(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbshift_types::chrono::{FixedOffset, TimeZone};
    use dbshift_types::uuid::Uuid;

    #[test]
    fn bool_maps_to_zero_one() {
        let t = transform_for(&CanonicalType::Bool, &CanonicalType::Bool).unwrap();
        assert_eq!(apply(t, Value::Bool(true)).unwrap(), Value::Int(1));
        assert_eq!(apply(t, Value::Bool(false)).unwrap(), Value::Int(0));
    }

    #[test]
    fn tz_converts_to_utc_and_drops_zone() {
        let t = transform_for(&CanonicalType::Datetimetz, &CanonicalType::Datetime).unwrap();
        let plus_five = FixedOffset::east_opt(5 * 3600).unwrap();
        let input = Value::DateTimeTz(
            plus_five
                .with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
                .single()
                .unwrap(),
        );
        let out = apply(t, input).unwrap();
        assert_eq!(out.to_string(), "2024-01-01 05:00:00");
    }

    #[test]
    fn uuid_lowercase_hyphenated() {
        let t = transform_for(&CanonicalType::Uuid, &CanonicalType::Uuid).unwrap();
        let uuid = Uuid::parse_str("A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11").unwrap();
        let out = apply(t, Value::Uuid(uuid)).unwrap();
        assert_eq!(
            out,
            Value::Text("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11".into())
        );
    }

    #[test]
    fn null_passes_through_every_transform() {
        let t = transform_for(&CanonicalType::Bool, &CanonicalType::Bool).unwrap();
        assert_eq!(apply(t, Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn missing_pairs_have_no_transform() {
        assert!(transform_for(&CanonicalType::Blob, &CanonicalType::Int4).is_none());
        assert!(transform_for(&CanonicalType::Date, &CanonicalType::Json).is_none());
    }

    #[test]
    fn decimal_identity_ignores_parameters() {
        assert!(transform_for(&CanonicalType::decimal(18, 4), &CanonicalType::decimal(20, 4))
            .is_some());
    }
}

use dbshift_types::canonical::{CanonicalType, TypeLoss};
use dbshift_types::errors::TypeError;
use regex::Regex;
use std::sync::OnceLock;

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([a-zA-Z_][a-zA-Z_ ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*$")
            .expect("postgres type pattern")
    })
}

/// Parse a postgres native type string into its canonical form.
///
/// Unknown types map to `UNKNOWN` with an `unsupported` loss annotation
/// rather than failing, so extraction always completes.
pub fn to_canonical(raw: &str) -> (CanonicalType, Option<TypeLoss>) {
    let Some(caps) = type_pattern().captures(raw) else {
        return (CanonicalType::Unknown, Some(TypeLoss::Unsupported));
    };
    let base = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let p1: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let p2: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());

    match base.trim() {
        "smallint" | "int2" | "smallserial" => (CanonicalType::Int2, None),
        "integer" | "int" | "int4" | "serial" => (CanonicalType::Int4, None),
        "bigint" | "int8" | "bigserial" => (CanonicalType::Int8, None),
        "real" | "float4" => (CanonicalType::Float4, None),
        "double precision" | "float8" => (CanonicalType::Float8, None),
        "numeric" | "decimal" => {
            // Unconstrained numeric has no declared precision; widest MySQL
            // DECIMAL is 65 digits, so record the narrowing.
            match p1 {
                Some(precision) => (
                    CanonicalType::decimal(precision.min(65) as u8, p2.unwrap_or(0).min(30) as u8),
                    (precision > 65).then_some(TypeLoss::Precision),
                ),
                None => (CanonicalType::decimal(38, 10), Some(TypeLoss::Precision)),
            }
        }
        "boolean" | "bool" => (CanonicalType::Bool, None),
        "character varying" | "varchar" => (CanonicalType::text(p1), None),
        "character" | "char" | "bpchar" => (CanonicalType::text(p1.or(Some(1))), None),
        "text" | "citext" | "name" => (CanonicalType::Clob, None),
        "bytea" => (CanonicalType::Blob, None),
        "date" => (CanonicalType::Date, None),
        "time" | "time without time zone" => (CanonicalType::Time, None),
        "time with time zone" | "timetz" => (CanonicalType::Time, Some(TypeLoss::Timezone)),
        "timestamp" | "timestamp without time zone" => (CanonicalType::Datetime, None),
        "timestamp with time zone" | "timestamptz" => {
            (CanonicalType::Datetimetz, Some(TypeLoss::Timezone))
        }
        "json" | "jsonb" => (CanonicalType::Json, None),
        "uuid" => (CanonicalType::Uuid, None),
        _ => (CanonicalType::Unknown, Some(TypeLoss::Unsupported)),
    }
}

/// Best postgres rendering of a canonical type; the round-trip counterpart of
/// [to_canonical].
pub fn from_canonical(canonical: &CanonicalType) -> Result<String, TypeError> {
    let rendered = match canonical {
        CanonicalType::Int1 | CanonicalType::Int2 => "SMALLINT".to_string(),
        CanonicalType::Int4 => "INTEGER".to_string(),
        CanonicalType::Int8 => "BIGINT".to_string(),
        CanonicalType::Float4 => "REAL".to_string(),
        CanonicalType::Float8 => "DOUBLE PRECISION".to_string(),
        CanonicalType::Decimal { precision, scale } => format!("NUMERIC({precision},{scale})"),
        CanonicalType::Bool => "BOOLEAN".to_string(),
        CanonicalType::Text { length: Some(n) } => format!("VARCHAR({n})"),
        CanonicalType::Text { length: None } | CanonicalType::Clob => "TEXT".to_string(),
        CanonicalType::Ntext { length: Some(n) } => format!("VARCHAR({n})"),
        CanonicalType::Ntext { length: None } => "TEXT".to_string(),
        CanonicalType::Blob => "BYTEA".to_string(),
        CanonicalType::Date => "DATE".to_string(),
        CanonicalType::Time => "TIME".to_string(),
        CanonicalType::Datetime => "TIMESTAMP".to_string(),
        CanonicalType::Datetimetz => "TIMESTAMPTZ".to_string(),
        CanonicalType::Json => "JSONB".to_string(),
        CanonicalType::Uuid => "UUID".to_string(),
        CanonicalType::BinaryFixed { .. } => "BYTEA".to_string(),
        CanonicalType::Enum { .. } | CanonicalType::Unknown => {
            return Err(TypeError::NoTargetRendering(canonical.to_string()))
        }
    };
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parameterized_types() {
        assert_eq!(
            to_canonical("character varying(255)"),
            (CanonicalType::text(Some(255)), None)
        );
        assert_eq!(
            to_canonical("numeric(18,4)"),
            (CanonicalType::decimal(18, 4), None)
        );
        assert_eq!(to_canonical("numeric(18)"), (CanonicalType::decimal(18, 0), None));
    }

    #[test]
    fn timestamptz_records_zone_loss() {
        let (canonical, loss) = to_canonical("timestamp with time zone");
        assert_eq!(canonical, CanonicalType::Datetimetz);
        assert_eq!(loss, Some(TypeLoss::Timezone));
    }

    #[test]
    fn unknown_type_is_flagged_not_fatal() {
        let (canonical, loss) = to_canonical("tsvector");
        assert_eq!(canonical, CanonicalType::Unknown);
        assert_eq!(loss, Some(TypeLoss::Unsupported));
    }

    #[test]
    fn round_trip_preserves_width() {
        for raw in ["smallint", "integer", "bigint", "date", "uuid", "numeric(18,4)"] {
            let (canonical, loss) = to_canonical(raw);
            assert!(loss.is_none(), "{raw} should be lossless");
            let back = from_canonical(&canonical).unwrap();
            let (again, _) = to_canonical(&back);
            assert_eq!(canonical, again, "{raw} did not round-trip");
        }
    }
}

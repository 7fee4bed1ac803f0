use dbshift_types::canonical::{CanonicalType, TypeLoss};
use dbshift_types::errors::TypeError;
use regex::Regex;
use std::sync::OnceLock;

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([a-zA-Z_][a-zA-Z_0-9]*)\s*(?:\(\s*(max|\-?\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*$")
            .expect("mssql type pattern")
    })
}

/// Parse a SQL Server native type string into its canonical form.
pub fn to_canonical(raw: &str) -> (CanonicalType, Option<TypeLoss>) {
    let Some(caps) = type_pattern().captures(raw) else {
        return (CanonicalType::Unknown, Some(TypeLoss::Unsupported));
    };
    let base = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let p1 = caps.get(2).map(|m| m.as_str());
    let p2: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());
    // `(max)` and the catalog's `-1` both mean unbounded.
    let length: Option<u32> = match p1 {
        Some("max") | Some("-1") => None,
        Some(n) => n.parse().ok(),
        None => None,
    };

    match base.as_str() {
        "tinyint" => (CanonicalType::Int2, None),
        "smallint" => (CanonicalType::Int2, None),
        "int" => (CanonicalType::Int4, None),
        "bigint" => (CanonicalType::Int8, None),
        "bit" => (CanonicalType::Bool, None),
        "real" => (CanonicalType::Float4, None),
        "float" => match length {
            Some(n) if n <= 24 => (CanonicalType::Float4, None),
            _ => (CanonicalType::Float8, None),
        },
        "decimal" | "numeric" => (
            CanonicalType::decimal(
                length.unwrap_or(18).min(65) as u8,
                p2.unwrap_or(0).min(30) as u8,
            ),
            None,
        ),
        "money" => (CanonicalType::decimal(19, 4), None),
        "smallmoney" => (CanonicalType::decimal(10, 4), None),
        "char" | "varchar" => (CanonicalType::text(length), None),
        "nchar" | "nvarchar" => (CanonicalType::Ntext { length }, None),
        "text" | "ntext" | "xml" => (CanonicalType::Clob, None),
        "binary" => (
            CanonicalType::BinaryFixed {
                length: length.unwrap_or(1),
            },
            None,
        ),
        "varbinary" | "image" | "rowversion" | "timestamp" => (CanonicalType::Blob, None),
        "date" => (CanonicalType::Date, None),
        "time" => (CanonicalType::Time, None),
        "smalldatetime" | "datetime" | "datetime2" => (CanonicalType::Datetime, None),
        "datetimeoffset" => (CanonicalType::Datetimetz, Some(TypeLoss::Timezone)),
        "uniqueidentifier" => (CanonicalType::Uuid, None),
        _ => (CanonicalType::Unknown, Some(TypeLoss::Unsupported)),
    }
}

/// Best SQL Server rendering of a canonical type.
pub fn from_canonical(canonical: &CanonicalType) -> Result<String, TypeError> {
    let rendered = match canonical {
        CanonicalType::Int1 => "TINYINT".to_string(),
        CanonicalType::Int2 => "SMALLINT".to_string(),
        CanonicalType::Int4 => "INT".to_string(),
        CanonicalType::Int8 => "BIGINT".to_string(),
        CanonicalType::Float4 => "REAL".to_string(),
        CanonicalType::Float8 => "FLOAT".to_string(),
        CanonicalType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
        CanonicalType::Bool => "BIT".to_string(),
        CanonicalType::Text { length: Some(n) } => format!("VARCHAR({n})"),
        CanonicalType::Text { length: None } => "VARCHAR(MAX)".to_string(),
        CanonicalType::Ntext { length: Some(n) } => format!("NVARCHAR({n})"),
        CanonicalType::Ntext { length: None } => "NVARCHAR(MAX)".to_string(),
        CanonicalType::Clob => "NVARCHAR(MAX)".to_string(),
        CanonicalType::Blob => "VARBINARY(MAX)".to_string(),
        CanonicalType::BinaryFixed { length } => format!("BINARY({length})"),
        CanonicalType::Date => "DATE".to_string(),
        CanonicalType::Time => "TIME".to_string(),
        CanonicalType::Datetime => "DATETIME2".to_string(),
        CanonicalType::Datetimetz => "DATETIMEOFFSET".to_string(),
        CanonicalType::Json => "NVARCHAR(MAX)".to_string(),
        CanonicalType::Uuid => "UNIQUEIDENTIFIER".to_string(),
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
    fn nvarchar_max_has_no_length() {
        assert_eq!(
            to_canonical("nvarchar(max)"),
            (CanonicalType::Ntext { length: None }, None)
        );
        assert_eq!(
            to_canonical("nvarchar(-1)"),
            (CanonicalType::Ntext { length: None }, None)
        );
        assert_eq!(
            to_canonical("nvarchar(100)"),
            (CanonicalType::Ntext { length: Some(100) }, None)
        );
    }

    #[test]
    fn money_is_fixed_decimal() {
        assert_eq!(to_canonical("money"), (CanonicalType::decimal(19, 4), None));
    }

    #[test]
    fn datetimeoffset_records_zone_loss() {
        let (canonical, loss) = to_canonical("datetimeoffset");
        assert_eq!(canonical, CanonicalType::Datetimetz);
        assert_eq!(loss, Some(TypeLoss::Timezone));
    }

    #[test]
    fn float_width_splits_at_24() {
        assert_eq!(to_canonical("float(24)"), (CanonicalType::Float4, None));
        assert_eq!(to_canonical("float(53)"), (CanonicalType::Float8, None));
        assert_eq!(to_canonical("float"), (CanonicalType::Float8, None));
    }

    #[test]
    fn round_trip_preserves_width() {
        for raw in ["smallint", "int", "bigint", "decimal(18,4)", "date", "uniqueidentifier"] {
            let (canonical, loss) = to_canonical(raw);
            assert!(loss.is_none(), "{raw} should be lossless");
            let back = from_canonical(&canonical).unwrap();
            let (again, _) = to_canonical(&back.to_lowercase());
            assert_eq!(canonical, again, "{raw} did not round-trip");
        }
    }
}

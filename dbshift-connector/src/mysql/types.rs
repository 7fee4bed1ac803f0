use dbshift_types::canonical::{CanonicalType, TypeLoss};
use dbshift_types::errors::TypeError;
use regex::Regex;
use std::sync::OnceLock;

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([a-zA-Z_][a-zA-Z_0-9]*)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?(\s+unsigned)?\s*$")
            .expect("mysql type pattern")
    })
}

fn enum_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*enum\s*\(\s*'([^']*)'(?:\s*,\s*'([^']*)')*\s*\)\s*$")
            .expect("mysql enum pattern")
    })
}

/// Parse a MySQL native type string into its canonical form. Also serves as
/// the target-type grammar check for proposed mappings: a string is valid
/// when it does not parse to `UNKNOWN`.
pub fn to_canonical(raw: &str) -> (CanonicalType, Option<TypeLoss>) {
    let lowered = raw.to_lowercase();
    if lowered.trim_start().starts_with("enum") {
        if enum_pattern().is_match(&lowered) {
            let values: Vec<String> = lowered
                .trim()
                .trim_start_matches("enum")
                .trim()
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .map(|v| v.trim().trim_matches('\'').to_string())
                .collect();
            return (CanonicalType::Enum { values }, None);
        }
        return (CanonicalType::Unknown, Some(TypeLoss::Unsupported));
    }

    let Some(caps) = type_pattern().captures(&lowered) else {
        return (CanonicalType::Unknown, Some(TypeLoss::Unsupported));
    };
    let base = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let p1: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let p2: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());

    match base {
        "bool" | "boolean" => (CanonicalType::Bool, None),
        // tinyint(1) is the MySQL idiom for a boolean column.
        "tinyint" if p1 == Some(1) => (CanonicalType::Bool, None),
        "tinyint" => (CanonicalType::Int1, None),
        "smallint" => (CanonicalType::Int2, None),
        "mediumint" | "int" | "integer" => (CanonicalType::Int4, None),
        "bigint" => (CanonicalType::Int8, None),
        "float" => (CanonicalType::Float4, None),
        "double" | "real" => (CanonicalType::Float8, None),
        "decimal" | "numeric" => (
            CanonicalType::decimal(p1.unwrap_or(10).min(65) as u8, p2.unwrap_or(0).min(30) as u8),
            None,
        ),
        "char" if p1 == Some(36) => (CanonicalType::Uuid, None),
        "char" | "varchar" => (CanonicalType::text(p1), None),
        "tinytext" | "text" | "mediumtext" | "longtext" => (CanonicalType::Clob, None),
        "binary" => (
            CanonicalType::BinaryFixed {
                length: p1.unwrap_or(1),
            },
            None,
        ),
        "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            (CanonicalType::Blob, None)
        }
        "date" => (CanonicalType::Date, None),
        "time" => (CanonicalType::Time, None),
        "datetime" | "timestamp" => (CanonicalType::Datetime, None),
        "json" => (CanonicalType::Json, None),
        _ => (CanonicalType::Unknown, Some(TypeLoss::Unsupported)),
    }
}

/// Whether `raw` is a syntactically valid MySQL column type. Used to vet
/// LLM-proposed target types before they reach DDL generation.
pub fn is_valid_target_type(raw: &str) -> bool {
    !matches!(to_canonical(raw).0, CanonicalType::Unknown)
}

/// Best MySQL rendering of a canonical type. Total over the canonical set:
/// `UNKNOWN` falls back to LONGTEXT so a migration can always proceed; the
/// proposer attaches a warning when that happens.
pub fn from_canonical(canonical: &CanonicalType) -> (String, Option<TypeLoss>) {
    match canonical {
        CanonicalType::Int1 => ("TINYINT".to_string(), None),
        CanonicalType::Int2 => ("SMALLINT".to_string(), None),
        CanonicalType::Int4 => ("INT".to_string(), None),
        CanonicalType::Int8 => ("BIGINT".to_string(), None),
        CanonicalType::Float4 => ("FLOAT".to_string(), None),
        CanonicalType::Float8 => ("DOUBLE".to_string(), None),
        CanonicalType::Decimal { precision, scale } => {
            (format!("DECIMAL({precision},{scale})"), None)
        }
        CanonicalType::Bool => ("TINYINT(1)".to_string(), None),
        // utf8mb4 rows cap VARCHAR at 16383 characters.
        CanonicalType::Text { length: Some(n) } | CanonicalType::Ntext { length: Some(n) }
            if *n <= 16_383 =>
        {
            (format!("VARCHAR({n})"), None)
        }
        CanonicalType::Text { length: Some(_) } | CanonicalType::Ntext { length: Some(_) } => {
            ("TEXT".to_string(), Some(TypeLoss::Width))
        }
        CanonicalType::Text { length: None }
        | CanonicalType::Ntext { length: None }
        | CanonicalType::Clob => ("LONGTEXT".to_string(), None),
        CanonicalType::Blob => ("LONGBLOB".to_string(), None),
        CanonicalType::BinaryFixed { length } => (format!("BINARY({length})"), None),
        CanonicalType::Date => ("DATE".to_string(), None),
        CanonicalType::Time => ("TIME".to_string(), None),
        CanonicalType::Datetime => ("DATETIME".to_string(), None),
        CanonicalType::Datetimetz => ("DATETIME".to_string(), Some(TypeLoss::Timezone)),
        CanonicalType::Json => ("JSON".to_string(), None),
        CanonicalType::Uuid => ("CHAR(36)".to_string(), None),
        CanonicalType::Enum { values } => {
            let quoted: Vec<String> = values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect();
            (format!("ENUM({})", quoted.join(",")), None)
        }
        CanonicalType::Unknown => ("LONGTEXT".to_string(), Some(TypeLoss::Unsupported)),
    }
}

/// The deterministic canonical→MySQL rule table as a plain error-free
/// rendering, for callers that must not accept the UNKNOWN fallback.
pub fn from_canonical_strict(canonical: &CanonicalType) -> Result<String, TypeError> {
    match canonical {
        CanonicalType::Unknown => Err(TypeError::NoTargetRendering(canonical.to_string())),
        other => Ok(from_canonical(other).0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_renders_as_tinyint1() {
        assert_eq!(from_canonical(&CanonicalType::Bool).0, "TINYINT(1)");
        assert_eq!(to_canonical("tinyint(1)"), (CanonicalType::Bool, None));
        assert_eq!(to_canonical("tinyint"), (CanonicalType::Int1, None));
    }

    #[test]
    fn uuid_renders_as_char36() {
        assert_eq!(from_canonical(&CanonicalType::Uuid).0, "CHAR(36)");
        assert_eq!(to_canonical("char(36)"), (CanonicalType::Uuid, None));
    }

    #[test]
    fn datetimetz_flattens_with_loss() {
        let (rendered, loss) = from_canonical(&CanonicalType::Datetimetz);
        assert_eq!(rendered, "DATETIME");
        assert_eq!(loss, Some(TypeLoss::Timezone));
    }

    #[test]
    fn unknown_falls_back_to_longtext() {
        let (rendered, loss) = from_canonical(&CanonicalType::Unknown);
        assert_eq!(rendered, "LONGTEXT");
        assert_eq!(loss, Some(TypeLoss::Unsupported));
        assert!(from_canonical_strict(&CanonicalType::Unknown).is_err());
    }

    #[test]
    fn wide_varchar_degrades_to_text() {
        let (rendered, loss) = from_canonical(&CanonicalType::text(Some(20_000)));
        assert_eq!(rendered, "TEXT");
        assert_eq!(loss, Some(TypeLoss::Width));
    }

    #[test]
    fn target_grammar_check() {
        assert!(is_valid_target_type("DECIMAL(18,4)"));
        assert!(is_valid_target_type("VARCHAR(255)"));
        assert!(is_valid_target_type("ENUM('a','b')"));
        assert!(!is_valid_target_type("FANCYTYPE"));
        assert!(!is_valid_target_type("VARCHAR(abc)"));
    }

    #[test]
    fn enum_values_parse() {
        let (canonical, _) = to_canonical("enum('red','green','blue')");
        assert_eq!(
            canonical,
            CanonicalType::Enum {
                values: vec!["red".into(), "green".into(), "blue".into()]
            }
        );
    }
}

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Engine-independent intermediate type. Every source native type maps into
/// this set on extraction and back out to a target native type during schema
/// generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalType {
    Int1,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Decimal {
        precision: u8,
        scale: u8,
    },
    Bool,
    Text {
        #[serde(skip_serializing_if = "Option::is_none")]
        length: Option<u32>,
    },
    Ntext {
        #[serde(skip_serializing_if = "Option::is_none")]
        length: Option<u32>,
    },
    Clob,
    Blob,
    Date,
    Time,
    Datetime,
    Datetimetz,
    Json,
    Uuid,
    Enum {
        values: Vec<String>,
    },
    BinaryFixed {
        length: u32,
    },
    Unknown,
}

impl CanonicalType {
    pub fn text(length: Option<u32>) -> Self {
        CanonicalType::Text { length }
    }

    pub fn decimal(precision: u8, scale: u8) -> Self {
        CanonicalType::Decimal { precision, scale }
    }

    /// Parameter-free discriminant, used as the row-transform dispatch key.
    pub fn kind(&self) -> CanonicalKind {
        match self {
            CanonicalType::Int1 => CanonicalKind::Int1,
            CanonicalType::Int2 => CanonicalKind::Int2,
            CanonicalType::Int4 => CanonicalKind::Int4,
            CanonicalType::Int8 => CanonicalKind::Int8,
            CanonicalType::Float4 => CanonicalKind::Float4,
            CanonicalType::Float8 => CanonicalKind::Float8,
            CanonicalType::Decimal { .. } => CanonicalKind::Decimal,
            CanonicalType::Bool => CanonicalKind::Bool,
            CanonicalType::Text { .. } => CanonicalKind::Text,
            CanonicalType::Ntext { .. } => CanonicalKind::Ntext,
            CanonicalType::Clob => CanonicalKind::Clob,
            CanonicalType::Blob => CanonicalKind::Blob,
            CanonicalType::Date => CanonicalKind::Date,
            CanonicalType::Time => CanonicalKind::Time,
            CanonicalType::Datetime => CanonicalKind::Datetime,
            CanonicalType::Datetimetz => CanonicalKind::Datetimetz,
            CanonicalType::Json => CanonicalKind::Json,
            CanonicalType::Uuid => CanonicalKind::Uuid,
            CanonicalType::Enum { .. } => CanonicalKind::Enum,
            CanonicalType::BinaryFixed { .. } => CanonicalKind::BinaryFixed,
            CanonicalType::Unknown => CanonicalKind::Unknown,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CanonicalType::Int1
                | CanonicalType::Int2
                | CanonicalType::Int4
                | CanonicalType::Int8
                | CanonicalType::Float4
                | CanonicalType::Float8
                | CanonicalType::Decimal { .. }
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            CanonicalType::Int1 | CanonicalType::Int2 | CanonicalType::Int4 | CanonicalType::Int8
        )
    }

    /// Whether a value of this type survives the source→target round trip
    /// byte-for-byte. Lossy kinds only get L2 warnings from the validator
    /// instead of failures.
    pub fn is_lossless(&self) -> bool {
        !matches!(
            self,
            CanonicalType::Datetimetz | CanonicalType::Enum { .. } | CanonicalType::Unknown
        )
    }
}

impl Display for CanonicalType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({precision},{scale})")
            }
            CanonicalType::Text { length: Some(n) } => write!(f, "TEXT({n})"),
            CanonicalType::Ntext { length: Some(n) } => write!(f, "NTEXT({n})"),
            CanonicalType::Enum { values } => write!(f, "ENUM({})", values.join(",")),
            CanonicalType::BinaryFixed { length } => write!(f, "BINARY_FIXED({length})"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// The discriminants of [CanonicalType], without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalKind {
    Int1,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Decimal,
    Bool,
    Text,
    Ntext,
    Clob,
    Blob,
    Date,
    Time,
    Datetime,
    Datetimetz,
    Json,
    Uuid,
    Enum,
    BinaryFixed,
    Unknown,
}

impl CanonicalKind {
    pub const ALL: [CanonicalKind; 21] = [
        CanonicalKind::Int1,
        CanonicalKind::Int2,
        CanonicalKind::Int4,
        CanonicalKind::Int8,
        CanonicalKind::Float4,
        CanonicalKind::Float8,
        CanonicalKind::Decimal,
        CanonicalKind::Bool,
        CanonicalKind::Text,
        CanonicalKind::Ntext,
        CanonicalKind::Clob,
        CanonicalKind::Blob,
        CanonicalKind::Date,
        CanonicalKind::Time,
        CanonicalKind::Datetime,
        CanonicalKind::Datetimetz,
        CanonicalKind::Json,
        CanonicalKind::Uuid,
        CanonicalKind::Enum,
        CanonicalKind::BinaryFixed,
        CanonicalKind::Unknown,
    ];
}

impl Display for CanonicalKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CanonicalKind::Int1 => "INT1",
            CanonicalKind::Int2 => "INT2",
            CanonicalKind::Int4 => "INT4",
            CanonicalKind::Int8 => "INT8",
            CanonicalKind::Float4 => "FLOAT4",
            CanonicalKind::Float8 => "FLOAT8",
            CanonicalKind::Decimal => "DECIMAL",
            CanonicalKind::Bool => "BOOL",
            CanonicalKind::Text => "TEXT",
            CanonicalKind::Ntext => "NTEXT",
            CanonicalKind::Clob => "CLOB",
            CanonicalKind::Blob => "BLOB",
            CanonicalKind::Date => "DATE",
            CanonicalKind::Time => "TIME",
            CanonicalKind::Datetime => "DATETIME",
            CanonicalKind::Datetimetz => "DATETIMETZ",
            CanonicalKind::Json => "JSON",
            CanonicalKind::Uuid => "UUID",
            CanonicalKind::Enum => "ENUM",
            CanonicalKind::BinaryFixed => "BINARY_FIXED",
            CanonicalKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Annotation recorded when a native→canonical or canonical→native mapping
/// does not round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeLoss {
    /// Zone information is dropped, values are normalized to UTC.
    Timezone,
    /// Precision or scale is narrowed.
    Precision,
    /// Declared width is narrowed or discarded.
    Width,
    /// Enumeration values are flattened to text.
    Enumeration,
    /// The source type has no canonical representation.
    Unsupported,
}

impl Display for TypeLoss {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeLoss::Timezone => "timezone",
            TypeLoss::Precision => "precision",
            TypeLoss::Width => "width",
            TypeLoss::Enumeration => "enumeration",
            TypeLoss::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_covers_every_variant() {
        for kind in CanonicalKind::ALL {
            // Display and serde names must agree on the canonical spelling.
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json.trim_matches('"'), kind.to_string());
        }
    }

    #[test]
    fn parameterized_display() {
        assert_eq!(CanonicalType::decimal(18, 4).to_string(), "DECIMAL(18,4)");
        assert_eq!(CanonicalType::text(Some(255)).to_string(), "TEXT(255)");
        assert_eq!(CanonicalType::text(None).to_string(), "TEXT");
        assert_eq!(
            CanonicalType::BinaryFixed { length: 16 }.to_string(),
            "BINARY_FIXED(16)"
        );
    }

    #[test]
    fn serde_round_trip_keeps_parameters() {
        let ty = CanonicalType::decimal(10, 2);
        let json = serde_json::to_string(&ty).unwrap();
        let back: CanonicalType = serde_json::from_str(&json).unwrap();
        assert_eq!(ty, back);
    }
}

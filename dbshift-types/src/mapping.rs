use crate::canonical::CanonicalType;
use crate::schema::ColumnRole;
use serde::{Deserialize, Serialize};

/// Standard warnings attached to a proposed column mapping.
pub const WARNING_LLM_FALLBACK: &str = "llm_fallback";
pub const WARNING_UNKNOWN_TYPE: &str = "unknown_type_fallback";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Source column name.
    pub source: String,
    pub source_type_raw: String,
    pub canonical_type: CanonicalType,
    /// Target column name; usually equal to `source`.
    pub target: String,
    /// Native target type, e.g. `DECIMAL(18,4)`.
    pub target_type: String,
    #[serde(default)]
    pub role: ColumnRole,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub source_table: String,
    pub target_table: String,
    pub columns: Vec<ColumnMapping>,
    /// Relative position in the FK-aware load order; purely advisory, the
    /// migrator recomputes the real order from the FK graph.
    #[serde(default)]
    pub load_order_hint: u32,
    #[serde(default)]
    pub disable_fk_during_load: bool,
}

impl TableMapping {
    pub fn column_for_source(&self, source: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|c| c.source == source)
    }

    pub fn source_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.source.clone()).collect()
    }

    pub fn target_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.target.clone()).collect()
    }

    pub fn primary_key_targets(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.role == ColumnRole::PrimaryKey)
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .filter_map(|c| c.warning.as_deref().map(|w| (c.source.as_str(), w)))
    }
}

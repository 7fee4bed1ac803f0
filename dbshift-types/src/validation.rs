use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CheckKind {
    #[serde(rename = "L1_rowcount")]
    L1RowCount,
    #[serde(rename = "L2_agg")]
    L2Aggregate,
    #[serde(rename = "L3_samplehash")]
    L3SampleHash,
}

impl Display for CheckKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CheckKind::L1RowCount => "L1_rowcount",
            CheckKind::L2Aggregate => "L2_agg",
            CheckKind::L3SampleHash => "L3_samplehash",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    pub pass: bool,
    pub details: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub target_table: String,
    pub checks: Vec<CheckOutcome>,
    pub pass: bool,
}

impl ValidationResult {
    pub fn new(target_table: String, checks: Vec<CheckOutcome>) -> Self {
        let pass = checks.iter().all(|c| c.pass);
        Self {
            target_table,
            checks,
            pass,
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.pass)
    }
}

pub mod client;
pub mod rules;

use crate::errors::{ExecutionError, LlmError};
use crate::events::{Event, EventSink};
use crate::registry::{write_json_atomic, RunPaths};
use client::ProposalClient;
use dbshift_connector::mysql::types::is_valid_target_type;
use dbshift_types::mapping::{ColumnMapping, TableMapping, WARNING_LLM_FALLBACK};
use dbshift_types::schema::{ColumnRole, TableSpec};
use dbshift_types::serde::Deserialize;
use dbshift_types::serde_json::{self, json};
use dbshift_types::tracing::{info, warn};
use futures::stream::{self, StreamExt};

const STAGE: &str = "propose";

/// One column of the structured LLM response.
#[derive(Debug, Deserialize)]
#[serde(crate = "dbshift_types::serde")]
struct ProposedColumn {
    source: String,
    target: String,
    target_type: String,
    #[serde(default)]
    transform_hint: Option<String>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "dbshift_types::serde")]
struct Proposal {
    columns: Vec<ProposedColumn>,
}

/// Build the per-table prompt: the table description plus the canonical-set
/// reference the model must map from.
fn build_prompt(table: &TableSpec, violation: Option<&str>) -> String {
    let columns: Vec<_> = table
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "source_type": c.source_type_raw,
                "canonical_type": c.canonical_type.to_string(),
                "nullable": c.nullable,
                "role": c.role,
            })
        })
        .collect();
    let mut prompt = json!({
        "table": table.name,
        "target_engine": "mysql",
        "columns": columns,
        "canonical_types": dbshift_types::canonical::CanonicalKind::ALL
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>(),
    })
    .to_string();
    if let Some(violation) = violation {
        prompt.push_str("\nYour previous answer was rejected: ");
        prompt.push_str(violation);
        prompt.push_str("\nFix the violation and answer again with JSON only.");
    }
    prompt
}

/// Models love to wrap JSON in markdown fences; tolerate that.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Check a parsed proposal against the table spec. Returns the first
/// violation found, phrased for the retry prompt.
fn validate_proposal(table: &TableSpec, proposal: &Proposal) -> Result<(), String> {
    if proposal.columns.len() != table.columns.len() {
        return Err(format!(
            "expected {} columns, got {}",
            table.columns.len(),
            proposal.columns.len()
        ));
    }
    for (spec, proposed) in table.columns.iter().zip(&proposal.columns) {
        if spec.name != proposed.source {
            return Err(format!(
                "column order mismatch: expected {:?}, got {:?}",
                spec.name, proposed.source
            ));
        }
        if !is_valid_target_type(&proposed.target_type) {
            return Err(format!(
                "{:?} is not a valid mysql type for column {:?}",
                proposed.target_type, proposed.source
            ));
        }
        if spec.role == ColumnRole::PrimaryKey && spec.nullable {
            return Err(format!(
                "primary key column {:?} must stay NOT NULL",
                spec.name
            ));
        }
    }
    Ok(())
}

fn mapping_from_proposal(table: &TableSpec, proposal: Proposal) -> TableMapping {
    let columns = table
        .columns
        .iter()
        .zip(proposal.columns)
        .map(|(spec, proposed)| ColumnMapping {
            source: spec.name.clone(),
            source_type_raw: spec.source_type_raw.clone(),
            canonical_type: spec.canonical_type.clone(),
            target: proposed.target,
            target_type: proposed.target_type,
            role: spec.role,
            nullable: spec.nullable,
            transform_hint: proposed.transform_hint,
            warning: proposed.warning,
        })
        .collect();
    TableMapping {
        source_table: table.name.clone(),
        target_table: table.name.clone(),
        columns,
        load_order_hint: 0,
        disable_fk_during_load: false,
    }
}

/// Propose a mapping for one table: up to `max_retries` LLM attempts with
/// violations fed back, then the deterministic rule-based fallback tagged
/// `llm_fallback`.
pub async fn propose_table(
    table: &TableSpec,
    llm: Option<&dyn ProposalClient>,
    max_retries: u32,
) -> TableMapping {
    let Some(llm) = llm else {
        return rules::rule_based_mapping(table);
    };

    let mut violation: Option<String> = None;
    for attempt in 1..=max_retries.max(1) {
        let prompt = build_prompt(table, violation.as_deref());
        let outcome: Result<Proposal, LlmError> = match llm.propose(&prompt).await {
            Ok(content) => serde_json::from_str(strip_fences(&content))
                .map_err(|e| LlmError::MalformedResponse(e.to_string())),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(proposal) => match validate_proposal(table, &proposal) {
                Ok(()) => {
                    info!("LLM mapping accepted for {} on attempt {attempt}", table.name);
                    return mapping_from_proposal(table, proposal);
                }
                Err(why) => {
                    warn!("LLM proposal for {} rejected: {why}", table.name);
                    violation = Some(why);
                }
            },
            Err(e) => {
                warn!("LLM call for {} failed: {e}", table.name);
                violation = Some(e.to_string());
            }
        }
    }

    let mut mapping = rules::rule_based_mapping(table);
    for column in &mut mapping.columns {
        column.warning = Some(match column.warning.take() {
            Some(existing) => format!("{WARNING_LLM_FALLBACK},{existing}"),
            None => WARNING_LLM_FALLBACK.to_string(),
        });
    }
    mapping
}

/// Run the propose stage over every extracted table, bounded by the
/// configured proposer parallelism, and write draft mappings.
pub async fn run_propose(
    tables: &[TableSpec],
    llm: Option<&dyn ProposalClient>,
    max_retries: u32,
    parallelism: usize,
    paths: &RunPaths,
    events: &EventSink,
) -> Result<Vec<TableMapping>, ExecutionError> {
    let mappings: Vec<TableMapping> = stream::iter(tables)
        .map(|table| async move { propose_table(table, llm, max_retries).await })
        .buffered(parallelism.max(1))
        .collect()
        .await;

    for mapping in &mappings {
        let path = paths
            .draft_mappings_dir()
            .join(format!("{}.json", mapping.source_table));
        write_json_atomic(&path, mapping)?;
        events.emit(Event::TableDone {
            stage: STAGE.to_string(),
            table: mapping.source_table.clone(),
        });
    }
    events.done(STAGE);
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::MockProposalClient;
    use dbshift_types::canonical::CanonicalType;
    use dbshift_types::schema::ColumnSpec;

    fn users_table() -> TableSpec {
        TableSpec {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![
                ColumnSpec {
                    name: "id".into(),
                    source_type_raw: "integer".into(),
                    canonical_type: CanonicalType::Int4,
                    nullable: false,
                    role: ColumnRole::PrimaryKey,
                    default_expression: None,
                    comment: None,
                    loss: None,
                },
                ColumnSpec {
                    name: "age".into(),
                    source_type_raw: "smallint".into(),
                    canonical_type: CanonicalType::Int2,
                    nullable: true,
                    role: ColumnRole::None,
                    default_expression: None,
                    comment: None,
                    loss: None,
                },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            row_count_estimate: 2,
        }
    }

    fn good_response() -> String {
        json!({
            "columns": [
                {"source": "id", "target": "id", "target_type": "INT"},
                {"source": "age", "target": "age", "target_type": "SMALLINT"},
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn accepts_valid_llm_proposal() {
        let mock = MockProposalClient::with_responses([good_response()]);
        let mapping = propose_table(&users_table(), Some(&mock), 3).await;
        assert_eq!(mapping.columns[0].target_type, "INT");
        assert!(mapping.columns[0].warning.is_none());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_responses_retry_then_fall_back() {
        // Three malformed answers exhaust the retry budget.
        let mock = MockProposalClient::with_responses([
            "not json".to_string(),
            "{\"columns\": []}".to_string(),
            "```json\nnope\n```".to_string(),
        ]);
        let mapping = propose_table(&users_table(), Some(&mock), 3).await;
        assert_eq!(mock.calls(), 3);
        for column in &mapping.columns {
            let warning = column.warning.as_deref().unwrap();
            assert!(warning.contains(WARNING_LLM_FALLBACK), "got {warning:?}");
        }
        // The fallback is the deterministic rule table.
        assert_eq!(mapping.columns[0].target_type, "INT");
        assert_eq!(mapping.columns[1].target_type, "SMALLINT");
    }

    #[tokio::test]
    async fn invalid_target_type_is_fed_back() {
        let mock =
            MockProposalClient::with_responses([
                json!({
                    "columns": [
                        {"source": "id", "target": "id", "target_type": "FANCYTYPE"},
                        {"source": "age", "target": "age", "target_type": "SMALLINT"},
                    ]
                })
                .to_string(),
                good_response(),
            ]);
        let mapping = propose_table(&users_table(), Some(&mock), 3).await;
        assert_eq!(mock.calls(), 2);
        assert!(mapping.columns[0].warning.is_none());
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_fences("{}"), "{}");
    }

    #[tokio::test]
    async fn no_llm_uses_rules_without_fallback_warning() {
        let mapping = propose_table(&users_table(), None, 3).await;
        assert!(mapping.columns.iter().all(|c| c.warning.is_none()));
    }
}

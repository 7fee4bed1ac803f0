use daggy::petgraph::algo::tarjan_scc;
use daggy::petgraph::graph::{DiGraph, NodeIndex};
use dbshift_types::schema::TableSpec;
use std::collections::HashMap;

/// A set of tables loaded as one unit. Multi-table units are FK cycles and
/// load with target-side FK enforcement disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadUnit {
    pub tables: Vec<String>,
    pub disable_fk: bool,
}

/// FK-aware load order: stages run sequentially, units inside a stage are
/// independent and may run in parallel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub stages: Vec<Vec<LoadUnit>>,
}

impl LoadPlan {
    pub fn needs_fk_disable(&self) -> bool {
        self.stages
            .iter()
            .flatten()
            .any(|unit| unit.disable_fk)
    }

    pub fn table_count(&self) -> usize {
        self.stages
            .iter()
            .flatten()
            .map(|unit| unit.tables.len())
            .sum()
    }
}

/// Build the load plan for `tables` from the FK edges recorded in their
/// specs. Edges pointing at tables outside the migrated set are ignored.
///
/// Cycles (self-references and mutual FKs) collapse into a single unit
/// flagged for FK-disabled loading; everything else is ordered parents
/// before children.
pub fn plan_load_order(specs: &[TableSpec], tables: &[String]) -> LoadPlan {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
    for table in tables {
        let idx = graph.add_node(table.clone());
        index_of.insert(table.as_str(), idx);
    }

    // Edge parent → child: the parent must finish before the child starts.
    for spec in specs {
        let Some(&child) = index_of.get(spec.name.as_str()) else {
            continue;
        };
        for fk in &spec.foreign_keys {
            if let Some(&parent) = index_of.get(fk.ref_table.as_str()) {
                graph.add_edge(parent, child, ());
            }
        }
    }

    // Tarjan yields SCCs in reverse topological order of the condensation.
    let mut sccs = tarjan_scc(&graph);
    sccs.reverse();

    let mut scc_of: HashMap<NodeIndex, usize> = HashMap::new();
    for (scc_index, scc) in sccs.iter().enumerate() {
        for &node in scc {
            scc_of.insert(node, scc_index);
        }
    }

    // Longest-path level of each SCC in the condensation decides its stage.
    let mut level = vec![0usize; sccs.len()];
    for edge in graph.raw_edges() {
        let from = scc_of[&edge.source()];
        let to = scc_of[&edge.target()];
        if from != to && level[to] < level[from] + 1 {
            level[to] = level[from] + 1;
        }
    }
    // One backward edge inside a stage chain would be a bug in tarjan's
    // ordering; relax repeatedly to be safe with arbitrary edge order.
    let mut changed = true;
    while changed {
        changed = false;
        for edge in graph.raw_edges() {
            let from = scc_of[&edge.source()];
            let to = scc_of[&edge.target()];
            if from != to && level[to] < level[from] + 1 {
                level[to] = level[from] + 1;
                changed = true;
            }
        }
    }

    let stage_count = level.iter().map(|l| l + 1).max().unwrap_or(0);
    let mut stages: Vec<Vec<LoadUnit>> = vec![Vec::new(); stage_count];
    for (scc_index, scc) in sccs.iter().enumerate() {
        let has_self_loop = scc
            .iter()
            .any(|&node| graph.find_edge(node, node).is_some());
        let mut unit_tables: Vec<String> =
            scc.iter().map(|&node| graph[node].clone()).collect();
        unit_tables.sort();
        stages[level[scc_index]].push(LoadUnit {
            disable_fk: scc.len() > 1 || has_self_loop,
            tables: unit_tables,
        });
    }
    for stage in &mut stages {
        stage.sort_by(|a, b| a.tables.cmp(&b.tables));
    }
    LoadPlan { stages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbshift_types::schema::ForeignKeySpec;

    fn spec(name: &str, fks: &[(&str, &str)]) -> TableSpec {
        TableSpec {
            schema: "public".into(),
            name: name.into(),
            columns: vec![],
            primary_key: vec![],
            foreign_keys: fks
                .iter()
                .map(|(local, parent)| ForeignKeySpec {
                    local_columns: vec![local.to_string()],
                    ref_table: parent.to_string(),
                    ref_columns: vec!["id".into()],
                })
                .collect(),
            row_count_estimate: 0,
        }
    }

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn stage_tables(plan: &LoadPlan, stage: usize) -> Vec<&str> {
        plan.stages[stage]
            .iter()
            .flat_map(|u| u.tables.iter().map(|t| t.as_str()))
            .collect()
    }

    #[test]
    fn parents_load_before_children() {
        let specs = vec![
            spec("users", &[]),
            spec("orders", &[("user_id", "users")]),
            spec("order_items", &[("order_id", "orders")]),
        ];
        let plan = plan_load_order(&specs, &tables(&["order_items", "orders", "users"]));
        assert_eq!(plan.stages.len(), 3);
        assert_eq!(stage_tables(&plan, 0), vec!["users"]);
        assert_eq!(stage_tables(&plan, 1), vec!["orders"]);
        assert_eq!(stage_tables(&plan, 2), vec!["order_items"]);
        assert!(!plan.needs_fk_disable());
    }

    #[test]
    fn independent_tables_share_a_stage() {
        let specs = vec![spec("a", &[]), spec("b", &[]), spec("c", &[("b_id", "b")])];
        let plan = plan_load_order(&specs, &tables(&["a", "b", "c"]));
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(stage_tables(&plan, 0), vec!["a", "b"]);
        assert_eq!(stage_tables(&plan, 1), vec!["c"]);
    }

    #[test]
    fn mutual_fk_cycle_collapses_into_fk_disabled_unit() {
        let specs = vec![spec("a", &[("b_id", "b")]), spec("b", &[("a_id", "a")])];
        let plan = plan_load_order(&specs, &tables(&["a", "b"]));
        assert_eq!(plan.stages.len(), 1);
        assert_eq!(plan.stages[0].len(), 1);
        let unit = &plan.stages[0][0];
        assert_eq!(unit.tables, vec!["a", "b"]);
        assert!(unit.disable_fk);
        assert!(plan.needs_fk_disable());
    }

    #[test]
    fn self_reference_disables_fk_for_that_table_only() {
        let specs = vec![spec("employees", &[("manager_id", "employees")]), spec("t", &[])];
        let plan = plan_load_order(&specs, &tables(&["employees", "t"]));
        let units: Vec<&LoadUnit> = plan.stages.iter().flatten().collect();
        let employees = units
            .iter()
            .find(|u| u.tables == vec!["employees".to_string()])
            .unwrap();
        assert!(employees.disable_fk);
        let t = units
            .iter()
            .find(|u| u.tables == vec!["t".to_string()])
            .unwrap();
        assert!(!t.disable_fk);
    }

    #[test]
    fn fk_to_unmigrated_table_is_ignored() {
        let specs = vec![spec("orders", &[("user_id", "users")])];
        let plan = plan_load_order(&specs, &tables(&["orders"]));
        assert_eq!(plan.stages.len(), 1);
        assert_eq!(plan.table_count(), 1);
    }
}

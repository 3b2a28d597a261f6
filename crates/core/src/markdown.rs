use crate::model::SourceKind;
use crate::planner::{ExecutionPlan, PlanPolicy};

pub fn render_plan_summary(plans: &[ExecutionPlan]) -> String {
    let total_moves: u64 = plans.iter().map(|plan| plan.planned_move_count).sum();
    let total_deletes: u64 = plans.iter().map(|plan| plan.planned_delete_count).sum();
    let without_lang = plans
        .iter()
        .filter(|plan| plan.lang_candidates.is_empty())
        .count();

    let mut out = String::new();
    out.push_str("# Lang Organizer Plan\n\n");
    out.push_str(&format!(
        "- Mod units: `{}`\n- Without localization: `{}`\n- Planned moves: `{}`\n- Planned deletes: `{}`\n\n",
        plans.len(),
        without_lang,
        total_moves,
        total_deletes
    ));

    out.push_str("## Units\n\n");
    if plans.is_empty() {
        out.push_str("No mod units found.\n");
        return out;
    }

    for plan in plans {
        out.push_str(&format!(
            "### `{}`\n\n- Kind: `{}`\n- Policy: {}\n- Moves: {}\n- Deletes: {}\n",
            plan.unit_name,
            source_kind_label(plan.source_kind),
            plan.policy_label(),
            plan.planned_move_count,
            plan.planned_delete_count
        ));
        if plan.lang_candidates.is_empty() {
            out.push_str("- Candidates: none\n");
        } else {
            out.push_str("- Candidates:\n");
            for candidate in &plan.lang_candidates {
                out.push_str(&format!("  - `{}`\n", candidate));
            }
        }
        if plan.policy == PlanPolicy::LangNotFound {
            out.push_str("- Warning: all contents of this unit will be deleted\n");
        }

        if !plan.operations.is_empty() {
            out.push_str("\n```text\n");
            for operation in &plan.operations {
                out.push_str(&operation.describe());
                out.push('\n');
            }
            out.push_str("```\n");
        }
        out.push('\n');
    }

    out
}

fn source_kind_label(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Folder => "folder",
        SourceKind::Archive => "archive",
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::render_plan_summary;
    use crate::model::SourceKind;
    use crate::planner::{ExecutionPlan, Operation, PlanPolicy};

    #[test]
    fn summary_lists_totals_and_operations() {
        let plans = vec![
            ExecutionPlan {
                unit_name: "ModA".to_string(),
                unit_path: PathBuf::from("/mods/ModA"),
                source_kind: SourceKind::Folder,
                lang_candidates: vec!["/mods/ModA/assets/moda/lang".to_string()],
                policy: PlanPolicy::LangFound,
                operations: vec![Operation::EnsureDirectory {
                    path: PathBuf::from("/mods/ModA/lang"),
                }],
                planned_move_count: 2,
                planned_delete_count: 1,
            },
            ExecutionPlan {
                unit_name: "Empty".to_string(),
                unit_path: PathBuf::from("/mods/Empty"),
                source_kind: SourceKind::Folder,
                lang_candidates: Vec::new(),
                policy: PlanPolicy::LangNotFound,
                operations: Vec::new(),
                planned_move_count: 0,
                planned_delete_count: 3,
            },
        ];

        let markdown = render_plan_summary(&plans);
        assert!(markdown.contains("- Mod units: `2`"));
        assert!(markdown.contains("- Planned deletes: `4`"));
        assert!(markdown.contains("Policy: A (lang found)"));
        assert!(markdown.contains("MKDIR   /mods/ModA/lang"));
        assert!(markdown.contains("all contents of this unit will be deleted"));
    }

    #[test]
    fn empty_summary_says_so() {
        assert!(render_plan_summary(&[]).contains("No mod units found."));
    }
}

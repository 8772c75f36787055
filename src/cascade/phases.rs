//! Ownership graph of a project, flattened into delete order.
//!
//! Several of these relations have no declared foreign key, so the store
//! cannot describe them. The order here is maintained by hand: every table is
//! listed before any table it points at.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// `column` holds the project id.
    Direct { column: &'static str },
    /// `column` holds the id of a row in `parent`, which is itself owned by
    /// the project.
    Via {
        column: &'static str,
        parent: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadePhase {
    pub table: &'static str,
    pub owner: Ownership,
}

const fn direct(table: &'static str) -> CascadePhase {
    CascadePhase {
        table,
        owner: Ownership::Direct {
            column: "project_id",
        },
    }
}

const fn via(table: &'static str, column: &'static str, parent: &'static str) -> CascadePhase {
    CascadePhase {
        table,
        owner: Ownership::Via { column, parent },
    }
}

pub const CASCADE_PHASES: &[CascadePhase] = &[
    // media
    via("photo_comments", "photo_id", "photos"),
    direct("photos"),
    direct("photo_albums"),
    via("document_versions", "document_id", "documents"),
    direct("documents"),
    // procurement
    via("delivery_items", "delivery_id", "deliveries"),
    via("deliveries", "order_id", "orders"),
    direct("orders"),
    // schedule
    via("work_sessions", "task_id", "schedule_tasks"),
    via("schedule_tasks", "phase_id", "schedule_phases"),
    direct("schedule_phases"),
    // safety and quality
    via("safety_attachments", "incident_id", "safety_incidents"),
    direct("safety_incidents"),
    via("inspection_results", "inspection_id", "quality_inspections"),
    via("inspection_photos", "inspection_id", "quality_inspections"),
    direct("quality_inspections"),
    // communications
    via("approval_records", "communication_id", "communications"),
    direct("communications"),
    // money
    direct("payments"),
    direct("financial_snapshots"),
    direct("change_orders"),
    direct("budget_items"),
    // everything else hangs straight off the project
    direct("milestones"),
    direct("project_contractors"),
    direct("daily_reports"),
    direct("punch_list_items"),
    direct("team_members"),
    direct("project_notifications"),
    direct("activity_log"),
];

/// Tables covered by the cascade, in delete order.
pub fn cascade_phase_tables() -> Vec<&'static str> {
    CASCADE_PHASES.iter().map(|phase| phase.table).collect()
}

pub(crate) fn phase_for(table: &str) -> Option<&'static CascadePhase> {
    CASCADE_PHASES.iter().find(|phase| phase.table == table)
}

/// Tables some other phase reaches through. Their id sets get resolved
/// before anything is deleted.
pub(crate) fn parent_tables() -> Vec<&'static str> {
    let mut parents: Vec<&'static str> = Vec::new();
    for phase in CASCADE_PHASES {
        if let Ownership::Via { parent, .. } = phase.owner {
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
    }
    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn position(table: &str) -> usize {
        CASCADE_PHASES
            .iter()
            .position(|phase| phase.table == table)
            .unwrap_or_else(|| panic!("{table} missing from phases"))
    }

    #[test]
    fn every_table_appears_once() {
        let tables = cascade_phase_tables();
        let unique: HashSet<_> = tables.iter().collect();
        assert_eq!(unique.len(), tables.len());
    }

    #[test]
    fn children_come_before_parents() {
        for phase in CASCADE_PHASES {
            if let Ownership::Via { parent, .. } = phase.owner {
                assert!(
                    position(phase.table) < position(parent),
                    "{} must be deleted before {}",
                    phase.table,
                    parent
                );
            }
        }
        // photos reference photo_albums through album_id
        assert!(position("photos") < position("photo_albums"));
    }

    #[test]
    fn parents_are_registered_phases() {
        for parent in parent_tables() {
            assert!(phase_for(parent).is_some(), "{parent} is not a phase");
        }
    }

    #[test]
    fn covers_roughly_thirty_record_kinds() {
        assert!(CASCADE_PHASES.len() >= 25);
    }
}

//! Role/field permission resolution
//!
//! Effective editability of a field is the intersection of two axes: the
//! role must appear in `editable_by` of the transition rule for the report's
//! current status, and the field must appear in the role's allow-list (or
//! the role holds the wildcard).

use super::graph::TransitionGraph;
use super::report::{ReportStatus, ReportType, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// Wildcard: every field.
    All,
    Only(&'static [&'static str]),
}

/// Per-role field allow-list. Administrators hold the wildcard; everyone
/// else edits only the fields their desk owns.
pub fn allowed_fields(role: Role) -> FieldAccess {
    match role {
        Role::SystemAdministrator | Role::Administrator => FieldAccess::All,
        Role::FrontDesk => FieldAccess::Only(&[
            "report_number",
            "received_date",
            "client_reference",
            "sample_description",
            "sample_quantity",
        ]),
        Role::ChemistryTester => FieldAccess::Only(&[
            "test_results",
            "test_method",
            "analyst_notes",
            "tested_date",
        ]),
        Role::MicroTester => FieldAccess::Only(&[
            "test_results",
            "test_method",
            "incubation_notes",
            "tested_date",
        ]),
        Role::QualityAssurance => FieldAccess::Only(&["qa_remarks", "approval_notes"]),
        Role::Client => FieldAccess::Only(&[
            "sample_description",
            "sample_quantity",
            "client_reference",
            "requested_tests",
            "contact_name",
        ]),
    }
}

pub fn can_edit_field(
    role: Role,
    report_type: ReportType,
    status: ReportStatus,
    field: &str,
) -> bool {
    if !TransitionGraph::shared()
        .editable_roles(report_type, status)
        .contains(&role)
    {
        return false;
    }
    match allowed_fields(role) {
        FieldAccess::All => true,
        FieldAccess::Only(fields) => fields.contains(&field),
    }
}

/// Whether an "advance" action should be offered at all: the role must hold
/// trigger authority for the current status and be able to edit at least one
/// of the fields on screen. Without the second half, a role with nothing to
/// legally change would still be shown an update action.
pub fn can_show_advance_action(
    role: Role,
    report_type: ReportType,
    status: ReportStatus,
    fields_on_screen: &[&str],
) -> bool {
    TransitionGraph::shared().can_trigger(report_type, status, role)
        && fields_on_screen
            .iter()
            .any(|field| can_edit_field(role, report_type, status, field))
}

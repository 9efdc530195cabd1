use super::report::{ReportStatus, Role};

/// Structured failure taxonomy for workflow mutations. Every variant except
/// the conflict case means "fix the request"; a conflict means "reload and
/// retry". All of them abort the operation with no partial state.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("transition from '{from}' to '{to}' is not part of the workflow")]
    IllegalTransition { from: ReportStatus, to: ReportStatus },
    #[error("status '{0}' is workflow terminal, no transitions leave it")]
    WorkflowTerminal(ReportStatus),
    #[error("role '{role}' is not authorized to {action}")]
    Unauthorized { role: Role, action: String },
    #[error("version conflict: expected {expected}, stored record is at {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("this transition requires a reason and a re-entered credential")]
    MissingESignCredential,
    #[error("no report record found for '{0}'")]
    UnknownReport(String),
    #[error("no correction item found for '{0}'")]
    UnknownCorrection(String),
    #[error("correction request contains no items")]
    EmptyCorrectionRequest,
    #[error("save request contains no fields")]
    EmptySaveRequest,
    #[error("role '{role}' may not edit field '{field}' in the current status")]
    FieldNotEditable { role: Role, field: String },
    #[error("invalid draft: {0}")]
    InvalidDraft(&'static str),
}

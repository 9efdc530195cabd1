//! Electronic-signature gate for confirmation-required transitions
//!
//! A fixed set of (role, target status) pairs requires an explicit reason and
//! a re-entered credential before the transition is applied. The gate does
//! not validate the credential (that is the authentication collaborator's
//! job); it enforces presence, and fingerprints the credential into the
//! audit trail so the clear text is never stored. Enforcement here sits in
//! the service path, so a UI-side check is never the only barrier.

use super::error::WorkflowError;
use super::report::{ReportStatus, Role};

/// Which (role, target status) pairs need sign-off. Approval and the final
/// lock are the gated steps for every role allowed to reach them.
pub fn requires_confirmation(role: Role, to: ReportStatus) -> bool {
    matches!(to, ReportStatus::Approved | ReportStatus::Locked)
        && matches!(
            role,
            Role::QualityAssurance | Role::Administrator | Role::SystemAdministrator
        )
}

/// Checks the gate for a transition. Returns the credential's sha256
/// fingerprint when the gate applies, `None` when it does not.
pub fn check(
    role: Role,
    to: ReportStatus,
    reason: Option<&str>,
    credential: Option<&str>,
) -> Result<Option<String>, WorkflowError> {
    if !requires_confirmation(role, to) {
        return Ok(None);
    }

    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    let credential = credential.map(str::trim).filter(|c| !c.is_empty());

    match (reason, credential) {
        (Some(_), Some(credential)) => Ok(Some(sha256::digest(credential))),
        _ => Err(WorkflowError::MissingESignCredential),
    }
}

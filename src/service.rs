//! Service layer API for report workflow operations
//!
//! Every operation is synchronous request/response: validate against the
//! transition tables, apply under the optimistic guard, and only after the
//! commit hand the transition to the notifier. The request structs mirror
//! the transport-level endpoint bodies one-to-one.

use super::correction::CorrectionItem;
use super::error::WorkflowError;
use super::esign;
use super::graph::TransitionGraph;
use super::notify::Notifier;
use super::permission;
use super::report::{Report, ReportDraft, ReportStatus, Role, TimeStamp, TransitionEvent};
use super::store::ReportStore;
use super::utils;
use sled::Db;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Body of `PATCH /{reports}/{id}/status`.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub status: ReportStatus,
    pub reason: Option<String>,
    pub expected_version: u64,
    pub esign_credential: Option<String>,
}

/// Body of `PATCH /{reports}/{id}/fields`.
#[derive(Debug, Clone)]
pub struct SaveFieldsRequest {
    pub fields: BTreeMap<String, String>,
    pub expected_version: u64,
}

#[derive(Debug, Clone)]
pub struct CorrectionEntry {
    pub field_key: String,
    pub message: String,
}

/// Body of `POST /{reports}/{id}/corrections`.
#[derive(Debug, Clone)]
pub struct CorrectionRequest {
    pub items: Vec<CorrectionEntry>,
    pub target_status: ReportStatus,
    pub reason: Option<String>,
    pub expected_version: u64,
}

/// Body of `PATCH /{reports}/{id}/corrections/{correction_id}`.
#[derive(Debug, Clone, Default)]
pub struct ResolveCorrectionRequest {
    pub resolution_note: Option<String>,
    pub expected_version: u64,
}

pub struct ReportService {
    store: ReportStore,
    graph: &'static TransitionGraph,
    notifier: Notifier,
}

impl ReportService {
    pub fn new(instance: Arc<Db>, notifier: Notifier) -> Self {
        Self {
            store: ReportStore::new(instance),
            graph: TransitionGraph::shared(),
            notifier,
        }
    }

    /// Create a new report record in `Draft` at version 0.
    pub fn create_report(&self, draft: ReportDraft) -> anyhow::Result<Report> {
        let report = draft.build()?;
        self.store.insert_new(&report)?;
        Ok(report)
    }

    pub fn load_report(&self, report_id: &str) -> anyhow::Result<Report> {
        self.store.load(report_id)
    }

    /// Save field values. Each field must be editable by the caller in the
    /// report's current status; any rejected field aborts the whole save.
    /// An empty field map is rejected rather than committed as an empty
    /// version bump.
    pub fn save_fields(
        &self,
        report_id: &str,
        caller: Role,
        request: SaveFieldsRequest,
    ) -> anyhow::Result<Report> {
        self.store
            .commit(report_id, request.expected_version, |report| {
                if request.fields.is_empty() {
                    return Err(WorkflowError::EmptySaveRequest.into());
                }
                for (field, value) in &request.fields {
                    if !permission::can_edit_field(caller, report.report_type, report.status, field)
                    {
                        return Err(WorkflowError::FieldNotEditable {
                            role: caller,
                            field: field.clone(),
                        }
                        .into());
                    }
                    report.fields.insert(field.clone(), value.clone());
                }
                Ok(())
            })
    }

    /// Advance the report to a new status. Checks run in order: terminal,
    /// structural legality, trigger authority, e-sign gate; all before the
    /// commit, so a rejection leaves nothing behind. Notification dispatch
    /// happens strictly after the commit and cannot fail it.
    pub fn transition_status(
        &self,
        report_id: &str,
        caller: Role,
        request: TransitionRequest,
    ) -> anyhow::Result<Report> {
        let graph = self.graph;
        let committed = self
            .store
            .commit(report_id, request.expected_version, |report| {
                let from = report.status;
                Self::check_transition(graph, report, caller, request.status)?;
                let esign_digest = esign::check(
                    caller,
                    request.status,
                    request.reason.as_deref(),
                    request.esign_credential.as_deref(),
                )?;

                report.history.push(TransitionEvent {
                    from,
                    to: request.status,
                    role: caller,
                    at: TimeStamp::new(),
                    reason: request.reason.clone(),
                    esign_digest,
                });
                report.status = request.status;
                Ok(())
            })?;

        self.notify_last_transition(&committed);
        Ok(committed)
    }

    /// Atomic correction request: one open item per flagged field (with the
    /// field's current value snapshotted for audit) plus the transition into
    /// the needs-correction status, in a single commit. On any rejection no
    /// item exists and the status is unchanged.
    pub fn request_corrections(
        &self,
        report_id: &str,
        caller: Role,
        request: CorrectionRequest,
    ) -> anyhow::Result<Report> {
        let graph = self.graph;
        let committed = self
            .store
            .commit(report_id, request.expected_version, |report| {
                if request.items.is_empty() {
                    return Err(WorkflowError::EmptyCorrectionRequest.into());
                }
                if !TransitionGraph::is_needs_correction_target(request.target_status) {
                    return Err(WorkflowError::IllegalTransition {
                        from: report.status,
                        to: request.target_status,
                    }
                    .into());
                }
                let from = report.status;
                Self::check_transition(graph, report, caller, request.target_status)?;

                for entry in &request.items {
                    let old_value = report.fields.get(&entry.field_key).cloned();
                    report.corrections.push(CorrectionItem::open(
                        utils::new_correction_id()?,
                        entry.field_key.clone(),
                        entry.message.clone(),
                        caller,
                        old_value,
                    ));
                }
                report.history.push(TransitionEvent {
                    from,
                    to: request.target_status,
                    role: caller,
                    at: TimeStamp::new(),
                    reason: request.reason.clone(),
                    esign_digest: None,
                });
                report.status = request.target_status;
                Ok(())
            })?;

        self.notify_last_transition(&committed);
        Ok(committed)
    }

    /// Resolve a single correction item. The caller must hold edit rights on
    /// the item's field in the report's *current* status. Resolving an
    /// already-resolved item succeeds without another version bump.
    pub fn resolve_correction(
        &self,
        report_id: &str,
        correction_id: &str,
        caller: Role,
        request: ResolveCorrectionRequest,
    ) -> anyhow::Result<Report> {
        let current = self.store.load(report_id)?;
        let item = current
            .corrections
            .iter()
            .find(|item| item.id == correction_id)
            .ok_or_else(|| WorkflowError::UnknownCorrection(correction_id.to_string()))?;
        if !item.is_open() {
            return Ok(current);
        }

        self.store
            .commit(report_id, request.expected_version, |report| {
                let report_type = report.report_type;
                let status = report.status;
                let item = report
                    .corrections
                    .iter_mut()
                    .find(|item| item.id == correction_id)
                    .ok_or_else(|| WorkflowError::UnknownCorrection(correction_id.to_string()))?;
                if !permission::can_edit_field(caller, report_type, status, &item.field_key) {
                    return Err(WorkflowError::FieldNotEditable {
                        role: caller,
                        field: item.field_key.clone(),
                    }
                    .into());
                }
                item.resolve(caller, request.resolution_note.clone());
                Ok(())
            })
    }

    /// Bulk resolution: every open item in one commit, one version bump.
    /// The caller must hold edit rights on every flagged field; a single
    /// non-editable field aborts the whole batch. No open items is a no-op
    /// success without a version bump.
    pub fn resolve_all_corrections(
        &self,
        report_id: &str,
        caller: Role,
        request: ResolveCorrectionRequest,
    ) -> anyhow::Result<Report> {
        let current = self.store.load(report_id)?;
        if current.open_corrections().is_empty() {
            return Ok(current);
        }

        self.store
            .commit(report_id, request.expected_version, |report| {
                let report_type = report.report_type;
                let status = report.status;
                for item in report.corrections.iter_mut().filter(|item| item.is_open()) {
                    if !permission::can_edit_field(caller, report_type, status, &item.field_key) {
                        return Err(WorkflowError::FieldNotEditable {
                            role: caller,
                            field: item.field_key.clone(),
                        }
                        .into());
                    }
                    item.resolve(caller, request.resolution_note.clone());
                }
                Ok(())
            })
    }

    /// Items still flagged. The authoritative signal of unresolved feedback;
    /// an empty result does not advance the report by itself.
    pub fn open_corrections(&self, report_id: &str) -> anyhow::Result<Vec<CorrectionItem>> {
        let report = self.store.load(report_id)?;
        Ok(report
            .corrections
            .into_iter()
            .filter(CorrectionItem::is_open)
            .collect())
    }

    /// All items, open and resolved, for the audit display.
    pub fn corrections(&self, report_id: &str) -> anyhow::Result<Vec<CorrectionItem>> {
        Ok(self.store.load(report_id)?.corrections)
    }

    fn check_transition(
        graph: &TransitionGraph,
        report: &Report,
        caller: Role,
        to: ReportStatus,
    ) -> Result<(), WorkflowError> {
        let from = report.status;
        if graph.is_terminal(report.report_type, from) {
            return Err(WorkflowError::WorkflowTerminal(from));
        }
        if !graph.is_legal_transition(report.report_type, from, to) {
            return Err(WorkflowError::IllegalTransition { from, to });
        }
        if !graph.can_trigger(report.report_type, from, caller) {
            return Err(WorkflowError::Unauthorized {
                role: caller,
                action: format!("move a {} report out of '{from}'", report.report_type),
            });
        }
        Ok(())
    }

    fn notify_last_transition(&self, report: &Report) {
        if let Some(event) = report.history.last() {
            self.notifier.notify_transition(report, event.from, event.to);
        }
    }
}

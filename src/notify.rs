//! Recipient resolution and notification routing
//!
//! A status change either travels client to lab (the department mailbox for
//! the report type hears about it) or lab to client (the client's configured
//! recipients hear about it). The routing table is keyed by (report type,
//! target status); pairs missing from it intentionally produce no
//! notification. Delivery is best effort: an empty recipient list or a
//! failing sink is logged and never unwinds the committed transition.

use super::dispatch::NotificationSink;
use super::report::{Report, ReportStatus, ReportType};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-client notification configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    /// Notify the client's active portal users.
    UsersOnly,
    /// Notify an explicit address list.
    CustomOnly,
    /// Union of both, deduplicated case-insensitively. The default.
    UsersPlusCustom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNotificationEmail {
    pub client_code: String,
    pub email: String,
    pub active: bool,
}

/// External storage collaborator for client contact configuration.
pub trait ClientDirectory: Send + Sync {
    fn notify_mode(&self, client_code: &str) -> Option<NotifyMode>;
    /// Email addresses of active portal users tied to the client code.
    fn active_user_emails(&self, client_code: &str) -> Vec<String>;
    /// The client's explicit notification address rows, active or not.
    fn notification_emails(&self, client_code: &str) -> Vec<ClientNotificationEmail>;
}

/// In-memory directory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryClientDirectory {
    modes: std::sync::RwLock<BTreeMap<String, NotifyMode>>,
    users: std::sync::RwLock<BTreeMap<String, Vec<String>>>,
    custom: std::sync::RwLock<BTreeMap<String, Vec<ClientNotificationEmail>>>,
}

impl InMemoryClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_mode(&self, client_code: &str, mode: NotifyMode) {
        self.modes.write().unwrap().insert(client_code.to_string(), mode);
    }
    pub fn add_user_email(&self, client_code: &str, email: &str) {
        self.users
            .write()
            .unwrap()
            .entry(client_code.to_string())
            .or_default()
            .push(email.to_string());
    }
    pub fn add_notification_email(&self, client_code: &str, email: &str, active: bool) {
        self.custom
            .write()
            .unwrap()
            .entry(client_code.to_string())
            .or_default()
            .push(ClientNotificationEmail {
                client_code: client_code.to_string(),
                email: email.to_string(),
                active,
            });
    }
}

impl ClientDirectory for InMemoryClientDirectory {
    fn notify_mode(&self, client_code: &str) -> Option<NotifyMode> {
        self.modes.read().unwrap().get(client_code).copied()
    }
    fn active_user_emails(&self, client_code: &str) -> Vec<String> {
        self.users.read().unwrap().get(client_code).cloned().unwrap_or_default()
    }
    fn notification_emails(&self, client_code: &str) -> Vec<ClientNotificationEmail> {
        self.custom.read().unwrap().get(client_code).cloned().unwrap_or_default()
    }
}

/// Resolves the client-side recipient list for a client code. Never fails;
/// an empty result means "skip the notification and log a warning".
pub struct RecipientResolver {
    directory: Arc<dyn ClientDirectory>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn ClientDirectory>) -> Self {
        Self { directory }
    }

    pub fn resolve(&self, client_code: &str) -> Vec<String> {
        let mode = self
            .directory
            .notify_mode(client_code)
            .unwrap_or(NotifyMode::UsersPlusCustom);

        let mut candidates = vec![];
        if mode != NotifyMode::CustomOnly {
            candidates.extend(self.directory.active_user_emails(client_code));
        }
        if mode != NotifyMode::UsersOnly {
            candidates.extend(
                self.directory
                    .notification_emails(client_code)
                    .into_iter()
                    .filter(|entry| entry.active)
                    .map(|entry| entry.email),
            );
        }

        let mut recipients: Vec<String> = vec![];
        for candidate in candidates {
            let email = candidate.trim().to_lowercase();
            if email.contains('@') && !recipients.contains(&email) {
                recipients.push(email);
            }
        }
        recipients
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToLab,
    LabToClient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub direction: Direction,
    pub title: &'static str,
    pub tag: &'static str,
}

impl RoutingDecision {
    const fn new(direction: Direction, title: &'static str, tag: &'static str) -> Self {
        Self { direction, title, tag }
    }
}

/// The routing table. `from` is part of the contract but today every routed
/// row keys on the target status alone.
pub fn route(
    report_type: ReportType,
    _from: ReportStatus,
    to: ReportStatus,
) -> Option<RoutingDecision> {
    use Direction::*;
    use ReportStatus::*;

    match (report_type, to) {
        (_, SubmittedByClient) => Some(RoutingDecision::new(
            ClientToLab,
            "New report submitted",
            "report-submitted",
        )),
        (_, Resubmitted) => Some(RoutingDecision::new(
            ClientToLab,
            "Report resubmitted after correction",
            "report-resubmitted",
        )),
        // certificates bounce QA corrections back to the client; for tested
        // reports the bench reworks them, so the department is the recipient
        (ReportType::CertificateOfAnalysis, QaNeedsCorrection) => Some(RoutingDecision::new(
            LabToClient,
            "Report needs correction",
            "needs-correction",
        )),
        (_, QaNeedsCorrection) => Some(RoutingDecision::new(
            ClientToLab,
            "QA returned a report for rework",
            "qa-needs-correction",
        )),
        (_, TestingNeedsCorrection) => Some(RoutingDecision::new(
            LabToClient,
            "Report needs correction",
            "needs-correction",
        )),
        (_, FinalNeedsCorrection) => Some(RoutingDecision::new(
            ClientToLab,
            "Final review returned a report for rework",
            "final-needs-correction",
        )),
        (_, PreliminaryApproved) => Some(RoutingDecision::new(
            LabToClient,
            "Preliminary result available",
            "preliminary-ready",
        )),
        (_, Approved) => Some(RoutingDecision::new(
            LabToClient,
            "Report approved",
            "report-approved",
        )),
        // draft, the review stations and the final lock are silent
        _ => None,
    }
}

/// Department mailboxes for client-to-lab notices, with a lab-wide fallback.
#[derive(Debug, Clone)]
pub struct DepartmentMailboxes {
    pub chemistry: Option<String>,
    pub microbiology: Option<String>,
    pub lab_wide: String,
}

impl DepartmentMailboxes {
    pub fn new(lab_wide: &str) -> Self {
        Self {
            chemistry: None,
            microbiology: None,
            lab_wide: lab_wide.to_string(),
        }
    }
    pub fn with_chemistry(mut self, mailbox: &str) -> Self {
        self.chemistry = Some(mailbox.to_string());
        self
    }
    pub fn with_microbiology(mut self, mailbox: &str) -> Self {
        self.microbiology = Some(mailbox.to_string());
        self
    }

    /// Sterility sits with the micro bench; certificates have no bench and
    /// go to the lab-wide address.
    pub fn mailbox(&self, report_type: ReportType) -> String {
        let department = match report_type {
            ReportType::Chemistry => self.chemistry.as_ref(),
            ReportType::Microbiology | ReportType::Sterility => self.microbiology.as_ref(),
            ReportType::CertificateOfAnalysis => None,
        };
        department.unwrap_or(&self.lab_wide).clone()
    }
}

/// The dispatch payload handed to the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub title: String,
    pub lines: Vec<String>,
    pub action_url: Option<String>,
    pub tag: String,
    pub metadata: BTreeMap<String, String>,
}

/// Turns a committed transition into a dispatch, or deliberately into
/// nothing. Sits strictly after the commit; nothing here can fail it.
pub struct Notifier {
    mailboxes: DepartmentMailboxes,
    recipients: RecipientResolver,
    sink: Arc<dyn NotificationSink>,
    portal_base_url: Option<String>,
}

impl Notifier {
    pub fn new(
        mailboxes: DepartmentMailboxes,
        directory: Arc<dyn ClientDirectory>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            mailboxes,
            recipients: RecipientResolver::new(directory),
            sink,
            portal_base_url: None,
        }
    }

    pub fn with_portal_base_url(mut self, base_url: &str) -> Self {
        self.portal_base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn notify_transition(&self, report: &Report, from: ReportStatus, to: ReportStatus) {
        let Some(decision) = route(report.report_type, from, to) else {
            debug!(
                report_id = %report.report_id,
                from = %from,
                to = %to,
                "transition is not routed, staying silent"
            );
            return;
        };

        let recipients = match decision.direction {
            Direction::ClientToLab => vec![self.mailboxes.mailbox(report.report_type)],
            Direction::LabToClient => {
                let resolved = self.recipients.resolve(&report.client_code);
                if resolved.is_empty() {
                    warn!(
                        report_id = %report.report_id,
                        client_code = %report.client_code,
                        tag = decision.tag,
                        "no eligible recipients, skipping notification"
                    );
                    return;
                }
                resolved
            }
        };

        let message = self.build_message(report, from, to, &decision, recipients);
        if let Err(err) = self.sink.send(&message) {
            warn!(
                report_id = %report.report_id,
                tag = decision.tag,
                error = %err,
                "notification dispatch failed"
            );
        }
    }

    fn build_message(
        &self,
        report: &Report,
        from: ReportStatus,
        to: ReportStatus,
        decision: &RoutingDecision,
        recipients: Vec<String>,
    ) -> NotificationMessage {
        let metadata = BTreeMap::from([
            ("report_id".to_string(), report.report_id.clone()),
            ("report_type".to_string(), report.report_type.to_string()),
            ("client_code".to_string(), report.client_code.clone()),
            ("from_status".to_string(), from.to_string()),
            ("to_status".to_string(), to.to_string()),
        ]);

        NotificationMessage {
            to: recipients,
            subject: format!("{} ({})", decision.title, report.display_number()),
            title: decision.title.to_string(),
            lines: vec![
                format!("Report: {}", report.display_number()),
                format!("Client: {}", report.client_code),
                format!("Status changed from '{from}' to '{to}'."),
            ],
            action_url: self
                .portal_base_url
                .as_ref()
                .map(|base| format!("{base}/reports/{}", report.report_id)),
            tag: decision.tag.to_string(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with(code: &str) -> InMemoryClientDirectory {
        let directory = InMemoryClientDirectory::new();
        directory.add_user_email(code, "A@x.com");
        directory.add_notification_email(code, "a@x.com", true);
        directory.add_notification_email(code, "b@x.com", true);
        directory.add_notification_email(code, "dead@x.com", false);
        directory
    }

    #[test]
    fn custom_only_never_includes_portal_users() {
        let directory = directory_with("CL-7");
        directory.set_mode("CL-7", NotifyMode::CustomOnly);
        let resolved = RecipientResolver::new(Arc::new(directory)).resolve("CL-7");
        assert_eq!(resolved, vec!["a@x.com".to_string(), "b@x.com".to_string()]);
    }

    #[test]
    fn users_only_never_includes_custom_addresses() {
        let directory = directory_with("CL-7");
        directory.set_mode("CL-7", NotifyMode::UsersOnly);
        let resolved = RecipientResolver::new(Arc::new(directory)).resolve("CL-7");
        assert_eq!(resolved, vec!["a@x.com".to_string()]);
    }

    #[test]
    fn default_mode_unions_and_dedupes_case_insensitively() {
        // no mode configured: defaults to users-plus-custom
        let directory = directory_with("CL-7");
        let resolved = RecipientResolver::new(Arc::new(directory)).resolve("CL-7");
        assert_eq!(resolved, vec!["a@x.com".to_string(), "b@x.com".to_string()]);
    }

    #[test]
    fn malformed_addresses_are_dropped_not_fatal() {
        let directory = InMemoryClientDirectory::new();
        directory.add_notification_email("CL-8", "not-an-email", true);
        directory.add_notification_email("CL-8", "  ok@lab.example  ", true);
        let resolved = RecipientResolver::new(Arc::new(directory)).resolve("CL-8");
        assert_eq!(resolved, vec!["ok@lab.example".to_string()]);
    }

    #[test]
    fn unrouted_transitions_are_silent() {
        assert_eq!(
            route(
                ReportType::Chemistry,
                ReportStatus::SubmittedByClient,
                ReportStatus::UnderTestingReview,
            ),
            None
        );
        assert_eq!(
            route(ReportType::Chemistry, ReportStatus::Approved, ReportStatus::Locked),
            None
        );
    }

    #[test]
    fn qa_corrections_route_by_report_type() {
        let lab_bound = route(
            ReportType::Chemistry,
            ReportStatus::UnderQaReview,
            ReportStatus::QaNeedsCorrection,
        )
        .unwrap();
        assert_eq!(lab_bound.direction, Direction::ClientToLab);

        let client_bound = route(
            ReportType::CertificateOfAnalysis,
            ReportStatus::UnderQaReview,
            ReportStatus::QaNeedsCorrection,
        )
        .unwrap();
        assert_eq!(client_bound.direction, Direction::LabToClient);
    }

    #[test]
    fn final_review_bounces_go_back_to_the_bench() {
        let decision = route(
            ReportType::Sterility,
            ReportStatus::UnderFinalReview,
            ReportStatus::FinalNeedsCorrection,
        )
        .unwrap();
        assert_eq!(decision.direction, Direction::ClientToLab);
        assert_eq!(decision.tag, "final-needs-correction");
    }

    #[test]
    fn department_mailboxes_fall_back_to_lab_wide() {
        let mailboxes = DepartmentMailboxes::new("lab@lab.example")
            .with_microbiology("micro@lab.example");

        assert_eq!(mailboxes.mailbox(ReportType::Microbiology), "micro@lab.example");
        assert_eq!(mailboxes.mailbox(ReportType::Sterility), "micro@lab.example");
        // chemistry mailbox unset
        assert_eq!(mailboxes.mailbox(ReportType::Chemistry), "lab@lab.example");
        assert_eq!(
            mailboxes.mailbox(ReportType::CertificateOfAnalysis),
            "lab@lab.example"
        );
    }
}

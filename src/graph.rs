//! Per-report-type status transition tables
//!
//! Each report type carries a fixed table: for every status it uses, which
//! roles may trigger a transition out of it, which statuses it may move to,
//! and which roles may edit fields while the report sits in it. The tables
//! are plain data, built once and validated for closure (no `next_states`
//! entry may name a status without its own rule).

use super::report::{ReportStatus, ReportType, Role};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use ReportStatus::*;
use Role::*;

#[derive(Debug, Clone)]
pub struct TransitionRule {
    pub can_trigger: Vec<Role>,
    pub next_states: Vec<ReportStatus>,
    pub editable_by: Vec<Role>,
}

impl TransitionRule {
    fn new(can_trigger: &[Role], next_states: &[ReportStatus], editable_by: &[Role]) -> Self {
        Self {
            can_trigger: can_trigger.to_vec(),
            next_states: next_states.to_vec(),
            editable_by: editable_by.to_vec(),
        }
    }
}

#[derive(Debug)]
pub struct TransitionGraph {
    rules: BTreeMap<ReportType, BTreeMap<ReportStatus, TransitionRule>>,
}

static GRAPH: OnceLock<TransitionGraph> = OnceLock::new();

const ADMINS: [Role; 2] = [SystemAdministrator, Administrator];

fn with_admins(roles: &[Role]) -> Vec<Role> {
    let mut all = roles.to_vec();
    all.extend_from_slice(&ADMINS);
    all
}

impl TransitionGraph {
    /// The workflow tables, validated once. Panics on a malformed table,
    /// which is a programming error, not a user-facing condition.
    pub fn shared() -> &'static TransitionGraph {
        GRAPH.get_or_init(|| {
            let graph = TransitionGraph::standard();
            if let Err(violation) = graph.validate() {
                panic!("workflow table invariant violated: {violation}");
            }
            graph
        })
    }

    pub fn standard() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(ReportType::Chemistry, Self::testing_pipeline(ChemistryTester));
        rules.insert(ReportType::Microbiology, Self::testing_pipeline(MicroTester));
        rules.insert(ReportType::Sterility, Self::sterility_pipeline());
        rules.insert(ReportType::CertificateOfAnalysis, Self::certificate_pipeline());
        Self { rules }
    }

    /// Chemistry and microbiological reports share one pipeline shape; only
    /// the department tester role differs.
    fn testing_pipeline(tester: Role) -> BTreeMap<ReportStatus, TransitionRule> {
        BTreeMap::from([
            (
                Draft,
                TransitionRule::new(
                    &with_admins(&[Client, FrontDesk]),
                    &[SubmittedByClient],
                    &with_admins(&[Client, FrontDesk]),
                ),
            ),
            (
                SubmittedByClient,
                TransitionRule::new(
                    &with_admins(&[FrontDesk]),
                    &[UnderTestingReview],
                    &with_admins(&[FrontDesk]),
                ),
            ),
            (
                UnderTestingReview,
                TransitionRule::new(
                    &with_admins(&[tester]),
                    &[TestingNeedsCorrection, UnderQaReview],
                    &with_admins(&[tester]),
                ),
            ),
            (
                TestingNeedsCorrection,
                TransitionRule::new(
                    &with_admins(&[Client, FrontDesk]),
                    &[Resubmitted],
                    &with_admins(&[Client, FrontDesk]),
                ),
            ),
            (
                Resubmitted,
                TransitionRule::new(
                    &with_admins(&[tester]),
                    &[UnderTestingReview],
                    &with_admins(&[tester]),
                ),
            ),
            (
                UnderQaReview,
                TransitionRule::new(
                    &with_admins(&[QualityAssurance]),
                    &[QaNeedsCorrection, Approved],
                    &with_admins(&[QualityAssurance]),
                ),
            ),
            (
                QaNeedsCorrection,
                TransitionRule::new(
                    &with_admins(&[tester]),
                    &[UnderTestingReview],
                    &with_admins(&[tester]),
                ),
            ),
            // QA may trigger the lock without holding field-edit rights here;
            // triggering authority and edit authority are independent axes.
            (
                Approved,
                TransitionRule::new(&with_admins(&[QualityAssurance]), &[Locked], &ADMINS),
            ),
            (Locked, TransitionRule::new(&[], &[], &[])),
        ])
    }

    /// Sterility runs a two-phase review: a preliminary result goes out to
    /// the client before the final QA cycle begins.
    fn sterility_pipeline() -> BTreeMap<ReportStatus, TransitionRule> {
        let mut table = Self::testing_pipeline(MicroTester);
        table.insert(
            UnderTestingReview,
            TransitionRule::new(
                &with_admins(&[MicroTester]),
                &[TestingNeedsCorrection, PreliminaryApproved],
                &with_admins(&[MicroTester]),
            ),
        );
        table.insert(
            PreliminaryApproved,
            TransitionRule::new(
                &with_admins(&[QualityAssurance]),
                &[UnderFinalReview],
                &with_admins(&[QualityAssurance]),
            ),
        );
        table.insert(
            UnderFinalReview,
            TransitionRule::new(
                &with_admins(&[QualityAssurance]),
                &[FinalNeedsCorrection, Approved],
                &with_admins(&[QualityAssurance]),
            ),
        );
        table.insert(
            FinalNeedsCorrection,
            TransitionRule::new(
                &with_admins(&[MicroTester]),
                &[UnderFinalReview],
                &with_admins(&[MicroTester]),
            ),
        );
        // the QA review statuses of the shared pipeline are unreachable here
        table.remove(&UnderQaReview);
        table.remove(&QaNeedsCorrection);
        table
    }

    /// Certificates skip the testing bench entirely: front desk hands them
    /// straight to QA, and approval is terminal (no lock phase).
    fn certificate_pipeline() -> BTreeMap<ReportStatus, TransitionRule> {
        BTreeMap::from([
            (
                Draft,
                TransitionRule::new(
                    &with_admins(&[Client, FrontDesk]),
                    &[SubmittedByClient],
                    &with_admins(&[Client, FrontDesk]),
                ),
            ),
            (
                SubmittedByClient,
                TransitionRule::new(
                    &with_admins(&[FrontDesk]),
                    &[UnderQaReview],
                    &with_admins(&[FrontDesk]),
                ),
            ),
            (
                UnderQaReview,
                TransitionRule::new(
                    &with_admins(&[QualityAssurance]),
                    &[QaNeedsCorrection, Approved],
                    &with_admins(&[QualityAssurance]),
                ),
            ),
            (
                QaNeedsCorrection,
                TransitionRule::new(
                    &with_admins(&[Client, FrontDesk]),
                    &[Resubmitted],
                    &with_admins(&[Client, FrontDesk]),
                ),
            ),
            (
                Resubmitted,
                TransitionRule::new(
                    &with_admins(&[FrontDesk]),
                    &[UnderQaReview],
                    &with_admins(&[FrontDesk]),
                ),
            ),
            (Approved, TransitionRule::new(&[], &[], &[])),
        ])
    }

    /// Table closure check: every status reachable from Draft has a rule and
    /// every `next_states` entry names a status with its own rule.
    pub fn validate(&self) -> Result<(), String> {
        for (report_type, table) in &self.rules {
            if !table.contains_key(&Draft) {
                return Err(format!("{report_type}: no rule for draft"));
            }
            for (status, rule) in table {
                for next in &rule.next_states {
                    if !table.contains_key(next) {
                        return Err(format!(
                            "{report_type}: '{status}' names dangling next state '{next}'"
                        ));
                    }
                }
            }

            // walk from Draft so unreachable rule entries are also flagged
            let mut seen = BTreeSet::from([Draft]);
            let mut frontier = vec![Draft];
            while let Some(status) = frontier.pop() {
                for next in &table[&status].next_states {
                    if seen.insert(*next) {
                        frontier.push(*next);
                    }
                }
            }
            for status in table.keys() {
                if !seen.contains(status) {
                    return Err(format!(
                        "{report_type}: rule for '{status}' is unreachable from draft"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Rule lookup. A status with no entry for the given report type is a
    /// programming error, so this panics rather than returning an error.
    pub fn rule(&self, report_type: ReportType, status: ReportStatus) -> &TransitionRule {
        self.rules
            .get(&report_type)
            .and_then(|table| table.get(&status))
            .unwrap_or_else(|| {
                panic!("no transition rule for report type '{report_type}' in status '{status}'")
            })
    }

    pub fn is_legal_transition(
        &self,
        report_type: ReportType,
        from: ReportStatus,
        to: ReportStatus,
    ) -> bool {
        self.rule(report_type, from).next_states.contains(&to)
    }

    pub fn can_trigger(&self, report_type: ReportType, from: ReportStatus, role: Role) -> bool {
        self.rule(report_type, from).can_trigger.contains(&role)
    }

    pub fn editable_roles(&self, report_type: ReportType, status: ReportStatus) -> &[Role] {
        &self.rule(report_type, status).editable_by
    }

    pub fn is_terminal(&self, report_type: ReportType, status: ReportStatus) -> bool {
        self.rule(report_type, status).next_states.is_empty()
    }

    /// The needs-correction-class statuses a correction request may target.
    pub fn is_needs_correction_target(to: ReportStatus) -> bool {
        matches!(
            to,
            TestingNeedsCorrection | QaNeedsCorrection | FinalNeedsCorrection
        )
    }

    /// Statuses the given report type has rules for, in table order.
    pub fn statuses_for(&self, report_type: ReportType) -> Vec<ReportStatus> {
        self.rules
            .get(&report_type)
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default()
    }
}

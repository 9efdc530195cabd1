//! Core report record, roles, statuses and timestamps
use super::correction::CorrectionItem;
use super::error::WorkflowError;
use super::utils;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of actors in the approval pipeline. Immutable per session.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum Role {
    #[n(0)]
    SystemAdministrator,
    #[n(1)]
    Administrator,
    #[n(2)]
    FrontDesk,
    #[n(3)]
    ChemistryTester,
    #[n(4)]
    MicroTester,
    #[n(5)]
    QualityAssurance,
    #[n(6)]
    Client,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::SystemAdministrator,
        Role::Administrator,
        Role::FrontDesk,
        Role::ChemistryTester,
        Role::MicroTester,
        Role::QualityAssurance,
        Role::Client,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SystemAdministrator => "system_administrator",
            Role::Administrator => "administrator",
            Role::FrontDesk => "front_desk",
            Role::ChemistryTester => "chemistry_tester",
            Role::MicroTester => "micro_tester",
            Role::QualityAssurance => "quality_assurance",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum ReportType {
    #[n(0)]
    Chemistry,
    #[n(1)]
    Microbiology,
    #[n(2)]
    Sterility,
    #[n(3)]
    CertificateOfAnalysis,
}

impl ReportType {
    pub const ALL: [ReportType; 4] = [
        ReportType::Chemistry,
        ReportType::Microbiology,
        ReportType::Sterility,
        ReportType::CertificateOfAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Chemistry => "chemistry",
            ReportType::Microbiology => "microbiology",
            ReportType::Sterility => "sterility",
            ReportType::CertificateOfAnalysis => "certificate_of_analysis",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One shared status enum across report types; which statuses a given type
/// actually uses is defined by its transition table.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum ReportStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    SubmittedByClient,
    #[n(2)]
    UnderTestingReview,
    #[n(3)]
    TestingNeedsCorrection,
    #[n(4)]
    Resubmitted,
    #[n(5)]
    UnderQaReview,
    #[n(6)]
    QaNeedsCorrection,
    #[n(7)]
    PreliminaryApproved,
    #[n(8)]
    UnderFinalReview,
    #[n(9)]
    FinalNeedsCorrection,
    #[n(10)]
    Approved,
    #[n(11)]
    Locked,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 12] = [
        ReportStatus::Draft,
        ReportStatus::SubmittedByClient,
        ReportStatus::UnderTestingReview,
        ReportStatus::TestingNeedsCorrection,
        ReportStatus::Resubmitted,
        ReportStatus::UnderQaReview,
        ReportStatus::QaNeedsCorrection,
        ReportStatus::PreliminaryApproved,
        ReportStatus::UnderFinalReview,
        ReportStatus::FinalNeedsCorrection,
        ReportStatus::Approved,
        ReportStatus::Locked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::SubmittedByClient => "submitted_by_client",
            ReportStatus::UnderTestingReview => "under_testing_review",
            ReportStatus::TestingNeedsCorrection => "testing_needs_correction",
            ReportStatus::Resubmitted => "resubmitted",
            ReportStatus::UnderQaReview => "under_qa_review",
            ReportStatus::QaNeedsCorrection => "qa_needs_correction",
            ReportStatus::PreliminaryApproved => "preliminary_approved",
            ReportStatus::UnderFinalReview => "under_final_review",
            ReportStatus::FinalNeedsCorrection => "final_needs_correction",
            ReportStatus::Approved => "approved",
            ReportStatus::Locked => "locked",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Audit trail entry, appended on every successful status transition.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct TransitionEvent {
    #[n(0)]
    pub from: ReportStatus,
    #[n(1)]
    pub to: ReportStatus,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub at: TimeStamp<Utc>,
    #[n(4)]
    pub reason: Option<String>,
    // sha256 fingerprint of the re-entered credential; never the credential itself
    #[n(5)]
    pub esign_digest: Option<String>,
}

/// The persisted report record. One sled entry per report, keyed by `report_id`.
/// Corrections and history live inside the record so that a correction request
/// and its status transition commit as a single compare-and-swap write.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Report {
    #[n(0)]
    pub report_id: String, // uuid7, bech32 encoded with a "report_" prefix
    #[n(1)]
    pub report_type: ReportType,
    #[n(2)]
    pub client_code: String,
    #[n(3)]
    pub status: ReportStatus,
    #[n(4)]
    pub version: u64,
    #[n(5)]
    pub fields: BTreeMap<String, String>,
    #[n(6)]
    pub corrections: Vec<CorrectionItem>,
    #[n(7)]
    pub history: Vec<TransitionEvent>,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
    #[n(9)]
    pub updated_at: TimeStamp<Utc>,
}

impl Report {
    /// Front desk assigns the report number as an ordinary field.
    pub fn report_number(&self) -> Option<&str> {
        self.fields.get("report_number").map(String::as_str)
    }

    /// Human-facing reference for messages: the assigned number if present,
    /// otherwise the internal id.
    pub fn display_number(&self) -> &str {
        self.report_number().unwrap_or(&self.report_id)
    }

    pub fn open_corrections(&self) -> Vec<&CorrectionItem> {
        self.corrections.iter().filter(|c| c.is_open()).collect()
    }
}

/// Builder for new report records, the basis for a draft.
#[derive(Debug, Default)]
pub struct ReportDraft {
    report_type: Option<ReportType>,
    client_code: Option<String>,
    fields: BTreeMap<String, String>,
}

impl ReportDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_report_type(mut self, report_type: ReportType) -> Self {
        self.report_type = Some(report_type);
        self
    }
    pub fn set_client_code(mut self, client_code: &str) -> Self {
        self.client_code = Some(client_code.to_string());
        self
    }
    pub fn set_field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    /// Checks required fields and mints the record in `Draft` at version 0.
    pub fn build(self) -> anyhow::Result<Report> {
        let report_type = self
            .report_type
            .ok_or(WorkflowError::InvalidDraft("report type is not set"))?;
        let client_code = self
            .client_code
            .filter(|code| !code.trim().is_empty())
            .ok_or(WorkflowError::InvalidDraft("client code is not set"))?;

        let now = TimeStamp::new();
        Ok(Report {
            report_id: utils::new_report_id()?,
            report_type,
            client_code,
            status: ReportStatus::Draft,
            version: 0,
            fields: self.fields,
            corrections: vec![],
            history: vec![],
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

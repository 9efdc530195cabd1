//! Optimistic-concurrency behavior on a single contended report
//!
//! No locking exists anywhere; racing writers on the same stale version must
//! be linearized by the commit-time compare-and-swap: exactly one succeeds,
//! the other gets a version conflict and changes nothing.

use report_approval::{
    dispatch::NotificationSink,
    error::WorkflowError,
    notify::{DepartmentMailboxes, InMemoryClientDirectory, Notifier, NotificationMessage},
    report::{ReportDraft, ReportStatus, ReportType, Role},
    service::{
        CorrectionEntry, CorrectionRequest, ReportService, SaveFieldsRequest, TransitionRequest,
    },
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

#[derive(Default)]
struct RecordingSink(Mutex<Vec<NotificationMessage>>);

impl NotificationSink for RecordingSink {
    fn send(&self, message: &NotificationMessage) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn service(db_name: &str) -> (tempfile::TempDir, ReportService, Arc<RecordingSink>) {
    let temp_dir = tempdir().unwrap();
    let db = Arc::new(sled::open(temp_dir.path().join(db_name)).unwrap());
    let directory = Arc::new(InMemoryClientDirectory::new());
    directory.add_user_email("CL-3001", "lab-contact@client.example");
    let sink = Arc::new(RecordingSink::default());
    let notifier = Notifier::new(
        DepartmentMailboxes::new("lab@lab.example"),
        directory,
        sink.clone(),
    );
    (temp_dir, ReportService::new(db, notifier), sink)
}

fn transition(status: ReportStatus, expected_version: u64) -> TransitionRequest {
    TransitionRequest {
        status,
        reason: None,
        expected_version,
        esign_credential: None,
    }
}

fn version_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<WorkflowError>(),
        Some(WorkflowError::VersionConflict { .. })
    )
}

/// The reference race: a chemistry report under testing review at version 3,
/// the bench requests two corrections against that version and wins; a
/// second caller still holding version 3 must conflict and change nothing.
#[test]
fn correction_request_wins_the_race_cleanly() -> anyhow::Result<()> {
    let (_guard, service, sink) = service("correction_race.db");

    let report = service.create_report(
        ReportDraft::new()
            .set_report_type(ReportType::Chemistry)
            .set_client_code("CL-3001")
            .set_field("sample_description", "drum 7")
            .set_field("sample_quantity", "unknown"),
    )?;
    let report = service.transition_status(
        &report.report_id,
        Role::Client,
        transition(ReportStatus::SubmittedByClient, 0),
    )?;
    let report = service.transition_status(
        &report.report_id,
        Role::FrontDesk,
        transition(ReportStatus::UnderTestingReview, 1),
    )?;
    let report = service.save_fields(
        &report.report_id,
        Role::ChemistryTester,
        SaveFieldsRequest {
            fields: BTreeMap::from([("test_method".to_string(), "GC-MS".to_string())]),
            expected_version: 2,
        },
    )?;
    assert_eq!(report.version, 3);

    let report = service.request_corrections(
        &report.report_id,
        Role::ChemistryTester,
        CorrectionRequest {
            items: vec![
                CorrectionEntry {
                    field_key: "sample_description".into(),
                    message: "describe the drum contents".into(),
                },
                CorrectionEntry {
                    field_key: "sample_quantity".into(),
                    message: "quantity unknown is not acceptable".into(),
                },
            ],
            target_status: ReportStatus::TestingNeedsCorrection,
            reason: None,
            expected_version: 3,
        },
    )?;
    assert_eq!(report.status, ReportStatus::TestingNeedsCorrection);
    assert_eq!(report.version, 4);
    assert_eq!(report.open_corrections().len(), 2);

    // lab-authored correction request notifies the client side
    {
        let messages = sink.0.lock().unwrap();
        let notice = messages.last().unwrap();
        assert_eq!(notice.tag, "needs-correction");
        assert_eq!(notice.to, vec!["lab-contact@client.example".to_string()]);
    }

    // the loser still holds version 3
    let err = service
        .save_fields(
            &report.report_id,
            Role::ChemistryTester,
            SaveFieldsRequest {
                fields: BTreeMap::from([("analyst_notes".to_string(), "stale".to_string())]),
                expected_version: 3,
            },
        )
        .unwrap_err();
    assert!(version_conflict(&err));

    // unaffected by the loser: version, items, fields
    let unchanged = service.load_report(&report.report_id)?;
    assert_eq!(unchanged.version, 4);
    assert_eq!(unchanged.corrections.len(), 2);
    assert!(!unchanged.fields.contains_key("analyst_notes"));
    Ok(())
}

#[test]
fn stale_correction_request_creates_no_duplicates() -> anyhow::Result<()> {
    let (_guard, service, _sink) = service("stale_corrections.db");

    let report = service.create_report(
        ReportDraft::new()
            .set_report_type(ReportType::Chemistry)
            .set_client_code("CL-3001")
            .set_field("sample_description", "drum 7"),
    )?;
    let report = service.transition_status(
        &report.report_id,
        Role::Client,
        transition(ReportStatus::SubmittedByClient, 0),
    )?;
    let report = service.transition_status(
        &report.report_id,
        Role::FrontDesk,
        transition(ReportStatus::UnderTestingReview, 1),
    )?;

    let request = CorrectionRequest {
        items: vec![CorrectionEntry {
            field_key: "sample_description".into(),
            message: "flagged".into(),
        }],
        target_status: ReportStatus::TestingNeedsCorrection,
        reason: None,
        expected_version: 2,
    };
    service.request_corrections(&report.report_id, Role::ChemistryTester, request.clone())?;

    // replaying the same request against the stale version conflicts and
    // does not duplicate the item
    let err = service
        .request_corrections(&report.report_id, Role::ChemistryTester, request)
        .unwrap_err();
    assert!(version_conflict(&err));
    assert_eq!(service.corrections(&report.report_id)?.len(), 1);
    Ok(())
}

#[test]
fn threaded_writers_racing_on_the_same_version() -> anyhow::Result<()> {
    let (_guard, service, _sink) = service("threaded_race.db");
    let service = Arc::new(service);

    let report = service.create_report(
        ReportDraft::new()
            .set_report_type(ReportType::Chemistry)
            .set_client_code("CL-3001"),
    )?;
    let report_id = report.report_id.clone();

    let mut outcomes = vec![];
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                let report_id = report_id.clone();
                scope.spawn(move || {
                    service.transition_status(
                        &report_id,
                        Role::Client,
                        transition(ReportStatus::SubmittedByClient, 0),
                    )
                })
            })
            .collect();
        for handle in handles {
            outcomes.push(handle.join().unwrap());
        }
    });

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(version_conflict(err));
        }
    }

    // exactly one increment, one history entry
    let settled = service.load_report(&report_id)?;
    assert_eq!(settled.version, 1);
    assert_eq!(settled.status, ReportStatus::SubmittedByClient);
    assert_eq!(settled.history.len(), 1);
    Ok(())
}

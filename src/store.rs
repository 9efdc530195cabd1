//! Report persistence with optimistic-concurrency commits
//!
//! One sled entry per report, CBOR encoded. Every mutation runs through
//! [`ReportStore::commit`]: the caller supplies the version it read, the
//! mutation is applied to a decoded copy, and the write lands through
//! `compare_and_swap` against the exact bytes that were loaded. A stale
//! version or a losing swap surfaces as [`WorkflowError::VersionConflict`]
//! with zero writes, which linearizes racing writers on the same report.

use super::error::WorkflowError;
use super::report::{Report, TimeStamp};
use sled::{Db, IVec};
use std::sync::Arc;

pub struct ReportStore {
    instance: Arc<Db>,
}

impl ReportStore {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    /// Insert a freshly built record. Fails if the id is already taken.
    pub fn insert_new(&self, report: &Report) -> anyhow::Result<()> {
        let bytes = minicbor::to_vec(report)?;
        self.instance
            .compare_and_swap(report.report_id.as_bytes(), None::<&[u8]>, Some(bytes))?
            .map_err(|_| anyhow::anyhow!("report id '{}' already exists", report.report_id))?;
        Ok(())
    }

    pub fn load(&self, report_id: &str) -> anyhow::Result<Report> {
        self.load_raw(report_id).map(|(report, _)| report)
    }

    fn load_raw(&self, report_id: &str) -> anyhow::Result<(Report, IVec)> {
        let bytes = self
            .instance
            .get(report_id.as_bytes())?
            .ok_or_else(|| WorkflowError::UnknownReport(report_id.to_string()))?;
        let report: Report = minicbor::decode(&bytes)?;
        Ok((report, bytes))
    }

    /// Apply a mutation under the optimistic guard. The version check happens
    /// here at the commit point, not at the caller's read, and the swap is
    /// against the loaded bytes, so a writer that raced us in between loses
    /// cleanly. On success the version has moved up by exactly 1.
    pub fn commit<F>(&self, report_id: &str, expected_version: u64, mutate: F) -> anyhow::Result<Report>
    where
        F: FnOnce(&mut Report) -> anyhow::Result<()>,
    {
        let (mut report, old_bytes) = self.load_raw(report_id)?;
        if report.version != expected_version {
            return Err(WorkflowError::VersionConflict {
                expected: expected_version,
                actual: report.version,
            }
            .into());
        }

        mutate(&mut report)?;
        report.version += 1;
        report.updated_at = TimeStamp::new();

        let new_bytes = minicbor::to_vec(&report)?;
        let swap = self
            .instance
            .compare_and_swap(report_id.as_bytes(), Some(&old_bytes), Some(new_bytes))?;
        if swap.is_err() {
            let actual = self.load(report_id).map(|r| r.version).unwrap_or(expected_version);
            return Err(WorkflowError::VersionConflict {
                expected: expected_version,
                actual,
            }
            .into());
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ReportDraft, ReportType};
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, ReportStore) {
        let temp_dir = tempdir().unwrap();
        let db = sled::open(temp_dir.path().join("store_tests.db")).unwrap();
        (temp_dir, ReportStore::new(Arc::new(db)))
    }

    fn draft() -> Report {
        ReportDraft::new()
            .set_report_type(ReportType::Chemistry)
            .set_client_code("CL-0001")
            .build()
            .unwrap()
    }

    #[test]
    fn roundtrip_and_version_bump() {
        let (_guard, store) = store();
        let report = draft();
        store.insert_new(&report).unwrap();

        let committed = store
            .commit(&report.report_id, 0, |r| {
                r.fields.insert("sample_description".into(), "lot 12".into());
                Ok(())
            })
            .unwrap();
        assert_eq!(committed.version, 1);

        let loaded = store.load(&report.report_id).unwrap();
        assert_eq!(loaded, committed);
    }

    #[test]
    fn stale_version_conflicts_without_writes() {
        let (_guard, store) = store();
        let report = draft();
        store.insert_new(&report).unwrap();

        store.commit(&report.report_id, 0, |_| Ok(())).unwrap();

        let err = store
            .commit(&report.report_id, 0, |r| {
                r.fields.insert("should_not".into(), "persist".into());
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::VersionConflict { expected: 0, actual: 1 })
        ));

        let loaded = store.load(&report.report_id).unwrap();
        assert_eq!(loaded.version, 1);
        assert!(!loaded.fields.contains_key("should_not"));
    }

    #[test]
    fn failed_mutation_persists_nothing() {
        let (_guard, store) = store();
        let report = draft();
        store.insert_new(&report).unwrap();

        let err = store
            .commit(&report.report_id, 0, |r| {
                r.fields.insert("partial".into(), "write".into());
                Err(WorkflowError::EmptyCorrectionRequest.into())
            })
            .unwrap_err();
        assert!(err.downcast_ref::<WorkflowError>().is_some());

        let loaded = store.load(&report.report_id).unwrap();
        assert_eq!(loaded.version, 0);
        assert!(loaded.fields.is_empty());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (_guard, store) = store();
        let report = draft();
        store.insert_new(&report).unwrap();
        assert!(store.insert_new(&report).is_err());
    }
}

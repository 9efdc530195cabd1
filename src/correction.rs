//! Per-field correction ledger entries
//!
//! Correction items are created in bulk when a reviewer sends a report into a
//! needs-correction status, one item per flagged field. They are resolved
//! individually by whoever holds edit rights on that field in the report's
//! current status. Resolving every item never advances the report by itself;
//! moving on stays an explicit action by an authorized role.

use super::report::{Role, TimeStamp};
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq)]
pub enum CorrectionStatus {
    #[n(0)]
    Open,
    #[n(1)]
    Resolved,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct CorrectionItem {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded with a "corr_" prefix
    #[n(1)]
    pub field_key: String,
    #[n(2)]
    pub message: String,
    #[n(3)]
    pub status: CorrectionStatus,
    #[n(4)]
    pub requested_by: Role,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    // snapshot of the flagged field at request time, for the audit display
    #[n(6)]
    pub old_value: Option<String>,
    #[n(7)]
    pub resolved_at: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub resolved_by: Option<Role>,
    #[n(9)]
    pub resolution_note: Option<String>,
}

impl CorrectionItem {
    pub fn open(
        id: String,
        field_key: String,
        message: String,
        requested_by: Role,
        old_value: Option<String>,
    ) -> Self {
        Self {
            id,
            field_key,
            message,
            status: CorrectionStatus::Open,
            requested_by,
            created_at: TimeStamp::new(),
            old_value,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == CorrectionStatus::Open
    }

    /// Marks the item resolved. Calling this on an already resolved item is a
    /// no-op so that resolution stays idempotent.
    pub fn resolve(&mut self, resolved_by: Role, resolution_note: Option<String>) {
        if self.status == CorrectionStatus::Resolved {
            return;
        }
        self.status = CorrectionStatus::Resolved;
        self.resolved_at = Some(TimeStamp::new());
        self.resolved_by = Some(resolved_by);
        self.resolution_note = resolution_note;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    #[test]
    fn resolve_is_idempotent() {
        let mut item = CorrectionItem::open(
            utils::new_correction_id().unwrap(),
            "test_results".into(),
            "value out of range".into(),
            Role::QualityAssurance,
            Some("12.4".into()),
        );

        item.resolve(Role::ChemistryTester, Some("re-ran the assay".into()));
        let first = item.clone();

        // second resolve must not touch anything, including the note
        item.resolve(Role::Administrator, Some("should be ignored".into()));
        assert_eq!(item, first);
        assert_eq!(item.resolved_by, Some(Role::ChemistryTester));
    }

    #[test]
    fn correction_item_encoding() {
        let item = CorrectionItem::open(
            utils::new_correction_id().unwrap(),
            "sample_quantity".into(),
            "quantity missing units".into(),
            Role::MicroTester,
            None,
        );

        let encoded = minicbor::to_vec(&item).unwrap();
        let decoded: CorrectionItem = minicbor::decode(&encoded).unwrap();

        assert_eq!(item, decoded);
        assert!(decoded.is_open());
    }
}

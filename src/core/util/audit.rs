// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tamper-evident audit trail of allocation decisions.
//!
//! Every confirmed seat and every expired list appends a record. Records are
//! hash-chained: each hash covers the record's fields plus the previous hash,
//! so any later edit breaks [`AuditLog::verify_chain`]. The log also mirrors
//! each record to the `log` facade as a single JSON line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Mutex;

use crate::core::entity::{EventId, PriorityListId, ProcedureId, UserId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A priority list item produced a confirmed registration.
    SeatGranted,
    /// A procedure terminated while the list was still pending.
    ListExpired,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::SeatGranted => "seat_granted",
            AuditAction::ListExpired => "list_expired",
        };
        f.write_str(s)
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub procedure: ProcedureId,
    pub user: UserId,
    pub list: PriorityListId,
    /// Set for grants; expiry records cover the whole list.
    pub event: Option<EventId>,
    /// Rank of the winning item, for grants.
    pub rank: Option<u32>,
    /// Chain hash over this record and its predecessor.
    pub hash: String,
}

impl AuditRecord {
    fn payload(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.at.timestamp_micros(),
            self.action,
            self.procedure,
            self.user,
            self.list,
            self.event.map(|e| e.to_string()).unwrap_or_default(),
            self.rank.map(|r| r.to_string()).unwrap_or_default(),
        )
    }

    fn chain_hash(&self, previous: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        hasher.update(self.payload().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Append-only, hash-chained audit log.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_grant(
        &self,
        procedure: ProcedureId,
        user: UserId,
        list: PriorityListId,
        event: EventId,
        rank: u32,
    ) {
        self.append(AuditRecord {
            at: Utc::now(),
            action: AuditAction::SeatGranted,
            procedure,
            user,
            list,
            event: Some(event),
            rank: Some(rank),
            hash: String::new(),
        });
    }

    pub fn record_expiry(&self, procedure: ProcedureId, user: UserId, list: PriorityListId) {
        self.append(AuditRecord {
            at: Utc::now(),
            action: AuditAction::ListExpired,
            procedure,
            user,
            list,
            event: None,
            rank: None,
            hash: String::new(),
        });
    }

    fn append(&self, mut record: AuditRecord) {
        let mut records = self.records.lock().unwrap();
        let previous = records.last().map(|r| r.hash.as_str()).unwrap_or("");
        record.hash = record.chain_hash(previous);
        match serde_json::to_string(&record) {
            Ok(line) => log::info!(target: "seatalloc::audit", "{line}"),
            Err(e) => log::warn!("audit record not serializable: {e}"),
        }
        records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Copy of the whole trail, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Records for one procedure, oldest first.
    pub fn records_for(&self, procedure: ProcedureId) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.procedure == procedure)
            .cloned()
            .collect()
    }

    /// Recompute the chain and compare. `false` means a record was altered
    /// after the fact.
    pub fn verify_chain(&self) -> bool {
        let records = self.records.lock().unwrap();
        let mut previous = String::new();
        for record in records.iter() {
            if record.chain_hash(&previous) != record.hash {
                return false;
            }
            previous = record.hash.clone();
        }
        true
    }

    /// The whole trail as a JSON array.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.records.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(log: &AuditLog, user: u64, event: u64) {
        log.record_grant(
            ProcedureId::new(1),
            UserId::new(user),
            PriorityListId::new(user),
            EventId::new(event),
            1,
        );
    }

    #[test]
    fn chain_verifies_when_untouched() {
        let log = AuditLog::new();
        grant(&log, 1, 10);
        grant(&log, 2, 10);
        log.record_expiry(ProcedureId::new(1), UserId::new(3), PriorityListId::new(3));
        assert_eq!(log.len(), 3);
        assert!(log.verify_chain());
    }

    #[test]
    fn tampering_breaks_the_chain() {
        let log = AuditLog::new();
        grant(&log, 1, 10);
        grant(&log, 2, 11);
        {
            let mut records = log.records.lock().unwrap();
            records[0].user = UserId::new(99);
        }
        assert!(!log.verify_chain());
    }

    #[test]
    fn export_is_valid_json() {
        let log = AuditLog::new();
        grant(&log, 1, 10);
        let json = log.export_json().unwrap();
        let parsed: Vec<AuditRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].action, AuditAction::SeatGranted);
    }

    #[test]
    fn records_for_filters_by_procedure() {
        let log = AuditLog::new();
        grant(&log, 1, 10);
        log.record_expiry(ProcedureId::new(2), UserId::new(5), PriorityListId::new(9));
        assert_eq!(log.records_for(ProcedureId::new(2)).len(), 1);
        assert_eq!(log.records_for(ProcedureId::new(1)).len(), 1);
    }
}

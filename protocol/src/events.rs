//! # Audit Events
//!
//! Every committed operation appends one or more [`EventRecord`]s to the
//! engine's journal. The stream is designed for event sourcing: replaying
//! it from sequence 0 through [`Projection`](crate::projection::Projection)
//! rebuilds every vault, proposal and recipient balance exactly.
//!
//! ## Hash Chain
//!
//! Records are chained: each record's `hash` is
//! `BLAKE3(schema_version || prev_hash || bincode(body))`, and its
//! `prev_hash` is the hash of the record before it (all zeros for the
//! first). Editing, dropping or reordering any record breaks the chain from
//! that point on.
//!
//! ## Sinks
//!
//! External consumers (indexers, websockets, metrics) implement
//! [`EventSink`]. The engine publishes each record exactly once, in sequence
//! order, right after the commit that produced it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::EVENT_SCHEMA_VERSION;
use crate::proposal::ProposalAction;
use crate::storage::StoreError;
use crate::types::{Address, AssetId, ProposalId, VaultId};

/// `prev_hash` of the first record in a journal.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Type-specific payload of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A vault was created. The actor is the first listed owner.
    VaultCreated { owners: Vec<Address>, threshold: u32 },
    /// Funds were credited to the vault. `balance` is the new total.
    Deposited {
        asset: AssetId,
        amount: u64,
        balance: u64,
    },
    /// An owner created a proposal.
    ProposalCreated {
        action: ProposalAction,
        expires_at: DateTime<Utc>,
    },
    /// An owner approved a proposal. `approvals` is the recorded total.
    ProposalApproved { approvals: usize, threshold: u32 },
    /// A proposal was executed. Always followed by exactly one effect event.
    ProposalExecuted { action: ProposalAction },
    /// Effect of an executed transfer.
    TransferCompleted {
        asset: AssetId,
        recipient: Address,
        amount: u64,
        remaining: u64,
    },
    /// Effect of an executed `AddOwner`.
    OwnerAdded { owner: Address, owner_count: usize },
    /// Effect of an executed `RemoveOwner`.
    OwnerRemoved { owner: Address, owner_count: usize },
    /// Effect of an executed `UpdateThreshold`.
    ThresholdUpdated { previous: u32, threshold: u32 },
    /// The proposer withdrew a proposal.
    ProposalCancelled,
}

impl EventKind {
    /// Stable label, matching the serialized variant name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::VaultCreated { .. } => "vault_created",
            EventKind::Deposited { .. } => "deposited",
            EventKind::ProposalCreated { .. } => "proposal_created",
            EventKind::ProposalApproved { .. } => "proposal_approved",
            EventKind::ProposalExecuted { .. } => "proposal_executed",
            EventKind::TransferCompleted { .. } => "transfer_completed",
            EventKind::OwnerAdded { .. } => "owner_added",
            EventKind::OwnerRemoved { .. } => "owner_removed",
            EventKind::ThresholdUpdated { .. } => "threshold_updated",
            EventKind::ProposalCancelled => "proposal_cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// EventDraft / EventRecord
// ---------------------------------------------------------------------------

/// An event that has been staged but not yet assigned a place in the
/// journal.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub vault_id: VaultId,
    pub proposal_id: Option<ProposalId>,
    pub actor: Address,
    pub timestamp: DateTime<Utc>,
    pub vault_nonce: u64,
    pub kind: EventKind,
}

/// A sealed, sequenced, hash-chained journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the journal, gap-free from 0.
    pub sequence: u64,
    /// Vault the event belongs to.
    pub vault_id: VaultId,
    /// Proposal the event belongs to, if any.
    pub proposal_id: Option<ProposalId>,
    /// Address that performed the call.
    pub actor: Address,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// The vault's nonce after the commit.
    pub vault_nonce: u64,
    /// Type-specific payload.
    pub kind: EventKind,
    /// Hex hash of the previous record.
    pub prev_hash: String,
    /// Hex hash of this record.
    pub hash: String,
}

impl EventRecord {
    /// Places `draft` at `sequence` after a record whose hash is `prev_hash`.
    pub fn seal(draft: EventDraft, sequence: u64, prev_hash: &str) -> Result<Self, StoreError> {
        let mut record = Self {
            sequence,
            vault_id: draft.vault_id,
            proposal_id: draft.proposal_id,
            actor: draft.actor,
            timestamp: draft.timestamp,
            vault_nonce: draft.vault_nonce,
            kind: draft.kind,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        record.hash = record.compute_hash()?;
        Ok(record)
    }

    /// Recomputes this record's hash from its contents and `prev_hash`.
    pub fn compute_hash(&self) -> Result<String, StoreError> {
        let body = bincode::serialize(&(
            self.sequence,
            &self.vault_id,
            &self.proposal_id,
            &self.actor,
            &self.timestamp,
            self.vault_nonce,
            &self.kind,
        ))
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&EVENT_SCHEMA_VERSION.to_le_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(&body);
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// A consumer of committed events.
///
/// `publish` runs on the committing thread while the journal is locked, so
/// implementations must return quickly and must not call back into the
/// engine.
pub trait EventSink: Send + Sync {
    /// Receives one committed record.
    fn publish(&self, record: &EventRecord);
}

/// Collects every published record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of all records received so far.
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Number of records received so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing has been published yet.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, record: &EventRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(kind: EventKind) -> EventDraft {
        EventDraft {
            vault_id: VaultId::generate(),
            proposal_id: None,
            actor: Address::new("alice").unwrap(),
            timestamp: Utc::now(),
            vault_nonce: 0,
            kind,
        }
    }

    #[test]
    fn sealed_record_hash_verifies() {
        let record = EventRecord::seal(
            draft(EventKind::VaultCreated {
                owners: vec![Address::new("alice").unwrap()],
                threshold: 1,
            }),
            0,
            GENESIS_HASH,
        )
        .unwrap();

        assert_eq!(record.hash.len(), 64);
        assert_eq!(record.compute_hash().unwrap(), record.hash);
    }

    #[test]
    fn any_field_change_changes_the_hash() {
        let record = EventRecord::seal(
            draft(EventKind::Deposited {
                asset: AssetId::new("SUI").unwrap(),
                amount: 100,
                balance: 100,
            }),
            3,
            GENESIS_HASH,
        )
        .unwrap();

        let mut tampered = record.clone();
        tampered.kind = EventKind::Deposited {
            asset: AssetId::new("SUI").unwrap(),
            amount: 1_000,
            balance: 1_000,
        };
        assert_ne!(tampered.compute_hash().unwrap(), record.hash);

        let mut relinked = record.clone();
        relinked.prev_hash = "ff".repeat(32);
        assert_ne!(relinked.compute_hash().unwrap(), record.hash);
    }

    #[test]
    fn memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        for seq in 0..3 {
            let record =
                EventRecord::seal(draft(EventKind::ProposalCancelled), seq, GENESIS_HASH).unwrap();
            sink.publish(&record);
        }
        let seqs: Vec<u64> = sink.records().iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn event_names_match_serialized_tags() {
        let kind = EventKind::ThresholdUpdated {
            previous: 1,
            threshold: 2,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert!(json.get(kind.name()).is_some());
        assert_eq!(
            serde_json::to_value(EventKind::ProposalCancelled).unwrap(),
            serde_json::json!("proposal_cancelled")
        );
    }
}

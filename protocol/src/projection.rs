//! # Journal Replay
//!
//! Rebuilds vaults, proposals and recipient balances purely from the event
//! journal, verifying the journal as it goes:
//!
//! - sequences run gap-free from 0,
//! - every `prev_hash` links to the previous record (genesis hash first),
//! - every stored hash matches a recomputation,
//! - every `vault_nonce` matches the rebuilt vault after the event.
//!
//! State changes are applied through the same [`Vault`] and [`Proposal`]
//! methods the engine uses, so a journal the engine could not have
//! produced fails replay instead of silently yielding a different state.
//!
//! The engine replays the journal on startup and compares the result with
//! the stored snapshots; the node's `verify` command does the same offline.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::authorization::require_owner;
use crate::error::VaultError;
use crate::events::{EventKind, EventRecord, GENESIS_HASH};
use crate::proposal::Proposal;
use crate::storage::Snapshot;
use crate::types::{Address, AssetId, ProposalId, VaultId};
use crate::vault::Vault;

/// Why a journal could not be replayed.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("expected sequence {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("record {sequence} does not link to its predecessor")]
    BrokenChain { sequence: u64 },

    #[error("record {sequence} hash does not match its contents")]
    HashMismatch { sequence: u64 },

    #[error("record {sequence} references unknown vault {vault_id}")]
    UnknownVault { sequence: u64, vault_id: VaultId },

    #[error("record {sequence} references unknown proposal")]
    UnknownProposal { sequence: u64 },

    #[error("record {sequence} creates vault {vault_id} twice")]
    DuplicateVault { sequence: u64, vault_id: VaultId },

    #[error("record {sequence}: vault nonce {recorded} does not match replayed nonce {replayed}")]
    NonceMismatch {
        sequence: u64,
        recorded: u64,
        replayed: u64,
    },

    #[error("record {sequence}: {detail}")]
    Diverged { sequence: u64, detail: String },

    #[error("record {sequence} could not be applied: {source}")]
    Rejected {
        sequence: u64,
        #[source]
        source: VaultError,
    },

    #[error("could not encode record {sequence}: {reason}")]
    Encoding { sequence: u64, reason: String },

    #[error("stored snapshot disagrees with the journal: {0}")]
    SnapshotMismatch(String),
}

/// State rebuilt from the journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub vaults: BTreeMap<VaultId, Vault>,
    pub proposals: BTreeMap<ProposalId, Proposal>,
    pub accounts: BTreeMap<Address, BTreeMap<AssetId, u64>>,
}

impl Projection {
    /// Replays `events` from an empty state.
    pub fn replay(events: &[EventRecord]) -> Result<Self, ReplayError> {
        let mut projection = Self::default();
        let mut prev_hash = GENESIS_HASH.to_string();

        for (expected, record) in (0u64..).zip(events) {
            if record.sequence != expected {
                return Err(ReplayError::SequenceGap {
                    expected,
                    found: record.sequence,
                });
            }
            if record.prev_hash != prev_hash {
                return Err(ReplayError::BrokenChain {
                    sequence: record.sequence,
                });
            }
            let recomputed = record.compute_hash().map_err(|e| ReplayError::Encoding {
                sequence: record.sequence,
                reason: e.to_string(),
            })?;
            if recomputed != record.hash {
                return Err(ReplayError::HashMismatch {
                    sequence: record.sequence,
                });
            }

            projection.apply(record)?;
            prev_hash = record.hash.clone();
        }

        Ok(projection)
    }

    /// Balance of `asset` held by external account `address`.
    pub fn account_balance(&self, address: &Address, asset: &AssetId) -> u64 {
        self.accounts
            .get(address)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or(0)
    }

    /// Fails unless `snapshot` holds exactly the state this projection
    /// rebuilt.
    pub fn check_snapshot(&self, snapshot: &Snapshot) -> Result<(), ReplayError> {
        if snapshot.vaults.len() != self.vaults.len() {
            return Err(ReplayError::SnapshotMismatch(format!(
                "{} stored vaults, {} replayed",
                snapshot.vaults.len(),
                self.vaults.len()
            )));
        }
        for stored in &snapshot.vaults {
            if self.vaults.get(&stored.id) != Some(stored) {
                return Err(ReplayError::SnapshotMismatch(format!("vault {}", stored.id)));
            }
        }

        if snapshot.proposals.len() != self.proposals.len() {
            return Err(ReplayError::SnapshotMismatch(format!(
                "{} stored proposals, {} replayed",
                snapshot.proposals.len(),
                self.proposals.len()
            )));
        }
        for stored in &snapshot.proposals {
            if self.proposals.get(&stored.id) != Some(stored) {
                return Err(ReplayError::SnapshotMismatch(format!(
                    "proposal {}",
                    stored.id
                )));
            }
        }

        if snapshot.accounts != self.accounts {
            return Err(ReplayError::SnapshotMismatch(
                "recipient balances".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, record: &EventRecord) -> Result<(), ReplayError> {
        let seq = record.sequence;
        let rejected = |source: VaultError| ReplayError::Rejected {
            sequence: seq,
            source,
        };

        if let EventKind::VaultCreated { owners, threshold } = &record.kind {
            if !self.vaults.contains_key(&record.vault_id) {
                let vault = Vault::create(
                    record.vault_id,
                    owners.clone(),
                    *threshold,
                    usize::MAX,
                    record.timestamp,
                )
                .map_err(rejected)?;
                check_nonce(record, &vault)?;
                self.vaults.insert(vault.id, vault);
                return Ok(());
            }
        }

        let vault = self
            .vaults
            .get_mut(&record.vault_id)
            .ok_or(ReplayError::UnknownVault {
                sequence: seq,
                vault_id: record.vault_id,
            })?;

        match &record.kind {
            EventKind::VaultCreated { .. } => {
                return Err(ReplayError::DuplicateVault {
                    sequence: seq,
                    vault_id: record.vault_id,
                });
            }
            EventKind::Deposited {
                asset,
                amount,
                balance,
            } => {
                vault.bump_nonce(record.timestamp);
                let replayed = vault.credit(asset, *amount).map_err(rejected)?;
                if replayed != *balance {
                    return Err(diverged(seq, "deposit balance"));
                }
            }
            EventKind::ProposalCreated { action, expires_at } => {
                let id = record
                    .proposal_id
                    .ok_or(ReplayError::UnknownProposal { sequence: seq })?;
                require_owner(vault, &record.actor).map_err(rejected)?;
                vault.bump_nonce(record.timestamp);
                let proposal = Proposal::new(
                    id,
                    vault.id,
                    record.actor.clone(),
                    action.clone(),
                    record.timestamp,
                    *expires_at,
                );
                self.proposals.insert(id, proposal);
            }
            EventKind::ProposalApproved { approvals, .. } => {
                let proposal = proposal_mut(&mut self.proposals, record)?;
                require_owner(vault, &record.actor).map_err(rejected)?;
                vault.bump_nonce(record.timestamp);
                proposal.record_approval(&record.actor).map_err(rejected)?;
                if proposal.approval_count() != *approvals {
                    return Err(diverged(seq, "approval count"));
                }
            }
            EventKind::ProposalExecuted { .. } => {
                let proposal = proposal_mut(&mut self.proposals, record)?;
                require_owner(vault, &record.actor).map_err(rejected)?;
                vault.bump_nonce(record.timestamp);
                proposal
                    .mark_executed(&record.actor, record.timestamp)
                    .map_err(rejected)?;
            }
            EventKind::ProposalCancelled => {
                let proposal = proposal_mut(&mut self.proposals, record)?;
                require_owner(vault, &record.actor).map_err(rejected)?;
                vault.bump_nonce(record.timestamp);
                proposal.mark_cancelled(record.timestamp).map_err(rejected)?;
            }
            // Effect events follow their ProposalExecuted record and share
            // its nonce.
            EventKind::TransferCompleted {
                asset,
                recipient,
                amount,
                remaining,
            } => {
                let replayed = vault.debit(asset, *amount).map_err(rejected)?;
                if replayed != *remaining {
                    return Err(diverged(seq, "remaining balance"));
                }
                let entry = self
                    .accounts
                    .entry(recipient.clone())
                    .or_default()
                    .entry(asset.clone())
                    .or_insert(0);
                *entry = entry.checked_add(*amount).ok_or_else(|| {
                    rejected(VaultError::BalanceOverflow {
                        asset: asset.clone(),
                    })
                })?;
            }
            EventKind::OwnerAdded { owner, owner_count } => {
                vault.add_owner(owner, usize::MAX).map_err(rejected)?;
                if vault.owner_count() != *owner_count {
                    return Err(diverged(seq, "owner count"));
                }
            }
            EventKind::OwnerRemoved { owner, owner_count } => {
                vault.remove_owner(owner).map_err(rejected)?;
                if vault.owner_count() != *owner_count {
                    return Err(diverged(seq, "owner count"));
                }
            }
            EventKind::ThresholdUpdated {
                previous,
                threshold,
            } => {
                let replayed = vault.set_threshold(*threshold).map_err(rejected)?;
                if replayed != *previous {
                    return Err(diverged(seq, "previous threshold"));
                }
            }
        }

        check_nonce(record, vault)
    }
}

fn diverged(sequence: u64, what: &str) -> ReplayError {
    ReplayError::Diverged {
        sequence,
        detail: format!("{what} does not match replayed state"),
    }
}

fn check_nonce(record: &EventRecord, vault: &Vault) -> Result<(), ReplayError> {
    if record.vault_nonce != vault.nonce() {
        return Err(ReplayError::NonceMismatch {
            sequence: record.sequence,
            recorded: record.vault_nonce,
            replayed: vault.nonce(),
        });
    }
    Ok(())
}

fn proposal_mut<'a>(
    proposals: &'a mut BTreeMap<ProposalId, Proposal>,
    record: &EventRecord,
) -> Result<&'a mut Proposal, ReplayError> {
    let unknown = ReplayError::UnknownProposal {
        sequence: record.sequence,
    };
    let id = record.proposal_id.ok_or(unknown)?;
    match proposals.get_mut(&id) {
        Some(p) if p.vault_id == record.vault_id => Ok(p),
        _ => Err(ReplayError::UnknownProposal {
            sequence: record.sequence,
        }),
    }
}

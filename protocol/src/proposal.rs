//! # Proposals
//!
//! A [`Proposal`] is a durable request to mutate a vault, waiting for
//! owner approvals. Proposals are never deleted: executed, cancelled and
//! expired proposals stay in the [`ProposalStore`] for audit.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending --approve--> Pending --approve (quorum)--> Executable --execute--> Executed
//!    |                                                   |
//!    +------------------------cancel---------------------+--> Cancelled
//!    +---------------- clock passes expires_at ----------+--> Expired
//! ```
//!
//! `Executed`, `Cancelled` and `Expired` are terminal. `Expired` is derived
//! from the clock rather than stored, so a proposal expires even if nobody
//! touches it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::types::{Address, AssetId, ProposalId, VaultId};
use crate::vault::Vault;

// ---------------------------------------------------------------------------
// ProposalAction
// ---------------------------------------------------------------------------

/// The mutation a proposal asks the vault to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalAction {
    /// Move `amount` of `asset` out of the vault to `recipient`.
    Transfer {
        /// Asset to debit.
        asset: AssetId,
        /// External account credited on execution.
        recipient: Address,
        /// Amount in the asset's smallest unit.
        amount: u64,
    },
    /// Add a new owner. The threshold is not touched.
    AddOwner {
        /// Address to add.
        owner: Address,
    },
    /// Remove an existing owner.
    RemoveOwner {
        /// Address to remove.
        owner: Address,
    },
    /// Replace the approval threshold.
    UpdateThreshold {
        /// The new threshold.
        threshold: u32,
    },
}

/// Discriminant of [`ProposalAction`], for labels and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Transfer,
    AddOwner,
    RemoveOwner,
    UpdateThreshold,
}

impl ProposalKind {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalKind::Transfer => "transfer",
            ProposalKind::AddOwner => "add_owner",
            ProposalKind::RemoveOwner => "remove_owner",
            ProposalKind::UpdateThreshold => "update_threshold",
        }
    }
}

impl fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProposalAction {
    /// Returns the action's discriminant.
    pub fn kind(&self) -> ProposalKind {
        match self {
            ProposalAction::Transfer { .. } => ProposalKind::Transfer,
            ProposalAction::AddOwner { .. } => ProposalKind::AddOwner,
            ProposalAction::RemoveOwner { .. } => ProposalKind::RemoveOwner,
            ProposalAction::UpdateThreshold { .. } => ProposalKind::UpdateThreshold,
        }
    }

    /// Rejects actions that can never succeed regardless of vault state.
    ///
    /// Preconditions that depend on the vault (balances, membership,
    /// threshold feasibility) are checked at execution time instead, since
    /// the vault may change while the proposal collects approvals.
    pub fn validate_shape(&self) -> VaultResult<()> {
        match self {
            ProposalAction::Transfer { amount: 0, .. } => Err(VaultError::ZeroAmount),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// ProposalStatus
// ---------------------------------------------------------------------------

/// Where a proposal sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Collecting approvals.
    Pending,
    /// Quorum reached; any owner may execute.
    Executable,
    /// Effect applied. Terminal.
    Executed,
    /// Withdrawn by the proposer. Terminal.
    Cancelled,
    /// Deadline passed before execution. Terminal.
    Expired,
}

impl ProposalStatus {
    /// Returns `true` for states no call can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Executed | ProposalStatus::Cancelled | ProposalStatus::Expired
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "Pending"),
            ProposalStatus::Executable => write!(f, "Executable"),
            ProposalStatus::Executed => write!(f, "Executed"),
            ProposalStatus::Cancelled => write!(f, "Cancelled"),
            ProposalStatus::Expired => write!(f, "Expired"),
        }
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// A requested vault mutation and the approvals collected for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier for this proposal.
    pub id: ProposalId,
    /// The vault this proposal would mutate.
    pub vault_id: VaultId,
    /// What the proposal does when executed.
    pub action: ProposalAction,
    /// Owner that created the proposal.
    pub proposer: Address,
    /// Owners that approved, in arrival order. Never contains duplicates.
    approvals: Vec<Address>,
    /// Set exactly once, by a successful execution.
    executed: bool,
    /// When the proposal was executed.
    pub executed_at: Option<DateTime<Utc>>,
    /// Owner that triggered execution.
    pub executed_by: Option<Address>,
    /// When the proposer withdrew the proposal.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Timestamp when the proposal was created.
    pub created_at: DateTime<Utc>,
    /// Approvals and executions are rejected from this instant on.
    pub expires_at: DateTime<Utc>,
}

impl Proposal {
    /// Creates a proposal with no approvals.
    pub fn new(
        id: ProposalId,
        vault_id: VaultId,
        proposer: Address,
        action: ProposalAction,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            vault_id,
            action,
            proposer,
            approvals: Vec::new(),
            executed: false,
            executed_at: None,
            executed_by: None,
            cancelled_at: None,
            created_at,
            expires_at,
        }
    }

    /// Owners that approved, in arrival order.
    pub fn approvals(&self) -> &[Address] {
        &self.approvals
    }

    /// Returns `true` if `owner` already approved.
    pub fn has_approved(&self, owner: &Address) -> bool {
        self.approvals.contains(owner)
    }

    /// Number of recorded approvals. Approvals are never withdrawn, so an
    /// owner removed after approving still counts toward quorum.
    pub fn approval_count(&self) -> usize {
        self.approvals.len()
    }

    /// Returns `true` once the effect has been applied.
    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Returns `true` if the proposer withdrew the proposal.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Returns `true` if the deadline has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Lifecycle status at `now`, with quorum measured against `vault`.
    pub fn status(&self, vault: &Vault, now: DateTime<Utc>) -> ProposalStatus {
        if self.executed {
            ProposalStatus::Executed
        } else if self.is_cancelled() {
            ProposalStatus::Cancelled
        } else if self.is_expired(now) {
            ProposalStatus::Expired
        } else if self.approval_count() >= vault.threshold() as usize {
            ProposalStatus::Executable
        } else {
            ProposalStatus::Pending
        }
    }

    /// Appends an approval. Returns the new approval count.
    ///
    /// # Errors
    ///
    /// [`VaultError::AlreadyApproved`] if `approver` is already recorded.
    pub fn record_approval(&mut self, approver: &Address) -> VaultResult<usize> {
        if self.has_approved(approver) {
            return Err(VaultError::AlreadyApproved {
                proposal_id: self.id,
                approver: approver.clone(),
            });
        }
        self.approvals.push(approver.clone());
        Ok(self.approvals.len())
    }

    /// Flips `executed` to `true`.
    ///
    /// # Errors
    ///
    /// [`VaultError::AlreadyExecuted`] if it was already set.
    pub fn mark_executed(&mut self, executor: &Address, now: DateTime<Utc>) -> VaultResult<()> {
        if self.executed {
            return Err(VaultError::AlreadyExecuted(self.id));
        }
        self.executed = true;
        self.executed_at = Some(now);
        self.executed_by = Some(executor.clone());
        Ok(())
    }

    /// Marks the proposal as withdrawn.
    ///
    /// # Errors
    ///
    /// [`VaultError::AlreadyExecuted`] or [`VaultError::ProposalCancelled`]
    /// if the proposal already reached a terminal state.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> VaultResult<()> {
        if self.executed {
            return Err(VaultError::AlreadyExecuted(self.id));
        }
        if self.is_cancelled() {
            return Err(VaultError::ProposalCancelled(self.id));
        }
        self.cancelled_at = Some(now);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProposalStore
// ---------------------------------------------------------------------------

/// All proposals belonging to one vault.
///
/// The store lives next to its vault inside the engine's per-vault cell,
/// so it is always read and written under the same lock as the vault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalStore {
    proposals: BTreeMap<ProposalId, Proposal>,
}

impl ProposalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a proposal.
    pub fn get(&self, id: &ProposalId) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    /// Inserts or replaces a proposal.
    pub fn put(&mut self, proposal: Proposal) {
        self.proposals.insert(proposal.id, proposal);
    }

    /// Number of proposals ever created for the vault.
    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    /// Returns `true` if the vault has no proposals.
    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    /// All proposals, oldest first.
    pub fn list(&self) -> Vec<Proposal> {
        let mut all: Vec<Proposal> = self.proposals.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Proposals that are neither terminal nor expired at `now`.
    pub fn open(&self, vault: &Vault, now: DateTime<Utc>) -> Vec<Proposal> {
        self.list()
            .into_iter()
            .filter(|p| !p.status(vault, now).is_terminal())
            .collect()
    }
}

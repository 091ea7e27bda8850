//! # Engine Errors
//!
//! Every rejected call surfaces as a [`VaultError`]. Errors are synchronous
//! and final: the engine never retries internally, and a failed call never
//! leaves a partial mutation behind.
//!
//! Callers that need to decide what to do next use [`VaultError::category`]
//! (what went wrong) and [`VaultError::recovery`] (what can be done about it).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StoreError;
use crate::types::{Address, AssetId, ProposalId, VaultId};

/// Convenience alias used throughout the engine.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors that can occur during vault and proposal operations.
#[derive(Debug, Error)]
pub enum VaultError {
    // -- Authorization ------------------------------------------------------
    /// The caller is not a current owner of the vault.
    #[error("{address} is not an owner of vault {vault_id}")]
    NotOwner {
        /// Vault the call targeted.
        vault_id: VaultId,
        /// The rejected caller.
        address: Address,
    },

    /// Only the proposer may cancel a proposal.
    #[error("{caller} did not create proposal {proposal_id}")]
    NotProposer {
        /// The proposal the caller tried to cancel.
        proposal_id: ProposalId,
        /// The rejected caller.
        caller: Address,
    },

    /// An `AddOwner` effect named an address that already owns the vault.
    #[error("{0} is already an owner")]
    OwnerAlreadyExists(Address),

    /// A `RemoveOwner` effect named an address that does not own the vault.
    #[error("{0} is not an owner")]
    OwnerNotFound(Address),

    // -- State --------------------------------------------------------------
    /// The proposal has already been executed.
    #[error("proposal {0} has already been executed")]
    AlreadyExecuted(ProposalId),

    /// The approver has already approved this proposal.
    #[error("{approver} has already approved proposal {proposal_id}")]
    AlreadyApproved {
        /// The proposal in question.
        proposal_id: ProposalId,
        /// The owner attempting a second approval.
        approver: Address,
    },

    /// The proposal's deadline has passed.
    #[error("proposal {proposal_id} expired at {expired_at}")]
    ProposalExpired {
        /// The expired proposal.
        proposal_id: ProposalId,
        /// When it stopped accepting approvals and executions.
        expired_at: DateTime<Utc>,
    },

    /// Quorum has not been reached yet.
    #[error("insufficient approvals: {approvals} of {threshold} required")]
    InsufficientApprovals {
        /// Recorded approvals.
        approvals: usize,
        /// The vault's threshold at the time of the call.
        threshold: u32,
    },

    /// The proposal was cancelled by its proposer.
    #[error("proposal {0} has been cancelled")]
    ProposalCancelled(ProposalId),

    // -- Configuration ------------------------------------------------------
    /// Threshold outside `1..=owners`.
    #[error("invalid threshold {threshold} for {owners} owner(s)")]
    InvalidThreshold {
        /// The requested threshold.
        threshold: u32,
        /// Number of owners it was checked against.
        owners: usize,
    },

    /// Removing an owner would leave fewer owners than the threshold.
    #[error("cannot remove owner: {owners} owner(s) would remain below threshold {threshold}")]
    CannotRemoveOwner {
        /// Owners remaining after the removal.
        owners: usize,
        /// The vault's threshold.
        threshold: u32,
    },

    /// The same address was listed twice when creating a vault.
    #[error("duplicate owner {0}")]
    DuplicateOwner(Address),

    /// A vault must have at least one owner.
    #[error("a vault requires at least one owner")]
    EmptyOwners,

    /// The owner set would exceed the configured maximum.
    #[error("too many owners: {count} exceeds the limit of {max}")]
    TooManyOwners {
        /// Resulting owner count.
        count: usize,
        /// Configured limit.
        max: usize,
    },

    // -- Resource -----------------------------------------------------------
    /// The vault does not hold enough of the asset for the transfer.
    #[error("insufficient balance of {asset}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Asset being transferred.
        asset: AssetId,
        /// Current vault balance.
        available: u64,
        /// Requested amount.
        requested: u64,
    },

    /// A credit would overflow `u64`.
    #[error("balance overflow for {asset}")]
    BalanceOverflow {
        /// Asset being credited.
        asset: AssetId,
    },

    // -- Validation ---------------------------------------------------------
    /// Zero-amount deposits and transfers are rejected.
    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    /// No vault with this id exists.
    #[error("vault {0} not found")]
    VaultNotFound(VaultId),

    /// No proposal with this id exists.
    #[error("proposal {0} not found")]
    ProposalNotFound(ProposalId),

    /// The proposal exists but belongs to another vault.
    #[error("proposal {proposal_id} belongs to vault {actual}, not {expected}")]
    ProposalBelongsToDifferentVault {
        /// The proposal addressed.
        proposal_id: ProposalId,
        /// The vault named by the caller.
        expected: VaultId,
        /// The vault the proposal actually belongs to.
        actual: VaultId,
    },

    /// Requested expiry is non-positive or longer than allowed.
    #[error("invalid expiry of {secs}s: must be between 1s and {max_secs}s")]
    InvalidExpiry {
        /// The requested lifetime in seconds.
        secs: i64,
        /// The configured maximum.
        max_secs: i64,
    },

    /// Malformed address string.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// Malformed asset symbol.
    #[error("invalid asset {0:?}")]
    InvalidAsset(String),

    // -- Internal -----------------------------------------------------------
    /// The persistence layer failed. The in-memory state was left untouched.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// What kind of rule a rejected call violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The caller lacks the membership the operation requires.
    Authorization,
    /// The proposal's lifecycle does not permit the operation.
    State,
    /// The operation would break the vault's membership/threshold invariants.
    Configuration,
    /// Not enough funds, or an arithmetic bound was hit.
    Resource,
    /// Malformed input or unknown identifiers.
    Validation,
    /// Infrastructure failure.
    Internal,
}

impl ErrorCategory {
    /// Stable lowercase label, used for metrics and API error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::State => "state",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// How a caller can recover from a rejected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Nothing to do: the outcome is final (e.g. already executed).
    Terminal,
    /// Gather more approvals, or create a fresh proposal.
    Repropose,
    /// Correct the request and submit it again.
    FixAndResubmit,
    /// Transient failure; the identical call may succeed later.
    Retry,
}

impl VaultError {
    /// Returns the taxonomy bucket this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        use VaultError::*;
        match self {
            NotOwner { .. } | NotProposer { .. } | OwnerAlreadyExists(_) | OwnerNotFound(_) => {
                ErrorCategory::Authorization
            }
            AlreadyExecuted(_)
            | AlreadyApproved { .. }
            | ProposalExpired { .. }
            | InsufficientApprovals { .. }
            | ProposalCancelled(_) => ErrorCategory::State,
            InvalidThreshold { .. }
            | CannotRemoveOwner { .. }
            | DuplicateOwner(_)
            | EmptyOwners
            | TooManyOwners { .. } => ErrorCategory::Configuration,
            InsufficientBalance { .. } | BalanceOverflow { .. } => ErrorCategory::Resource,
            ZeroAmount
            | VaultNotFound(_)
            | ProposalNotFound(_)
            | ProposalBelongsToDifferentVault { .. }
            | InvalidExpiry { .. }
            | InvalidAddress(_)
            | InvalidAsset(_) => ErrorCategory::Validation,
            Storage(_) => ErrorCategory::Internal,
        }
    }

    /// Returns how a caller can recover from this error.
    pub fn recovery(&self) -> Recovery {
        use VaultError::*;
        match self {
            AlreadyExecuted(_) | ProposalCancelled(_) | AlreadyApproved { .. } => {
                Recovery::Terminal
            }
            ProposalExpired { .. } | InsufficientApprovals { .. } => Recovery::Repropose,
            Storage(_) => Recovery::Retry,
            _ => Recovery::FixAndResubmit,
        }
    }

    /// Stable machine-readable code (the variant name in snake case).
    pub fn code(&self) -> &'static str {
        use VaultError::*;
        match self {
            NotOwner { .. } => "not_owner",
            NotProposer { .. } => "not_proposer",
            OwnerAlreadyExists(_) => "owner_already_exists",
            OwnerNotFound(_) => "owner_not_found",
            AlreadyExecuted(_) => "already_executed",
            AlreadyApproved { .. } => "already_approved",
            ProposalExpired { .. } => "proposal_expired",
            InsufficientApprovals { .. } => "insufficient_approvals",
            ProposalCancelled(_) => "proposal_cancelled",
            InvalidThreshold { .. } => "invalid_threshold",
            CannotRemoveOwner { .. } => "cannot_remove_owner",
            DuplicateOwner(_) => "duplicate_owner",
            EmptyOwners => "empty_owners",
            TooManyOwners { .. } => "too_many_owners",
            InsufficientBalance { .. } => "insufficient_balance",
            BalanceOverflow { .. } => "balance_overflow",
            ZeroAmount => "zero_amount",
            VaultNotFound(_) => "vault_not_found",
            ProposalNotFound(_) => "proposal_not_found",
            ProposalBelongsToDifferentVault { .. } => "proposal_belongs_to_different_vault",
            InvalidExpiry { .. } => "invalid_expiry",
            InvalidAddress(_) => "invalid_address",
            InvalidAsset(_) => "invalid_asset",
            Storage(_) => "storage",
        }
    }
}

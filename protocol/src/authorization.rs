//! # Authorization Rules
//!
//! Pure checks applied at every entry point before anything is staged.
//! They read a vault and a proposal and either approve the call or say
//! precisely why not; they never mutate.
//!
//! Ownership is a plain membership test against the vault's **current**
//! owner set. An owner removed while a proposal is in flight loses the
//! right to approve, execute or cancel it. Approvals they already cast
//! stay recorded and keep counting toward quorum.
//!
//! Checks run in a fixed order so that callers always see the same error
//! for the same situation: membership, then terminal lifecycle states
//! (cancelled, executed), then expiry, then the call-specific rule.

use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::error::{VaultError, VaultResult};
use crate::proposal::{Proposal, ProposalAction};
use crate::types::Address;
use crate::vault::Vault;

/// Fails with [`VaultError::NotOwner`] unless `address` owns `vault`.
pub fn require_owner(vault: &Vault, address: &Address) -> VaultResult<()> {
    if !vault.is_owner(address) {
        return Err(VaultError::NotOwner {
            vault_id: vault.id,
            address: address.clone(),
        });
    }
    Ok(())
}

/// Fails if the proposal is cancelled, executed, or expired at `now`.
fn require_open(proposal: &Proposal, now: DateTime<Utc>) -> VaultResult<()> {
    if proposal.is_cancelled() {
        return Err(VaultError::ProposalCancelled(proposal.id));
    }
    if proposal.is_executed() {
        return Err(VaultError::AlreadyExecuted(proposal.id));
    }
    if proposal.is_expired(now) {
        return Err(VaultError::ProposalExpired {
            proposal_id: proposal.id,
            expired_at: proposal.expires_at,
        });
    }
    Ok(())
}

/// Validates a `propose` call.
pub fn check_propose(vault: &Vault, proposer: &Address, action: &ProposalAction) -> VaultResult<()> {
    require_owner(vault, proposer)?;
    action.validate_shape()
}

/// Validates an `approve` call.
pub fn check_approve(
    vault: &Vault,
    proposal: &Proposal,
    approver: &Address,
    now: DateTime<Utc>,
) -> VaultResult<()> {
    require_owner(vault, approver)?;
    require_open(proposal, now)?;
    if proposal.has_approved(approver) {
        return Err(VaultError::AlreadyApproved {
            proposal_id: proposal.id,
            approver: approver.clone(),
        });
    }
    Ok(())
}

/// Validates an `execute` call up to, but not including, the effect's own
/// preconditions (those belong to the dispatcher).
pub fn check_execute(
    vault: &Vault,
    proposal: &Proposal,
    executor: &Address,
    now: DateTime<Utc>,
) -> VaultResult<()> {
    require_owner(vault, executor)?;
    require_open(proposal, now)?;
    let approvals = proposal.approval_count();
    if approvals < vault.threshold() as usize {
        return Err(VaultError::InsufficientApprovals {
            approvals,
            threshold: vault.threshold(),
        });
    }
    Ok(())
}

/// Validates a `cancel` call. Only the proposer, while still an owner,
/// may withdraw an open proposal.
pub fn check_cancel(
    vault: &Vault,
    proposal: &Proposal,
    caller: &Address,
    now: DateTime<Utc>,
) -> VaultResult<()> {
    require_owner(vault, caller)?;
    if &proposal.proposer != caller {
        return Err(VaultError::NotProposer {
            proposal_id: proposal.id,
            caller: caller.clone(),
        });
    }
    require_open(proposal, now)
}

/// `true` if an owner could execute `proposal` right now.
pub fn is_executable(vault: &Vault, proposal: &Proposal, now: DateTime<Utc>) -> bool {
    require_open(proposal, now).is_ok()
        && proposal.approval_count() >= vault.threshold() as usize
}

/// Converts a lifetime given in whole seconds, as it arrives from a request
/// body or the command line, into a [`Duration`].
///
/// # Errors
///
/// [`VaultError::InvalidExpiry`] if `secs` is not positive, exceeds
/// `config.max_expiry`, or is too large to represent at all.
pub fn lifetime_from_secs(config: &EngineConfig, secs: i64) -> VaultResult<Duration> {
    let invalid = || VaultError::InvalidExpiry {
        secs,
        max_secs: config.max_expiry.num_seconds(),
    };
    let lifetime = Duration::try_seconds(secs).ok_or_else(invalid)?;
    if lifetime <= Duration::zero() || lifetime > config.max_expiry {
        return Err(invalid());
    }
    Ok(lifetime)
}

/// Computes a new proposal's deadline from an optional lifetime override.
///
/// # Errors
///
/// [`VaultError::InvalidExpiry`] if the override is not positive or exceeds
/// `config.max_expiry`.
pub fn resolve_expiry(
    config: &EngineConfig,
    now: DateTime<Utc>,
    expiry_override: Option<Duration>,
) -> VaultResult<DateTime<Utc>> {
    let lifetime = expiry_override.unwrap_or(config.default_expiry);
    if lifetime <= Duration::zero() || lifetime > config.max_expiry {
        return Err(VaultError::InvalidExpiry {
            secs: lifetime.num_seconds(),
            max_secs: config.max_expiry.num_seconds(),
        });
    }
    Ok(now + lifetime)
}

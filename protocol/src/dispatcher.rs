//! # Execution Dispatcher
//!
//! Applies an approved proposal's effect to a vault. There is exactly one
//! handler per [`ProposalAction`] variant, selected by an exhaustive
//! `match`; adding a variant is a compile error here until it is handled.
//!
//! The dispatcher always operates on a *staged* copy of the vault handed to
//! it by the engine. Each handler validates its preconditions before it
//! writes, and the engine discards the staged copy on any error, so a failed
//! effect can never leak into committed state.

use serde::{Deserialize, Serialize};

use crate::error::VaultResult;
use crate::proposal::ProposalAction;
use crate::types::{Address, AssetId};
use crate::vault::Vault;

/// The outcome of a successfully applied action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Funds left the vault for `recipient`.
    Transfer {
        asset: AssetId,
        recipient: Address,
        amount: u64,
        /// Vault balance of `asset` after the debit.
        remaining: u64,
    },
    /// `owner` joined the vault.
    OwnerAdded { owner: Address, owner_count: usize },
    /// `owner` left the vault.
    OwnerRemoved { owner: Address, owner_count: usize },
    /// The threshold changed from `previous` to `threshold`.
    ThresholdUpdated { previous: u32, threshold: u32 },
}

impl Effect {
    /// The external credit this effect requires, if any.
    pub fn settlement(&self) -> Option<(&Address, &AssetId, u64)> {
        match self {
            Effect::Transfer {
                asset,
                recipient,
                amount,
                ..
            } => Some((recipient, asset, *amount)),
            _ => None,
        }
    }
}

/// Routes a proposal action to its handler.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionDispatcher {
    max_owners: usize,
}

impl ExecutionDispatcher {
    /// Creates a dispatcher enforcing `max_owners` on `AddOwner`.
    pub fn new(max_owners: usize) -> Self {
        Self { max_owners }
    }

    /// Applies `action` to the staged `vault`.
    ///
    /// # Errors
    ///
    /// - Transfer: `InsufficientBalance`.
    /// - AddOwner: `OwnerAlreadyExists`, `TooManyOwners`.
    /// - RemoveOwner: `OwnerNotFound`, `CannotRemoveOwner`.
    /// - UpdateThreshold: `InvalidThreshold`.
    pub fn apply(&self, vault: &mut Vault, action: &ProposalAction) -> VaultResult<Effect> {
        match action {
            ProposalAction::Transfer {
                asset,
                recipient,
                amount,
            } => {
                let remaining = vault.debit(asset, *amount)?;
                Ok(Effect::Transfer {
                    asset: asset.clone(),
                    recipient: recipient.clone(),
                    amount: *amount,
                    remaining,
                })
            }
            ProposalAction::AddOwner { owner } => {
                vault.add_owner(owner, self.max_owners)?;
                Ok(Effect::OwnerAdded {
                    owner: owner.clone(),
                    owner_count: vault.owner_count(),
                })
            }
            ProposalAction::RemoveOwner { owner } => {
                vault.remove_owner(owner)?;
                Ok(Effect::OwnerRemoved {
                    owner: owner.clone(),
                    owner_count: vault.owner_count(),
                })
            }
            ProposalAction::UpdateThreshold { threshold } => {
                let previous = vault.set_threshold(*threshold)?;
                Ok(Effect::ThresholdUpdated {
                    previous,
                    threshold: *threshold,
                })
            }
        }
    }
}

//! # Vault Aggregate
//!
//! A [`Vault`] is a shared custodial account: an owner set, an approval
//! threshold (the M in M-of-N), per-asset balances, and a nonce that acts
//! as the aggregate's version.
//!
//! ## Invariants
//!
//! At every observable state:
//!
//! 1. `owners` is non-empty and contains no duplicates.
//! 2. `1 <= threshold <= owners.len()`.
//! 3. Balances are unsigned and only change through checked arithmetic.
//!
//! Every mutator on this type validates before it writes, so a method that
//! returns `Err` leaves the vault exactly as it found it. The engine relies
//! on that, and additionally stages mutations on a clone before committing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::types::{Address, AssetId, VaultId};

/// Checks that `threshold` is reachable with `owner_count` owners.
pub fn check_threshold(threshold: u32, owner_count: usize) -> VaultResult<()> {
    if threshold == 0 || threshold as usize > owner_count {
        return Err(VaultError::InvalidThreshold {
            threshold,
            owners: owner_count,
        });
    }
    Ok(())
}

/// A multi-owner custodial vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Unique identifier for this vault.
    pub id: VaultId,
    /// Current owners, in the order they joined.
    owners: Vec<Address>,
    /// Distinct owner approvals required to execute a proposal.
    threshold: u32,
    /// Balance per asset held by the vault.
    balances: BTreeMap<AssetId, u64>,
    /// Incremented once per committed operation touching the vault.
    nonce: u64,
    /// Timestamp when the vault was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent committed operation.
    pub updated_at: DateTime<Utc>,
}

impl Vault {
    /// Creates a vault after validating its membership.
    ///
    /// # Errors
    ///
    /// - [`VaultError::EmptyOwners`] if `owners` is empty.
    /// - [`VaultError::TooManyOwners`] if `owners.len() > max_owners`.
    /// - [`VaultError::DuplicateOwner`] if an address is listed twice.
    /// - [`VaultError::InvalidThreshold`] unless `1 <= threshold <= owners.len()`.
    pub fn create(
        id: VaultId,
        owners: Vec<Address>,
        threshold: u32,
        max_owners: usize,
        now: DateTime<Utc>,
    ) -> VaultResult<Self> {
        if owners.is_empty() {
            return Err(VaultError::EmptyOwners);
        }
        if owners.len() > max_owners {
            return Err(VaultError::TooManyOwners {
                count: owners.len(),
                max: max_owners,
            });
        }
        for (i, owner) in owners.iter().enumerate() {
            if owners[..i].contains(owner) {
                return Err(VaultError::DuplicateOwner(owner.clone()));
            }
        }
        check_threshold(threshold, owners.len())?;

        Ok(Self {
            id,
            owners,
            threshold,
            balances: BTreeMap::new(),
            nonce: 0,
            created_at: now,
            updated_at: now,
        })
    }

    // -- Accessors ----------------------------------------------------------

    /// Current owners, in join order.
    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    /// Returns `true` if `address` currently owns the vault.
    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }

    /// Number of current owners.
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// The approval threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Balance of `asset`, zero if the vault never held it.
    pub fn balance(&self, asset: &AssetId) -> u64 {
        self.balances.get(asset).copied().unwrap_or(0)
    }

    /// All balances, keyed by asset.
    pub fn balances(&self) -> &BTreeMap<AssetId, u64> {
        &self.balances
    }

    /// The vault's version counter.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    // -- Mutators -----------------------------------------------------------

    /// Advances the nonce and stamps `updated_at`. Returns the new nonce.
    pub fn bump_nonce(&mut self, now: DateTime<Utc>) -> u64 {
        self.nonce += 1;
        self.updated_at = now;
        self.nonce
    }

    /// Credits `amount` of `asset`. Returns the new balance.
    ///
    /// # Errors
    ///
    /// [`VaultError::ZeroAmount`] for a zero credit, [`VaultError::BalanceOverflow`]
    /// if the balance would exceed `u64::MAX`.
    pub fn credit(&mut self, asset: &AssetId, amount: u64) -> VaultResult<u64> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let current = self.balance(asset);
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| VaultError::BalanceOverflow {
                asset: asset.clone(),
            })?;
        self.balances.insert(asset.clone(), updated);
        Ok(updated)
    }

    /// Debits `amount` of `asset`. Returns the remaining balance.
    ///
    /// # Errors
    ///
    /// [`VaultError::ZeroAmount`] for a zero debit, [`VaultError::InsufficientBalance`]
    /// if the vault holds less than `amount`.
    pub fn debit(&mut self, asset: &AssetId, amount: u64) -> VaultResult<u64> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let available = self.balance(asset);
        let remaining =
            available
                .checked_sub(amount)
                .ok_or_else(|| VaultError::InsufficientBalance {
                    asset: asset.clone(),
                    available,
                    requested: amount,
                })?;
        self.balances.insert(asset.clone(), remaining);
        Ok(remaining)
    }

    /// Appends a new owner. The threshold is left unchanged.
    ///
    /// # Errors
    ///
    /// [`VaultError::OwnerAlreadyExists`] if `owner` is already a member,
    /// [`VaultError::TooManyOwners`] if the set is full.
    pub fn add_owner(&mut self, owner: &Address, max_owners: usize) -> VaultResult<()> {
        if self.is_owner(owner) {
            return Err(VaultError::OwnerAlreadyExists(owner.clone()));
        }
        if self.owners.len() >= max_owners {
            return Err(VaultError::TooManyOwners {
                count: self.owners.len() + 1,
                max: max_owners,
            });
        }
        self.owners.push(owner.clone());
        Ok(())
    }

    /// Removes an owner, refusing if the threshold would become unreachable.
    ///
    /// # Errors
    ///
    /// [`VaultError::OwnerNotFound`] if `owner` is not a member,
    /// [`VaultError::CannotRemoveOwner`] if `owners - 1 < threshold`.
    pub fn remove_owner(&mut self, owner: &Address) -> VaultResult<()> {
        let idx = self
            .owners
            .iter()
            .position(|o| o == owner)
            .ok_or_else(|| VaultError::OwnerNotFound(owner.clone()))?;

        let remaining = self.owners.len() - 1;
        if remaining < self.threshold as usize {
            return Err(VaultError::CannotRemoveOwner {
                owners: remaining,
                threshold: self.threshold,
            });
        }
        self.owners.remove(idx);
        Ok(())
    }

    /// Replaces the threshold. Returns the previous value.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidThreshold`] unless `1 <= threshold <= owners`.
    pub fn set_threshold(&mut self, threshold: u32) -> VaultResult<u32> {
        check_threshold(threshold, self.owners.len())?;
        let previous = self.threshold;
        self.threshold = threshold;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn owners(names: &[&str]) -> Vec<Address> {
        names.iter().map(|n| addr(n)).collect()
    }

    fn sui() -> AssetId {
        AssetId::new("SUI").unwrap()
    }

    fn vault(names: &[&str], threshold: u32) -> Vault {
        Vault::create(VaultId::generate(), owners(names), threshold, 64, Utc::now()).unwrap()
    }

    #[test]
    fn create_rejects_threshold_above_owner_count() {
        let result = Vault::create(
            VaultId::generate(),
            owners(&["a", "b", "c"]),
            4,
            64,
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(VaultError::InvalidThreshold {
                threshold: 4,
                owners: 3
            })
        ));
    }

    #[test]
    fn create_rejects_zero_threshold() {
        let result = Vault::create(VaultId::generate(), owners(&["a"]), 0, 64, Utc::now());
        assert!(matches!(result, Err(VaultError::InvalidThreshold { .. })));
    }

    #[test]
    fn create_rejects_duplicates_and_empty_sets() {
        let dup = Vault::create(
            VaultId::generate(),
            owners(&["a", "b", "a"]),
            1,
            64,
            Utc::now(),
        );
        assert!(matches!(dup, Err(VaultError::DuplicateOwner(ref a)) if a.as_str() == "a"));

        let empty = Vault::create(VaultId::generate(), vec![], 1, 64, Utc::now());
        assert!(matches!(empty, Err(VaultError::EmptyOwners)));
    }

    #[test]
    fn create_respects_owner_limit() {
        let result = Vault::create(
            VaultId::generate(),
            owners(&["a", "b", "c"]),
            1,
            2,
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(VaultError::TooManyOwners { count: 3, max: 2 })
        ));
    }

    #[test]
    fn credit_and_debit_track_balance() {
        let mut v = vault(&["a"], 1);
        assert_eq!(v.credit(&sui(), 100).unwrap(), 100);
        assert_eq!(v.debit(&sui(), 40).unwrap(), 60);
        assert_eq!(v.balance(&sui()), 60);
    }

    #[test]
    fn debit_beyond_balance_leaves_vault_untouched() {
        let mut v = vault(&["a"], 1);
        v.credit(&sui(), 10).unwrap();
        let before = v.clone();

        let result = v.debit(&sui(), 11);
        assert!(matches!(
            result,
            Err(VaultError::InsufficientBalance {
                available: 10,
                requested: 11,
                ..
            })
        ));
        assert_eq!(v, before);
    }

    #[test]
    fn credit_overflow_is_rejected() {
        let mut v = vault(&["a"], 1);
        v.credit(&sui(), u64::MAX).unwrap();
        assert!(matches!(
            v.credit(&sui(), 1),
            Err(VaultError::BalanceOverflow { .. })
        ));
        assert_eq!(v.balance(&sui()), u64::MAX);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let mut v = vault(&["a"], 1);
        assert!(matches!(v.credit(&sui(), 0), Err(VaultError::ZeroAmount)));
        assert!(matches!(v.debit(&sui(), 0), Err(VaultError::ZeroAmount)));
    }

    #[test]
    fn add_owner_keeps_threshold() {
        let mut v = vault(&["a", "b"], 2);
        v.add_owner(&addr("c"), 64).unwrap();
        assert_eq!(v.owner_count(), 3);
        assert_eq!(v.threshold(), 2);
        assert!(matches!(
            v.add_owner(&addr("c"), 64),
            Err(VaultError::OwnerAlreadyExists(_))
        ));
    }

    #[test]
    fn remove_owner_down_to_threshold_then_refuse() {
        let mut v = vault(&["a", "b", "c", "d"], 3);
        v.remove_owner(&addr("d")).unwrap();
        assert_eq!(v.owners(), owners(&["a", "b", "c"]).as_slice());

        let before = v.clone();
        assert!(matches!(
            v.remove_owner(&addr("c")),
            Err(VaultError::CannotRemoveOwner {
                owners: 2,
                threshold: 3
            })
        ));
        assert_eq!(v, before);
    }

    #[test]
    fn remove_unknown_owner_fails() {
        let mut v = vault(&["a", "b"], 1);
        assert!(matches!(
            v.remove_owner(&addr("z")),
            Err(VaultError::OwnerNotFound(_))
        ));
    }

    #[test]
    fn set_threshold_validates_range() {
        let mut v = vault(&["a", "b", "c"], 2);
        assert_eq!(v.set_threshold(3).unwrap(), 2);
        assert!(v.set_threshold(0).is_err());
        assert!(v.set_threshold(4).is_err());
        assert_eq!(v.threshold(), 3);
    }

    #[test]
    fn nonce_increases_by_one() {
        let mut v = vault(&["a"], 1);
        let now = Utc::now();
        assert_eq!(v.bump_nonce(now), 1);
        assert_eq!(v.bump_nonce(now), 2);
        assert_eq!(v.nonce(), 2);
    }
}

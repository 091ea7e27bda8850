//! # Settlement Ledger
//!
//! The engine-wide half of every commit: the event journal (sequence
//! numbers and hash chain) and the balances of external accounts that
//! receive vault transfers.
//!
//! The ledger sits behind a single mutex inside the engine. Commits lock
//! their vault first and the ledger second, which gives the journal one
//! total order that agrees with every vault's own order.
//!
//! An in-memory ledger keeps every record. A ledger resumed from disk
//! keeps only the head of the chain; the records themselves are read back
//! from the database.

use std::collections::BTreeMap;

use crate::error::{VaultError, VaultResult};
use crate::events::{EventDraft, EventRecord, GENESIS_HASH};
use crate::storage::StoreError;
use crate::types::{Address, AssetId};

/// A recipient balance computed ahead of commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCredit {
    pub address: Address,
    pub asset: AssetId,
    /// Balance after the credit.
    pub balance: u64,
}

/// Journal head plus recipient balances.
#[derive(Debug)]
pub struct Ledger {
    next_sequence: u64,
    head_hash: String,
    /// Every record, for ledgers without a database behind them.
    events: Option<Vec<EventRecord>>,
    accounts: BTreeMap<Address, BTreeMap<AssetId, u64>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates an empty ledger that keeps its records in memory.
    pub fn new() -> Self {
        Self {
            next_sequence: 0,
            head_hash: GENESIS_HASH.to_string(),
            events: Some(Vec::new()),
            accounts: BTreeMap::new(),
        }
    }

    /// Resumes a persisted journal whose newest record is `head`. The
    /// caller is responsible for having verified the journal.
    pub fn resume(
        head: Option<&EventRecord>,
        accounts: BTreeMap<Address, BTreeMap<AssetId, u64>>,
    ) -> Self {
        Self {
            next_sequence: head.map_or(0, |r| r.sequence + 1),
            head_hash: head.map_or_else(|| GENESIS_HASH.to_string(), |r| r.hash.clone()),
            events: None,
            accounts,
        }
    }

    /// Sequence number the next record will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Hash of the newest record, or the genesis hash for an empty journal.
    pub fn head_hash(&self) -> &str {
        &self.head_hash
    }

    /// Number of records in the journal.
    pub fn len(&self) -> u64 {
        self.next_sequence
    }

    /// Returns `true` if nothing has been committed yet.
    pub fn is_empty(&self) -> bool {
        self.next_sequence == 0
    }

    /// Balance of `asset` held by external account `address`.
    pub fn account_balance(&self, address: &Address, asset: &AssetId) -> u64 {
        self.accounts
            .get(address)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or(0)
    }

    /// Every external account with its balances.
    pub fn accounts(&self) -> &BTreeMap<Address, BTreeMap<AssetId, u64>> {
        &self.accounts
    }

    /// Computes a recipient credit without applying it.
    ///
    /// # Errors
    ///
    /// [`VaultError::BalanceOverflow`] if the recipient's balance would
    /// exceed `u64::MAX`.
    pub fn stage_credit(
        &self,
        address: &Address,
        asset: &AssetId,
        amount: u64,
    ) -> VaultResult<AccountCredit> {
        let balance = self
            .account_balance(address, asset)
            .checked_add(amount)
            .ok_or_else(|| VaultError::BalanceOverflow {
                asset: asset.clone(),
            })?;
        Ok(AccountCredit {
            address: address.clone(),
            asset: asset.clone(),
            balance,
        })
    }

    /// Assigns sequence numbers and hashes to `drafts`, chaining from the
    /// current head. Nothing is appended yet.
    pub fn seal(&self, drafts: Vec<EventDraft>) -> Result<Vec<EventRecord>, StoreError> {
        let mut prev = self.head_hash().to_string();
        let mut sequence = self.next_sequence();
        let mut sealed = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let record = EventRecord::seal(draft, sequence, &prev)?;
            prev = record.hash.clone();
            sequence += 1;
            sealed.push(record);
        }
        Ok(sealed)
    }

    /// Appends sealed records and applies a staged credit.
    pub fn append(&mut self, records: Vec<EventRecord>, credit: Option<AccountCredit>) {
        if let Some(last) = records.last() {
            self.next_sequence = last.sequence + 1;
            self.head_hash = last.hash.clone();
        }
        if let Some(events) = &mut self.events {
            events.extend(records);
        }
        if let Some(credit) = credit {
            self.accounts
                .entry(credit.address)
                .or_default()
                .insert(credit.asset, credit.balance);
        }
    }

    /// Up to `limit` records starting at sequence `since`, or `None` if
    /// this ledger does not keep its records.
    pub fn since(&self, since: u64, limit: usize) -> Option<Vec<EventRecord>> {
        let start = usize::try_from(since).unwrap_or(usize::MAX);
        self.events
            .as_ref()
            .map(|events| events.iter().skip(start).take(limit).cloned().collect())
    }

    /// The full journal, if this ledger keeps its records.
    pub fn events(&self) -> Option<&[EventRecord]> {
        self.events.as_deref()
    }
}

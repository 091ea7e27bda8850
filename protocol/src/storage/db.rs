//! # VaultDb: Persistent Storage Engine
//!
//! Every committed engine operation passes through this module, written to
//! sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree        | Key                            | Value                |
//! |-------------|--------------------------------|----------------------|
//! | `vaults`    | vault id (16B)                 | `bincode(Vault)`     |
//! | `proposals` | proposal id (16B)              | `bincode(Proposal)`  |
//! | `accounts`  | `address` `0x00` `asset`       | balance (8B BE)      |
//! | `events`    | `sequence` (8B BE)             | `bincode(EventRecord)` |
//! | `metadata`  | key (UTF-8)                    | value (bytes)        |
//!
//! Sequence numbers are big-endian so that sled's lexicographic order
//! matches numeric order and a full scan of `events` yields the journal in
//! sequence order.
//!
//! ## Atomicity
//!
//! A commit writes the vault snapshot, the touched proposal, a recipient
//! credit and the new events in one sled transaction across all four
//! trees. Either everything lands or nothing does, so the journal and the
//! snapshots can never disagree after a crash.
//!
//! [`VaultDb::commit`] does not flush. Once it returns `Ok` the write is
//! visible to every reader of the database; [`VaultDb::flush`] makes it
//! durable and may fail independently.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};

use super::{StoreError, StoreResult};
use crate::config::EVENT_SCHEMA_VERSION;
use crate::events::EventRecord;
use crate::ledger::AccountCredit;
use crate::proposal::Proposal;
use crate::types::{Address, AssetId};
use crate::vault::Vault;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

/// Event schema version the journal was written with.
const META_SCHEMA_VERSION: &[u8] = b"event_schema_version";

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn account_key(address: &Address, asset: &AssetId) -> Vec<u8> {
    let mut key = Vec::with_capacity(address.as_str().len() + 1 + asset.as_str().len());
    key.extend_from_slice(address.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(asset.as_str().as_bytes());
    key
}

fn split_account_key(key: &[u8]) -> StoreResult<(Address, AssetId)> {
    let corrupted = || StoreError::Corrupted("malformed account key".to_string());
    let sep = key.iter().position(|b| *b == 0).ok_or_else(corrupted)?;
    let address = std::str::from_utf8(&key[..sep]).map_err(|_| corrupted())?;
    let asset = std::str::from_utf8(&key[sep + 1..]).map_err(|_| corrupted())?;
    Ok((
        Address::new(address).map_err(|_| corrupted())?,
        AssetId::new(asset).map_err(|_| corrupted())?,
    ))
}

fn decode_u64(bytes: &[u8]) -> StoreResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization("invalid u64 bytes".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything stored on disk, loaded in one pass at startup.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub vaults: Vec<Vault>,
    pub proposals: Vec<Proposal>,
    pub accounts: BTreeMap<Address, BTreeMap<AssetId, u64>>,
    /// The journal, in sequence order.
    pub events: Vec<EventRecord>,
}

// ---------------------------------------------------------------------------
// VaultDb
// ---------------------------------------------------------------------------

/// Persistent storage for vaults, proposals, recipient balances and the
/// event journal.
///
/// Cheap to clone; clones share the same sled handle.
#[derive(Debug, Clone)]
pub struct VaultDb {
    db: Db,
    vaults: Tree,
    proposals: Tree,
    accounts: Tree,
    events: Tree,
    metadata: Tree,
    #[cfg(test)]
    failing_flushes: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl VaultDb {
    /// Open or create a database at the given filesystem path.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupted`] if the database was written with a
    /// different event schema version.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a database that lives in memory and is discarded on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let store = Self {
            vaults: db.open_tree("vaults")?,
            proposals: db.open_tree("proposals")?,
            accounts: db.open_tree("accounts")?,
            events: db.open_tree("events")?,
            metadata: db.open_tree("metadata")?,
            db,
            #[cfg(test)]
            failing_flushes: Default::default(),
        };
        store.check_schema()?;
        Ok(store)
    }

    fn check_schema(&self) -> StoreResult<()> {
        let current = EVENT_SCHEMA_VERSION.to_be_bytes();
        match self.metadata.get(META_SCHEMA_VERSION)? {
            Some(stored) if stored.as_ref() == current => Ok(()),
            Some(stored) => Err(StoreError::Corrupted(format!(
                "event schema version {:?} does not match {}",
                stored.as_ref(),
                EVENT_SCHEMA_VERSION
            ))),
            None => {
                self.metadata.insert(META_SCHEMA_VERSION, &current[..])?;
                Ok(())
            }
        }
    }

    // -- Writes -------------------------------------------------------------

    /// Persists one engine commit atomically.
    ///
    /// Writes the vault snapshot, the touched proposal (if any), the
    /// recipient credit (if any) and `events`. Call [`flush`](Self::flush)
    /// afterwards to make the write durable.
    pub fn commit(
        &self,
        vault: &Vault,
        proposal: Option<&Proposal>,
        credit: Option<&AccountCredit>,
        events: &[EventRecord],
    ) -> StoreResult<()> {
        // Encode up front: the transaction closure may run more than once.
        let vault_bytes = encode(vault)?;
        let proposal_entry = proposal
            .map(|p| encode(p).map(|bytes| (p.id.as_bytes().to_vec(), bytes)))
            .transpose()?;
        let credit_entry = credit.map(|c| {
            (
                account_key(&c.address, &c.asset),
                c.balance.to_be_bytes().to_vec(),
            )
        });
        let event_entries = events
            .iter()
            .map(|e| encode(e).map(|bytes| (e.sequence.to_be_bytes().to_vec(), bytes)))
            .collect::<StoreResult<Vec<_>>>()?;

        (&self.vaults, &self.proposals, &self.accounts, &self.events)
            .transaction(|(vaults, proposals, accounts, journal)| {
                vaults.insert(&vault.id.as_bytes()[..], &vault_bytes[..])?;
                if let Some((key, bytes)) = &proposal_entry {
                    proposals.insert(&key[..], &bytes[..])?;
                }
                if let Some((key, balance)) = &credit_entry {
                    accounts.insert(&key[..], &balance[..])?;
                }
                for (key, bytes) in &event_entries {
                    journal.insert(&key[..], &bytes[..])?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| StoreError::Transaction(format!("{e:?}")))?;
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    /// Loads every stored vault, proposal, account balance and event.
    pub fn load_snapshot(&self) -> StoreResult<Snapshot> {
        let mut snapshot = Snapshot::default();

        for entry in self.vaults.iter() {
            let (_key, value) = entry?;
            snapshot.vaults.push(decode(&value)?);
        }
        for entry in self.proposals.iter() {
            let (_key, value) = entry?;
            snapshot.proposals.push(decode(&value)?);
        }
        for entry in self.accounts.iter() {
            let (key, value) = entry?;
            let (address, asset) = split_account_key(&key)?;
            snapshot
                .accounts
                .entry(address)
                .or_default()
                .insert(asset, decode_u64(&value)?);
        }
        snapshot.events = self.load_events()?;

        Ok(snapshot)
    }

    /// Loads the journal in sequence order.
    pub fn load_events(&self) -> StoreResult<Vec<EventRecord>> {
        let mut events = Vec::with_capacity(self.events.len());
        for entry in self.events.iter() {
            let (_key, value) = entry?;
            events.push(decode(&value)?);
        }
        Ok(events)
    }

    /// Up to `limit` records with `since <= sequence < end`, in order.
    pub fn events_range(&self, since: u64, end: u64, limit: usize) -> StoreResult<Vec<EventRecord>> {
        if since >= end {
            return Ok(Vec::new());
        }
        self.events
            .range(since.to_be_bytes()..end.to_be_bytes())
            .take(limit)
            .map(|entry| {
                let (_key, value) = entry?;
                decode(&value)
            })
            .collect()
    }

    /// Number of events in the journal.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Number of stored vaults.
    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> StoreResult<()> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            let failing = &self.failing_flushes;
            if failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Sled(sled::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "simulated fsync failure",
                ))));
            }
        }
        self.db.flush()?;
        Ok(())
    }

    /// Makes the next `count` calls to [`flush`](Self::flush) fail.
    #[cfg(test)]
    pub(crate) fn fail_next_flushes(&self, count: usize) {
        self.failing_flushes
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDraft, EventKind, GENESIS_HASH};
    use crate::proposal::ProposalAction;
    use crate::types::{ProposalId, VaultId};
    use chrono::{Duration, Utc};

    // -- Helpers ------------------------------------------------------------

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn sui() -> AssetId {
        AssetId::new("SUI").unwrap()
    }

    fn vault() -> Vault {
        Vault::create(
            VaultId::generate(),
            vec![addr("alice"), addr("bob")],
            2,
            64,
            Utc::now(),
        )
        .unwrap()
    }

    fn event(vault: &Vault, sequence: u64, prev: &str) -> EventRecord {
        EventRecord::seal(
            EventDraft {
                vault_id: vault.id,
                proposal_id: None,
                actor: addr("alice"),
                timestamp: Utc::now(),
                vault_nonce: vault.nonce(),
                kind: EventKind::VaultCreated {
                    owners: vault.owners().to_vec(),
                    threshold: vault.threshold(),
                },
            },
            sequence,
            prev,
        )
        .unwrap()
    }

    // -- Tests --------------------------------------------------------------

    #[test]
    fn open_temporary_database() {
        let db = VaultDb::open_temporary().expect("should create temp db");
        assert_eq!(db.event_count(), 0);
        assert_eq!(db.vault_count(), 0);
        let snapshot = db.load_snapshot().unwrap();
        assert!(snapshot.vaults.is_empty());
        assert!(snapshot.events.is_empty());
    }

    #[test]
    fn commit_writes_every_tree() {
        let db = VaultDb::open_temporary().unwrap();
        let mut v = vault();
        v.credit(&sui(), 500).unwrap();
        let now = Utc::now();
        let proposal = Proposal::new(
            ProposalId::generate(),
            v.id,
            addr("alice"),
            ProposalAction::AddOwner { owner: addr("carol") },
            now,
            now + Duration::days(1),
        );
        let credit = AccountCredit {
            address: addr("recipient"),
            asset: sui(),
            balance: 42,
        };
        let record = event(&v, 0, GENESIS_HASH);

        db.commit(&v, Some(&proposal), Some(&credit), &[record.clone()])
            .unwrap();

        let snapshot = db.load_snapshot().unwrap();
        assert_eq!(snapshot.vaults, vec![v]);
        assert_eq!(snapshot.proposals, vec![proposal]);
        assert_eq!(snapshot.accounts[&addr("recipient")][&sui()], 42);
        assert_eq!(snapshot.events, vec![record]);
    }

    #[test]
    fn later_commits_overwrite_snapshots() {
        let db = VaultDb::open_temporary().unwrap();
        let mut v = vault();
        let first = event(&v, 0, GENESIS_HASH);
        db.commit(&v, None, None, &[first.clone()]).unwrap();

        v.bump_nonce(Utc::now());
        let second = event(&v, 1, &first.hash);
        db.commit(&v, None, None, &[second]).unwrap();

        let snapshot = db.load_snapshot().unwrap();
        assert_eq!(snapshot.vaults.len(), 1);
        assert_eq!(snapshot.vaults[0].nonce(), 1);
        assert_eq!(db.event_count(), 2);
    }

    #[test]
    fn events_load_in_sequence_order() {
        let db = VaultDb::open_temporary().unwrap();
        let v = vault();
        let mut prev = GENESIS_HASH.to_string();
        let mut records = Vec::new();
        // 256 crosses a byte boundary in the big-endian key.
        for seq in 0..300 {
            let record = event(&v, seq, &prev);
            prev = record.hash.clone();
            records.push(record);
        }
        db.commit(&v, None, None, &records).unwrap();

        let seqs: Vec<u64> = db.load_events().unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, (0..300).collect::<Vec<_>>());

        let page = db.events_range(250, 300, 10).unwrap();
        assert_eq!(page.first().map(|e| e.sequence), Some(250));
        assert_eq!(page.len(), 10);
        assert_eq!(db.events_range(295, 298, 10).unwrap().len(), 3);
        assert!(db.events_range(300, 300, 10).unwrap().is_empty());
    }

    #[test]
    fn account_keys_split_back_into_parts() {
        let key = account_key(&addr("0xabc"), &sui());
        let (address, asset) = split_account_key(&key).unwrap();
        assert_eq!(address, addr("0xabc"));
        assert_eq!(asset, sui());
        assert!(split_account_key(b"no-separator").is_err());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let v = vault();
        let record = event(&v, 0, GENESIS_HASH);
        {
            let db = VaultDb::open(dir.path()).expect("should open db");
            db.commit(&v, None, None, &[record.clone()]).unwrap();
            db.flush().unwrap();
        }

        let db = VaultDb::open(dir.path()).expect("should reopen db");
        let snapshot = db.load_snapshot().unwrap();
        assert_eq!(snapshot.vaults, vec![v]);
        assert_eq!(snapshot.events, vec![record]);
    }

    #[test]
    fn schema_mismatch_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = sled::open(dir.path()).unwrap();
            let meta = db.open_tree("metadata").unwrap();
            meta.insert(META_SCHEMA_VERSION, &99u16.to_be_bytes()[..])
                .unwrap();
            db.flush().unwrap();
        }
        assert!(matches!(
            VaultDb::open(dir.path()),
            Err(StoreError::Corrupted(_))
        ));
    }
}

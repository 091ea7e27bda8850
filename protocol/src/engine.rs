//! # Vault Engine
//!
//! The single entry point for every vault operation. The engine composes
//! the authorization rules, the execution dispatcher and the event ledger,
//! and owns all in-memory state.
//!
//! ## Concurrency
//!
//! - Each vault and its proposals live in one `VaultCell` behind a
//!   `parking_lot::Mutex`. Cells are held in a `DashMap` so lookups on
//!   different vaults never contend.
//! - A second `DashMap` maps proposal ids to their vault, which makes
//!   proposals addressable on their own.
//! - Commits additionally take the global ledger mutex, always *after* the
//!   vault cell. The ledger hands out sequence numbers, so the journal's
//!   order agrees with every vault's own order.
//! - Handles are cloned out of the maps before any mutex is taken; no map
//!   guard is ever held while waiting on a cell or the ledger.
//!
//! ## Commit protocol
//!
//! Every operation validates, then stages its changes on clones of the
//! vault and proposal. The commit then:
//!
//! 1. stages the recipient credit (transfers only),
//! 2. seals the events into the hash chain,
//! 3. writes everything to [`VaultDb`] in one transaction (if persistent),
//! 4. swaps the staged state into the cell,
//! 5. appends to the journal, flushes, and publishes to every [`EventSink`].
//!
//! A failure in steps 1 to 3 discards the staged clones, so callers never
//! observe a partial mutation. Once the transaction succeeds the commit is
//! final. A failed flush is logged and retried at the start of the next
//! commit, which is refused until the retry succeeds.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::authorization;
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, MAX_EVENTS_PER_PAGE};
use crate::dispatcher::{Effect, ExecutionDispatcher};
use crate::error::{VaultError, VaultResult};
use crate::events::{EventDraft, EventKind, EventRecord, EventSink};
use crate::ledger::Ledger;
use crate::projection::{Projection, ReplayError};
use crate::proposal::{Proposal, ProposalAction, ProposalStatus, ProposalStore};
use crate::storage::{StoreError, VaultDb};
use crate::types::{Address, AssetId, ProposalId, VaultId};
use crate::vault::Vault;

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// Proof of a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub proposal_id: ProposalId,
    pub vault_id: VaultId,
    /// The vault's nonce after execution.
    pub vault_nonce: u64,
    pub executed_at: DateTime<Utc>,
    pub effect: Effect,
}

/// A proposal together with its status at the time it was read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalView {
    pub proposal: Proposal,
    pub status: ProposalStatus,
    /// Number of recorded approvals.
    pub approvals: usize,
    /// The vault's current threshold.
    pub threshold: u32,
}

impl ProposalView {
    fn new(proposal: &Proposal, vault: &Vault, now: DateTime<Utc>) -> Self {
        Self {
            proposal: proposal.clone(),
            status: proposal.status(vault, now),
            approvals: proposal.approval_count(),
            threshold: vault.threshold(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// A vault and everything that is serialized with it.
#[derive(Debug)]
struct VaultCell {
    vault: Vault,
    proposals: ProposalStore,
}

impl VaultCell {
    fn install(&mut self, vault: Vault, proposal: Option<Proposal>) {
        self.vault = vault;
        if let Some(p) = proposal {
            self.proposals.put(p);
        }
    }
}

type CellHandle = Arc<Mutex<VaultCell>>;

/// Changes validated on clones, waiting to be committed.
struct Staged {
    vault: Vault,
    proposal: Option<Proposal>,
    settlement: Option<(Address, AssetId, u64)>,
    drafts: Vec<EventDraft>,
}

fn effect_event(effect: &Effect) -> EventKind {
    match effect.clone() {
        Effect::Transfer {
            asset,
            recipient,
            amount,
            remaining,
        } => EventKind::TransferCompleted {
            asset,
            recipient,
            amount,
            remaining,
        },
        Effect::OwnerAdded { owner, owner_count } => EventKind::OwnerAdded { owner, owner_count },
        Effect::OwnerRemoved { owner, owner_count } => {
            EventKind::OwnerRemoved { owner, owner_count }
        }
        Effect::ThresholdUpdated {
            previous,
            threshold,
        } => EventKind::ThresholdUpdated {
            previous,
            threshold,
        },
    }
}

fn corrupted(err: ReplayError) -> VaultError {
    VaultError::Storage(StoreError::Corrupted(err.to_string()))
}

// ---------------------------------------------------------------------------
// VaultEngine
// ---------------------------------------------------------------------------

/// Multi-owner vault authorization and execution engine.
///
/// All methods take `&self`; share the engine across threads with `Arc`.
pub struct VaultEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    dispatcher: ExecutionDispatcher,
    vaults: DashMap<VaultId, CellHandle>,
    proposal_index: DashMap<ProposalId, VaultId>,
    ledger: Mutex<Ledger>,
    db: Option<VaultDb>,
    /// Set when a committed write could not be flushed.
    unflushed: AtomicBool,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl VaultEngine {
    /// Creates an engine that keeps state in memory only.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            dispatcher: ExecutionDispatcher::new(config.max_owners),
            config,
            clock,
            vaults: DashMap::new(),
            proposal_index: DashMap::new(),
            ledger: Mutex::new(Ledger::new()),
            db: None,
            unflushed: AtomicBool::new(false),
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// In-memory engine with default configuration and the system clock.
    pub fn in_memory() -> Self {
        Self::new(EngineConfig::default(), Arc::new(SystemClock))
    }

    /// Opens a persistent engine, restoring whatever `db` holds.
    ///
    /// The stored journal is replayed from sequence 0 and the result must
    /// match the stored snapshots exactly.
    ///
    /// # Errors
    ///
    /// [`VaultError::Storage`] with [`StoreError::Corrupted`] if the journal
    /// fails verification or disagrees with the snapshots.
    pub fn open(db: VaultDb, config: EngineConfig, clock: Arc<dyn Clock>) -> VaultResult<Self> {
        let snapshot = db.load_snapshot()?;
        let projection = Projection::replay(&snapshot.events).map_err(corrupted)?;
        projection.check_snapshot(&snapshot).map_err(corrupted)?;

        let mut engine = Self::new(config, clock);
        let Projection {
            vaults,
            proposals,
            accounts,
        } = projection;

        let mut cells: BTreeMap<VaultId, VaultCell> = vaults
            .into_iter()
            .map(|(id, vault)| {
                (
                    id,
                    VaultCell {
                        vault,
                        proposals: ProposalStore::new(),
                    },
                )
            })
            .collect();
        for (id, proposal) in proposals {
            let cell = cells.get_mut(&proposal.vault_id).ok_or_else(|| {
                corrupted(ReplayError::SnapshotMismatch(format!(
                    "proposal {id} has no vault"
                )))
            })?;
            engine.proposal_index.insert(id, proposal.vault_id);
            cell.proposals.put(proposal);
        }
        for (id, cell) in cells {
            engine.vaults.insert(id, Arc::new(Mutex::new(cell)));
        }

        let event_count = snapshot.events.len();
        engine.ledger = Mutex::new(Ledger::resume(snapshot.events.last(), accounts));
        engine.db = Some(db);

        info!(
            vaults = engine.vaults.len(),
            proposals = engine.proposal_index.len(),
            events = event_count,
            "engine state restored"
        );
        Ok(engine)
    }

    /// Registers a consumer for committed events.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time according to the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns `true` if commits are written to disk.
    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    /// Returns `false` while a committed write is waiting for a successful
    /// flush.
    pub fn is_durable(&self) -> bool {
        !self.unflushed.load(Ordering::SeqCst)
    }

    // -- Lookup helpers -----------------------------------------------------

    fn cell(&self, vault_id: VaultId) -> VaultResult<CellHandle> {
        self.vaults
            .get(&vault_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(VaultError::VaultNotFound(vault_id))
    }

    /// Resolves the cell owning `proposal_id`. With `expected` set, the
    /// proposal must belong to that vault.
    fn proposal_cell(
        &self,
        expected: Option<VaultId>,
        proposal_id: ProposalId,
    ) -> VaultResult<CellHandle> {
        if let Some(expected) = expected {
            if !self.vaults.contains_key(&expected) {
                return Err(VaultError::VaultNotFound(expected));
            }
        }
        let actual = self
            .proposal_index
            .get(&proposal_id)
            .map(|entry| *entry.value())
            .ok_or(VaultError::ProposalNotFound(proposal_id))?;
        if let Some(expected) = expected {
            if expected != actual {
                return Err(VaultError::ProposalBelongsToDifferentVault {
                    proposal_id,
                    expected,
                    actual,
                });
            }
        }
        self.cell(actual)
    }

    // -- Commit -------------------------------------------------------------

    fn commit<F>(&self, staged: Staged, install: F) -> VaultResult<Vec<EventRecord>>
    where
        F: FnOnce(Vault, Option<Proposal>),
    {
        let Staged {
            vault,
            proposal,
            settlement,
            drafts,
        } = staged;

        let mut ledger = self.ledger.lock();
        if let Some(db) = &self.db {
            if self.unflushed.load(Ordering::SeqCst) {
                db.flush()?;
                self.unflushed.store(false, Ordering::SeqCst);
                info!(sequence = ledger.next_sequence(), "journal flush recovered");
            }
        }

        let credit = settlement
            .map(|(address, asset, amount)| ledger.stage_credit(&address, &asset, amount))
            .transpose()?;
        let records = ledger.seal(drafts)?;

        if let Some(db) = &self.db {
            db.commit(&vault, proposal.as_ref(), credit.as_ref(), &records)?;
        }

        install(vault, proposal);
        ledger.append(records.clone(), credit);

        if let Some(db) = &self.db {
            if let Err(e) = db.flush() {
                self.unflushed.store(true, Ordering::SeqCst);
                error!(
                    error = %e,
                    sequence = ledger.next_sequence(),
                    "journal flush failed; commit applied but not yet durable"
                );
            }
        }

        let sinks = self.sinks.read();
        for record in &records {
            for sink in sinks.iter() {
                sink.publish(record);
            }
        }
        Ok(records)
    }

    // -- Vault operations ---------------------------------------------------

    /// Creates a vault. The first listed owner is recorded as the actor.
    ///
    /// # Errors
    ///
    /// `EmptyOwners`, `TooManyOwners`, `DuplicateOwner`, `InvalidThreshold`.
    pub fn create_vault(&self, owners: Vec<Address>, threshold: u32) -> VaultResult<VaultId> {
        let now = self.clock.now();
        let id = VaultId::generate();
        let vault = Vault::create(id, owners, threshold, self.config.max_owners, now)?;
        let actor = vault.owners()[0].clone();

        let draft = EventDraft {
            vault_id: id,
            proposal_id: None,
            actor,
            timestamp: now,
            vault_nonce: vault.nonce(),
            kind: EventKind::VaultCreated {
                owners: vault.owners().to_vec(),
                threshold,
            },
        };
        let owner_count = vault.owner_count();

        self.commit(
            Staged {
                vault,
                proposal: None,
                settlement: None,
                drafts: vec![draft],
            },
            |vault, _| {
                let cell = VaultCell {
                    vault,
                    proposals: ProposalStore::new(),
                };
                self.vaults.insert(id, Arc::new(Mutex::new(cell)));
            },
        )?;

        info!(vault_id = %id, owners = owner_count, threshold, "vault created");
        Ok(id)
    }

    /// Credits `amount` of `asset` to a vault. Anyone may deposit; the
    /// depositor is recorded on the event. Returns the new balance.
    ///
    /// # Errors
    ///
    /// `VaultNotFound`, `ZeroAmount`, `BalanceOverflow`.
    pub fn deposit(
        &self,
        vault_id: VaultId,
        depositor: &Address,
        asset: &AssetId,
        amount: u64,
    ) -> VaultResult<u64> {
        let handle = self.cell(vault_id)?;
        let mut cell = handle.lock();
        let now = self.clock.now();

        let mut vault = cell.vault.clone();
        let nonce = vault.bump_nonce(now);
        let balance = vault.credit(asset, amount)?;

        let draft = EventDraft {
            vault_id,
            proposal_id: None,
            actor: depositor.clone(),
            timestamp: now,
            vault_nonce: nonce,
            kind: EventKind::Deposited {
                asset: asset.clone(),
                amount,
                balance,
            },
        };
        self.commit(
            Staged {
                vault,
                proposal: None,
                settlement: None,
                drafts: vec![draft],
            },
            |vault, proposal| cell.install(vault, proposal),
        )?;

        debug!(vault_id = %vault_id, %asset, amount, balance, "deposit committed");
        Ok(balance)
    }

    /// Balance of `asset` in a vault, zero for assets it never held.
    pub fn get_balance(&self, vault_id: VaultId, asset: &AssetId) -> VaultResult<u64> {
        Ok(self.cell(vault_id)?.lock().vault.balance(asset))
    }

    /// Snapshot of a vault.
    pub fn get_vault(&self, vault_id: VaultId) -> VaultResult<Vault> {
        Ok(self.cell(vault_id)?.lock().vault.clone())
    }

    /// Snapshots of every vault, oldest first.
    pub fn list_vaults(&self) -> Vec<Vault> {
        let handles: Vec<CellHandle> = self
            .vaults
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut vaults: Vec<Vault> = handles.iter().map(|h| h.lock().vault.clone()).collect();
        vaults.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        vaults
    }

    /// Number of vaults.
    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    // -- Proposal operations ------------------------------------------------

    /// Creates a proposal. The proposer is **not** counted as an approval.
    ///
    /// `expiry` overrides the configured default lifetime.
    ///
    /// # Errors
    ///
    /// `VaultNotFound`, `NotOwner`, `ZeroAmount`, `InvalidExpiry`.
    pub fn propose(
        &self,
        vault_id: VaultId,
        proposer: &Address,
        action: ProposalAction,
        expiry: Option<Duration>,
    ) -> VaultResult<ProposalId> {
        let handle = self.cell(vault_id)?;
        let mut cell = handle.lock();
        let now = self.clock.now();

        authorization::check_propose(&cell.vault, proposer, &action)?;
        let expires_at = authorization::resolve_expiry(&self.config, now, expiry)?;

        let mut vault = cell.vault.clone();
        let nonce = vault.bump_nonce(now);
        let id = ProposalId::generate();
        let kind = action.kind();
        let proposal = Proposal::new(id, vault_id, proposer.clone(), action.clone(), now, expires_at);

        let draft = EventDraft {
            vault_id,
            proposal_id: Some(id),
            actor: proposer.clone(),
            timestamp: now,
            vault_nonce: nonce,
            kind: EventKind::ProposalCreated { action, expires_at },
        };
        self.commit(
            Staged {
                vault,
                proposal: Some(proposal),
                settlement: None,
                drafts: vec![draft],
            },
            |vault, proposal| {
                self.proposal_index.insert(id, vault_id);
                cell.install(vault, proposal);
            },
        )?;

        info!(vault_id = %vault_id, proposal_id = %id, %kind, %proposer, "proposal created");
        Ok(id)
    }

    /// Proposes moving `amount` of `asset` to `recipient`.
    pub fn propose_transfer(
        &self,
        vault_id: VaultId,
        proposer: &Address,
        asset: AssetId,
        recipient: Address,
        amount: u64,
        expiry: Option<Duration>,
    ) -> VaultResult<ProposalId> {
        self.propose(
            vault_id,
            proposer,
            ProposalAction::Transfer {
                asset,
                recipient,
                amount,
            },
            expiry,
        )
    }

    /// Proposes adding `owner`.
    pub fn propose_add_owner(
        &self,
        vault_id: VaultId,
        proposer: &Address,
        owner: Address,
        expiry: Option<Duration>,
    ) -> VaultResult<ProposalId> {
        self.propose(vault_id, proposer, ProposalAction::AddOwner { owner }, expiry)
    }

    /// Proposes removing `owner`.
    pub fn propose_remove_owner(
        &self,
        vault_id: VaultId,
        proposer: &Address,
        owner: Address,
        expiry: Option<Duration>,
    ) -> VaultResult<ProposalId> {
        self.propose(vault_id, proposer, ProposalAction::RemoveOwner { owner }, expiry)
    }

    /// Proposes a new threshold.
    pub fn propose_update_threshold(
        &self,
        vault_id: VaultId,
        proposer: &Address,
        threshold: u32,
        expiry: Option<Duration>,
    ) -> VaultResult<ProposalId> {
        self.propose(
            vault_id,
            proposer,
            ProposalAction::UpdateThreshold { threshold },
            expiry,
        )
    }

    /// Records an approval. Returns the number of approvals from current
    /// owners.
    ///
    /// # Errors
    ///
    /// `ProposalNotFound`, `NotOwner`, `ProposalCancelled`, `AlreadyExecuted`,
    /// `ProposalExpired`, `AlreadyApproved`.
    pub fn approve(&self, proposal_id: ProposalId, approver: &Address) -> VaultResult<usize> {
        self.approve_checked(None, proposal_id, approver)
    }

    /// [`approve`](Self::approve), additionally requiring that the proposal
    /// belongs to `vault_id`.
    pub fn approve_in(
        &self,
        vault_id: VaultId,
        proposal_id: ProposalId,
        approver: &Address,
    ) -> VaultResult<usize> {
        self.approve_checked(Some(vault_id), proposal_id, approver)
    }

    fn approve_checked(
        &self,
        expected: Option<VaultId>,
        proposal_id: ProposalId,
        approver: &Address,
    ) -> VaultResult<usize> {
        let handle = self.proposal_cell(expected, proposal_id)?;
        let mut cell = handle.lock();
        let now = self.clock.now();

        let mut proposal = cell
            .proposals
            .get(&proposal_id)
            .cloned()
            .ok_or(VaultError::ProposalNotFound(proposal_id))?;
        authorization::check_approve(&cell.vault, &proposal, approver, now)?;

        let mut vault = cell.vault.clone();
        let nonce = vault.bump_nonce(now);
        proposal.record_approval(approver)?;
        let approvals = proposal.approval_count();
        let threshold = vault.threshold();

        let draft = EventDraft {
            vault_id: vault.id,
            proposal_id: Some(proposal_id),
            actor: approver.clone(),
            timestamp: now,
            vault_nonce: nonce,
            kind: EventKind::ProposalApproved {
                approvals,
                threshold,
            },
        };
        self.commit(
            Staged {
                vault,
                proposal: Some(proposal),
                settlement: None,
                drafts: vec![draft],
            },
            |vault, proposal| cell.install(vault, proposal),
        )?;

        debug!(
            proposal_id = %proposal_id,
            %approver,
            approvals,
            threshold,
            "approval recorded"
        );
        Ok(approvals)
    }

    /// Executes a proposal that has reached quorum and applies its effect.
    ///
    /// Exactly one concurrent caller can succeed; every other caller sees
    /// `AlreadyExecuted`.
    ///
    /// # Errors
    ///
    /// `ProposalNotFound`, `NotOwner`, `ProposalCancelled`, `AlreadyExecuted`,
    /// `ProposalExpired`, `InsufficientApprovals`, plus the effect's own
    /// preconditions (`InsufficientBalance`, `OwnerAlreadyExists`,
    /// `TooManyOwners`, `OwnerNotFound`, `CannotRemoveOwner`,
    /// `InvalidThreshold`) and `BalanceOverflow` on the recipient side.
    pub fn execute(&self, proposal_id: ProposalId, executor: &Address) -> VaultResult<Receipt> {
        self.execute_checked(None, proposal_id, executor)
    }

    /// [`execute`](Self::execute), additionally requiring that the proposal
    /// belongs to `vault_id`.
    pub fn execute_in(
        &self,
        vault_id: VaultId,
        proposal_id: ProposalId,
        executor: &Address,
    ) -> VaultResult<Receipt> {
        self.execute_checked(Some(vault_id), proposal_id, executor)
    }

    fn execute_checked(
        &self,
        expected: Option<VaultId>,
        proposal_id: ProposalId,
        executor: &Address,
    ) -> VaultResult<Receipt> {
        let handle = self.proposal_cell(expected, proposal_id)?;
        let mut cell = handle.lock();
        let now = self.clock.now();

        let mut proposal = cell
            .proposals
            .get(&proposal_id)
            .cloned()
            .ok_or(VaultError::ProposalNotFound(proposal_id))?;
        authorization::check_execute(&cell.vault, &proposal, executor, now)?;

        let mut vault = cell.vault.clone();
        let nonce = vault.bump_nonce(now);
        let effect = self.dispatcher.apply(&mut vault, &proposal.action)?;
        proposal.mark_executed(executor, now)?;

        let vault_id = vault.id;
        let kind = proposal.action.kind();
        let settlement = effect
            .settlement()
            .map(|(recipient, asset, amount)| (recipient.clone(), asset.clone(), amount));
        let draft = |kind| EventDraft {
            vault_id,
            proposal_id: Some(proposal_id),
            actor: executor.clone(),
            timestamp: now,
            vault_nonce: nonce,
            kind,
        };
        let drafts = vec![
            draft(EventKind::ProposalExecuted {
                action: proposal.action.clone(),
            }),
            draft(effect_event(&effect)),
        ];

        self.commit(
            Staged {
                vault,
                proposal: Some(proposal),
                settlement,
                drafts,
            },
            |vault, proposal| cell.install(vault, proposal),
        )?;

        info!(
            vault_id = %vault_id,
            proposal_id = %proposal_id,
            %kind,
            %executor,
            nonce,
            "proposal executed"
        );
        Ok(Receipt {
            proposal_id,
            vault_id,
            vault_nonce: nonce,
            executed_at: now,
            effect,
        })
    }

    /// Withdraws an open proposal. Only its proposer may do this.
    ///
    /// # Errors
    ///
    /// `ProposalNotFound`, `NotOwner`, `NotProposer`, `ProposalCancelled`,
    /// `AlreadyExecuted`, `ProposalExpired`.
    pub fn cancel(&self, proposal_id: ProposalId, caller: &Address) -> VaultResult<()> {
        self.cancel_checked(None, proposal_id, caller)
    }

    /// [`cancel`](Self::cancel), additionally requiring that the proposal
    /// belongs to `vault_id`.
    pub fn cancel_in(
        &self,
        vault_id: VaultId,
        proposal_id: ProposalId,
        caller: &Address,
    ) -> VaultResult<()> {
        self.cancel_checked(Some(vault_id), proposal_id, caller)
    }

    fn cancel_checked(
        &self,
        expected: Option<VaultId>,
        proposal_id: ProposalId,
        caller: &Address,
    ) -> VaultResult<()> {
        let handle = self.proposal_cell(expected, proposal_id)?;
        let mut cell = handle.lock();
        let now = self.clock.now();

        let mut proposal = cell
            .proposals
            .get(&proposal_id)
            .cloned()
            .ok_or(VaultError::ProposalNotFound(proposal_id))?;
        authorization::check_cancel(&cell.vault, &proposal, caller, now)?;

        let mut vault = cell.vault.clone();
        let nonce = vault.bump_nonce(now);
        proposal.mark_cancelled(now)?;

        let draft = EventDraft {
            vault_id: vault.id,
            proposal_id: Some(proposal_id),
            actor: caller.clone(),
            timestamp: now,
            vault_nonce: nonce,
            kind: EventKind::ProposalCancelled,
        };
        self.commit(
            Staged {
                vault,
                proposal: Some(proposal),
                settlement: None,
                drafts: vec![draft],
            },
            |vault, proposal| cell.install(vault, proposal),
        )?;

        info!(proposal_id = %proposal_id, %caller, "proposal cancelled");
        Ok(())
    }

    // -- Proposal queries ---------------------------------------------------

    /// Snapshot of a proposal.
    pub fn get_proposal(&self, proposal_id: ProposalId) -> VaultResult<Proposal> {
        let handle = self.proposal_cell(None, proposal_id)?;
        let cell = handle.lock();
        cell.proposals
            .get(&proposal_id)
            .cloned()
            .ok_or(VaultError::ProposalNotFound(proposal_id))
    }

    /// A proposal with its current status and approval count.
    pub fn proposal_view(&self, proposal_id: ProposalId) -> VaultResult<ProposalView> {
        let handle = self.proposal_cell(None, proposal_id)?;
        let cell = handle.lock();
        let proposal = cell
            .proposals
            .get(&proposal_id)
            .ok_or(VaultError::ProposalNotFound(proposal_id))?;
        Ok(ProposalView::new(proposal, &cell.vault, self.clock.now()))
    }

    /// `true` if an owner could execute the proposal right now.
    pub fn is_executable(&self, proposal_id: ProposalId) -> VaultResult<bool> {
        let handle = self.proposal_cell(None, proposal_id)?;
        let cell = handle.lock();
        let proposal = cell
            .proposals
            .get(&proposal_id)
            .ok_or(VaultError::ProposalNotFound(proposal_id))?;
        Ok(authorization::is_executable(
            &cell.vault,
            proposal,
            self.clock.now(),
        ))
    }

    /// Every proposal ever created for a vault, oldest first.
    pub fn list_proposals(&self, vault_id: VaultId) -> VaultResult<Vec<Proposal>> {
        Ok(self.cell(vault_id)?.lock().proposals.list())
    }

    /// Like [`list_proposals`](Self::list_proposals), with statuses.
    pub fn list_proposal_views(&self, vault_id: VaultId) -> VaultResult<Vec<ProposalView>> {
        let handle = self.cell(vault_id)?;
        let cell = handle.lock();
        let now = self.clock.now();
        Ok(cell
            .proposals
            .list()
            .iter()
            .map(|p| ProposalView::new(p, &cell.vault, now))
            .collect())
    }

    // -- Ledger queries -----------------------------------------------------

    /// Balance of `asset` credited to external account `address`.
    pub fn get_account_balance(&self, address: &Address, asset: &AssetId) -> u64 {
        self.ledger.lock().account_balance(address, asset)
    }

    /// Up to `limit` events starting at sequence `since`. `limit` is capped
    /// at [`MAX_EVENTS_PER_PAGE`].
    ///
    /// Persistent engines page the journal from disk.
    ///
    /// # Errors
    ///
    /// [`VaultError::Storage`] if the journal cannot be read.
    pub fn events_since(&self, since: u64, limit: usize) -> VaultResult<Vec<EventRecord>> {
        let limit = limit.min(MAX_EVENTS_PER_PAGE);
        // Holding the ledger keeps commits out while the page is read.
        let ledger = self.ledger.lock();
        match (&self.db, ledger.since(since, limit)) {
            (_, Some(page)) => Ok(page),
            (Some(db), None) => Ok(db.events_range(since, ledger.next_sequence(), limit)?),
            (None, None) => Ok(Vec::new()),
        }
    }

    /// Number of committed events.
    pub fn event_count(&self) -> u64 {
        self.ledger.lock().next_sequence()
    }

    /// Hash of the newest event (the genesis hash if there is none).
    pub fn head_hash(&self) -> String {
        self.ledger.lock().head_hash().to_string()
    }

    /// Replays the whole journal from scratch.
    ///
    /// # Errors
    ///
    /// [`VaultError::Storage`] if the journal cannot be read or fails
    /// verification.
    pub fn replay_journal(&self) -> VaultResult<Projection> {
        let events = {
            let ledger = self.ledger.lock();
            match (ledger.events(), &self.db) {
                (Some(events), _) => events.to_vec(),
                (None, Some(db)) => db.load_events()?,
                (None, None) => Vec::new(),
            }
        };
        Projection::replay(&events).map_err(corrupted)
    }
}

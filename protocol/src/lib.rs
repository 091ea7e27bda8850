//! # Warden Protocol: Core Library
//!
//! M-of-N authorization for shared custodial vaults. A vault holds assets
//! on behalf of a set of owners; nothing leaves it, and its membership
//! never changes, unless a proposal collects at least `threshold` owner
//! approvals before its deadline.
//!
//! ## Architecture
//!
//! Modules, leaves first:
//!
//! - **types**: validated identifiers (`Address`, `AssetId`, `VaultId`, `ProposalId`).
//! - **vault**: the vault aggregate and its invariants.
//! - **proposal**: proposals, their lifecycle, and the per-vault store.
//! - **authorization**: pure membership, expiry and quorum checks.
//! - **dispatcher**: applies an approved action to a vault.
//! - **events**: the hash-chained audit record and the sink contract.
//! - **ledger**: journal sequencing and recipient balances.
//! - **projection**: rebuilds all state by replaying the journal.
//! - **storage**: sled persistence.
//! - **engine**: the serializing entry point composing everything above.
//! - **clock** / **config** / **error**: time, constants, and the error taxonomy.
//!
//! ## Quick start
//!
//! ```
//! use warden_protocol::{Address, AssetId, VaultEngine};
//!
//! let engine = VaultEngine::in_memory();
//! let alice = Address::new("alice").unwrap();
//! let bob = Address::new("bob").unwrap();
//! let sui = AssetId::new("SUI").unwrap();
//!
//! let vault = engine.create_vault(vec![alice.clone(), bob.clone()], 2).unwrap();
//! engine.deposit(vault, &alice, &sui, 100).unwrap();
//!
//! let carol = Address::new("carol").unwrap();
//! let proposal = engine
//!     .propose_transfer(vault, &alice, sui.clone(), carol.clone(), 40, None)
//!     .unwrap();
//! engine.approve(proposal, &alice).unwrap();
//! engine.approve(proposal, &bob).unwrap();
//! engine.execute(proposal, &bob).unwrap();
//!
//! assert_eq!(engine.get_balance(vault, &sui).unwrap(), 60);
//! assert_eq!(engine.get_account_balance(&carol, &sui), 40);
//! ```

pub mod authorization;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod projection;
pub mod proposal;
pub mod storage;
pub mod types;
pub mod vault;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use dispatcher::Effect;
pub use engine::{ProposalView, Receipt, VaultEngine};
pub use error::{ErrorCategory, Recovery, VaultError, VaultResult};
pub use events::{EventKind, EventRecord, EventSink, MemorySink};
pub use projection::{Projection, ReplayError};
pub use proposal::{Proposal, ProposalAction, ProposalKind, ProposalStatus};
pub use storage::{StoreError, VaultDb};
pub use types::{Address, AssetId, ProposalId, VaultId};
pub use vault::Vault;

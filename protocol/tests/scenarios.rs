//! End-to-end lifecycle scenarios for the vault engine.
//!
//! Each test builds its own in-memory engine driven by a manual clock, so
//! expiry is deterministic and tests share nothing.

use std::sync::Arc;

use chrono::Duration;

use warden_protocol::{
    Address, AssetId, EngineConfig, ManualClock, MemorySink, ProposalStatus, VaultEngine,
    VaultError, VaultId,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn addr(s: &str) -> Address {
    Address::new(s).expect("valid address")
}

fn sui() -> AssetId {
    AssetId::new("SUI").expect("valid asset")
}

fn setup() -> (VaultEngine, Arc<ManualClock>, Arc<MemorySink>) {
    let clock = Arc::new(ManualClock::starting_now());
    let engine = VaultEngine::new(EngineConfig::default(), clock.clone());
    let sink = Arc::new(MemorySink::new());
    engine.add_sink(sink.clone());
    (engine, clock, sink)
}

/// Owners A..E with threshold 3.
fn five_owner_vault(engine: &VaultEngine) -> VaultId {
    let owners = ["A", "B", "C", "D", "E"].iter().map(|n| addr(n)).collect();
    engine.create_vault(owners, 3).expect("create vault")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn three_of_five_transfer_executes_only_at_quorum() {
    let (engine, _, _) = setup();
    let v = five_owner_vault(&engine);
    engine.deposit(v, &addr("A"), &sui(), 100).unwrap();

    let p = engine
        .propose_transfer(v, &addr("A"), sui(), addr("R"), 40, None)
        .unwrap();
    assert_eq!(engine.approve(p, &addr("B")).unwrap(), 1);
    assert_eq!(engine.approve(p, &addr("C")).unwrap(), 2);

    let err = engine.execute(p, &addr("E")).unwrap_err();
    assert!(matches!(
        err,
        VaultError::InsufficientApprovals {
            approvals: 2,
            threshold: 3
        }
    ));

    assert_eq!(engine.approve(p, &addr("D")).unwrap(), 3);
    let receipt = engine.execute(p, &addr("E")).unwrap();
    assert_eq!(receipt.proposal_id, p);
    assert_eq!(receipt.vault_id, v);

    assert_eq!(engine.get_balance(v, &sui()).unwrap(), 60);
    assert_eq!(engine.get_account_balance(&addr("R"), &sui()), 40);
    let proposal = engine.get_proposal(p).unwrap();
    assert!(proposal.is_executed());
    assert_eq!(proposal.executed_by, Some(addr("E")));

    assert!(matches!(
        engine.execute(p, &addr("E")),
        Err(VaultError::AlreadyExecuted(_))
    ));
    assert_eq!(engine.get_balance(v, &sui()).unwrap(), 60);
}

#[test]
fn duplicate_approval_is_rejected_and_not_counted() {
    let (engine, _, _) = setup();
    let v = five_owner_vault(&engine);
    let p = engine
        .propose_add_owner(v, &addr("A"), addr("F"), None)
        .unwrap();

    engine.approve(p, &addr("B")).unwrap();
    assert!(matches!(
        engine.approve(p, &addr("B")),
        Err(VaultError::AlreadyApproved { .. })
    ));
    assert_eq!(engine.get_proposal(p).unwrap().approvals().len(), 1);
}

#[test]
fn threshold_above_owner_count_is_rejected() {
    let (engine, _, sink) = setup();
    let owners = vec![addr("A"), addr("B"), addr("C")];
    assert!(matches!(
        engine.create_vault(owners, 4),
        Err(VaultError::InvalidThreshold {
            threshold: 4,
            owners: 3
        })
    ));
    assert!(sink.is_empty());
}

#[test]
fn owners_can_be_removed_down_to_the_threshold() {
    let (engine, _, _) = setup();
    let v = five_owner_vault(&engine);

    for leaving in ["E", "D"] {
        let p = engine
            .propose_remove_owner(v, &addr("A"), addr(leaving), None)
            .unwrap();
        for approver in ["A", "B", "C"] {
            engine.approve(p, &addr(approver)).unwrap();
        }
        engine.execute(p, &addr("A")).unwrap();
    }
    let vault = engine.get_vault(v).unwrap();
    assert_eq!(vault.owners(), &[addr("A"), addr("B"), addr("C")]);
    assert_eq!(vault.threshold(), 3);

    let p = engine
        .propose_remove_owner(v, &addr("A"), addr("C"), None)
        .unwrap();
    for approver in ["A", "B", "C"] {
        engine.approve(p, &addr(approver)).unwrap();
    }
    assert!(matches!(
        engine.execute(p, &addr("B")),
        Err(VaultError::CannotRemoveOwner {
            owners: 2,
            threshold: 3
        })
    ));
    assert_eq!(engine.get_vault(v).unwrap().owner_count(), 3);
    assert!(!engine.get_proposal(p).unwrap().is_executed());
}

#[test]
fn expiry_blocks_approval_and_execution_even_with_quorum() {
    let (engine, clock, _) = setup();
    let v = five_owner_vault(&engine);
    let p = engine
        .propose_update_threshold(v, &addr("A"), 2, Some(Duration::seconds(1)))
        .unwrap();
    for approver in ["A", "B", "C"] {
        engine.approve(p, &addr(approver)).unwrap();
    }
    assert!(engine.is_executable(p).unwrap());

    clock.advance(Duration::seconds(2));
    assert!(!engine.is_executable(p).unwrap());
    assert!(matches!(
        engine.approve(p, &addr("D")),
        Err(VaultError::ProposalExpired { .. })
    ));
    assert!(matches!(
        engine.execute(p, &addr("D")),
        Err(VaultError::ProposalExpired { .. })
    ));
    assert_eq!(engine.get_vault(v).unwrap().threshold(), 3);
    assert_eq!(
        engine.proposal_view(p).unwrap().status,
        ProposalStatus::Expired
    );
}

#[test]
fn threshold_change_applies_to_proposals_already_in_flight() {
    let (engine, _, _) = setup();
    let v = five_owner_vault(&engine);
    let transfer = engine
        .propose_transfer(v, &addr("A"), sui(), addr("R"), 1, None)
        .unwrap();
    engine.deposit(v, &addr("R"), &sui(), 1).unwrap();
    engine.approve(transfer, &addr("A")).unwrap();
    engine.approve(transfer, &addr("B")).unwrap();

    let lower = engine
        .propose_update_threshold(v, &addr("A"), 2, None)
        .unwrap();
    for approver in ["A", "B", "C"] {
        engine.approve(lower, &addr(approver)).unwrap();
    }
    engine.execute(lower, &addr("C")).unwrap();

    // Quorum is measured against the threshold at execution time.
    engine.execute(transfer, &addr("D")).unwrap();
    assert_eq!(engine.get_balance(v, &sui()).unwrap(), 0);
}

#[test]
fn approval_survives_the_removal_of_its_owner() {
    let (engine, _, _) = setup();
    let v = engine
        .create_vault(vec![addr("A"), addr("B"), addr("C")], 2)
        .unwrap();
    engine.deposit(v, &addr("A"), &sui(), 50).unwrap();
    let payment = engine
        .propose_transfer(v, &addr("A"), sui(), addr("R"), 20, None)
        .unwrap();
    engine.approve(payment, &addr("A")).unwrap();
    engine.approve(payment, &addr("C")).unwrap();

    let removal = engine
        .propose_remove_owner(v, &addr("B"), addr("C"), None)
        .unwrap();
    engine.approve(removal, &addr("A")).unwrap();
    engine.approve(removal, &addr("B")).unwrap();
    engine.execute(removal, &addr("B")).unwrap();
    assert!(!engine.get_vault(v).unwrap().is_owner(&addr("C")));

    assert!(engine.is_executable(payment).unwrap());
    let view = engine.proposal_view(payment).unwrap();
    assert_eq!(view.approvals, 2);
    assert_eq!(view.status, ProposalStatus::Executable);

    engine.execute(payment, &addr("A")).unwrap();
    assert_eq!(engine.get_balance(v, &sui()).unwrap(), 30);
    assert_eq!(engine.get_account_balance(&addr("R"), &sui()), 20);
}

#[test]
fn non_owners_cannot_propose_approve_or_execute() {
    let (engine, _, _) = setup();
    let v = five_owner_vault(&engine);
    let outsider = addr("Z");

    assert!(matches!(
        engine.propose_add_owner(v, &outsider, addr("Z"), None),
        Err(VaultError::NotOwner { .. })
    ));
    let p = engine
        .propose_add_owner(v, &addr("A"), addr("F"), None)
        .unwrap();
    assert!(matches!(
        engine.approve(p, &outsider),
        Err(VaultError::NotOwner { .. })
    ));
    assert!(matches!(
        engine.execute(p, &outsider),
        Err(VaultError::NotOwner { .. })
    ));

    // Anyone may deposit.
    assert_eq!(engine.deposit(v, &outsider, &sui(), 5).unwrap(), 5);
}

#[test]
fn added_owner_can_approve_subsequent_proposals() {
    let (engine, _, _) = setup();
    let v = engine.create_vault(vec![addr("A")], 1).unwrap();
    let add = engine
        .propose_add_owner(v, &addr("A"), addr("B"), None)
        .unwrap();
    engine.approve(add, &addr("A")).unwrap();
    engine.execute(add, &addr("A")).unwrap();

    let raise = engine
        .propose_update_threshold(v, &addr("B"), 2, None)
        .unwrap();
    engine.approve(raise, &addr("B")).unwrap();
    engine.execute(raise, &addr("B")).unwrap();

    let vault = engine.get_vault(v).unwrap();
    assert_eq!(vault.owner_count(), 2);
    assert_eq!(vault.threshold(), 2);
}

#[test]
fn event_stream_is_gap_free_and_chained() {
    let (engine, _, sink) = setup();
    let v = five_owner_vault(&engine);
    engine.deposit(v, &addr("A"), &sui(), 10).unwrap();
    let p = engine
        .propose_transfer(v, &addr("A"), sui(), addr("R"), 10, None)
        .unwrap();
    for approver in ["A", "B", "C"] {
        engine.approve(p, &addr(approver)).unwrap();
    }
    engine.execute(p, &addr("A")).unwrap();

    let records = sink.records();
    let names: Vec<&str> = records.iter().map(|r| r.kind.name()).collect();
    assert_eq!(
        names,
        vec![
            "vault_created",
            "deposited",
            "proposal_created",
            "proposal_approved",
            "proposal_approved",
            "proposal_approved",
            "proposal_executed",
            "transfer_completed",
        ]
    );
    for (i, pair) in records.windows(2).enumerate() {
        assert_eq!(pair[1].sequence, i as u64 + 1);
        assert_eq!(pair[1].prev_hash, pair[0].hash);
    }
    assert_eq!(records, engine.events_since(0, 100).unwrap());
}

#[test]
fn invalid_expiry_override_is_rejected() {
    let (engine, _, _) = setup();
    let v = five_owner_vault(&engine);
    for secs in [0, -5, 91 * 24 * 60 * 60] {
        assert!(matches!(
            engine.propose_add_owner(v, &addr("A"), addr("F"), Some(Duration::seconds(secs))),
            Err(VaultError::InvalidExpiry { .. })
        ));
    }
    assert!(engine.list_proposals(v).unwrap().is_empty());
}

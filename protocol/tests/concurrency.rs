//! Concurrency properties of the engine: approvals are commutative and
//! atomic per approver, and execution happens exactly once.

use std::sync::{Arc, Barrier};
use std::thread;

use warden_protocol::{Address, AssetId, VaultEngine, VaultError};

fn addr(s: &str) -> Address {
    Address::new(s).expect("valid address")
}

fn owners(n: usize) -> Vec<Address> {
    (0..n).map(|i| addr(&format!("owner-{i}"))).collect()
}

/// Runs `f(i)` on `n` threads released at the same instant.
fn race<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(n));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let f = Arc::clone(&f);
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect()
}

#[test]
fn concurrent_approvals_by_distinct_owners_all_land() {
    let engine = Arc::new(VaultEngine::in_memory());
    let members = owners(16);
    let v = engine.create_vault(members.clone(), 16).unwrap();
    let p = engine
        .propose_update_threshold(v, &members[0], 8, None)
        .unwrap();

    let results = {
        let engine = Arc::clone(&engine);
        let members = members.clone();
        race(16, move |i| engine.approve(p, &members[i]))
    };

    assert!(results.iter().all(|r| r.is_ok()));
    let mut counts: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=16).collect::<Vec<_>>());
    assert_eq!(engine.get_proposal(p).unwrap().approvals().len(), 16);
}

#[test]
fn concurrent_duplicate_approvals_succeed_once() {
    let engine = Arc::new(VaultEngine::in_memory());
    let members = owners(3);
    let v = engine.create_vault(members.clone(), 2).unwrap();
    let p = engine
        .propose_add_owner(v, &members[0], addr("newcomer"), None)
        .unwrap();

    let results = {
        let engine = Arc::clone(&engine);
        let approver = members[1].clone();
        race(12, move |_| engine.approve(p, &approver))
    };

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, VaultError::AlreadyApproved { .. })));
    assert_eq!(engine.get_proposal(p).unwrap().approvals().len(), 1);
}

#[test]
fn concurrent_execution_happens_exactly_once() {
    let engine = Arc::new(VaultEngine::in_memory());
    let members = owners(8);
    let sui = AssetId::new("SUI").unwrap();
    let v = engine.create_vault(members.clone(), 3).unwrap();
    engine.deposit(v, &members[0], &sui, 1_000).unwrap();
    let p = engine
        .propose_transfer(v, &members[0], sui.clone(), addr("recipient"), 400, None)
        .unwrap();
    for owner in &members[..3] {
        engine.approve(p, owner).unwrap();
    }

    let results = {
        let engine = Arc::clone(&engine);
        let members = members.clone();
        race(8, move |i| engine.execute(p, &members[i]))
    };

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, VaultError::AlreadyExecuted(_))));
    assert_eq!(engine.get_balance(v, &sui).unwrap(), 600);
    assert_eq!(engine.get_account_balance(&addr("recipient"), &sui), 400);
}

#[test]
fn concurrent_work_on_many_vaults_keeps_a_consistent_journal() {
    let engine = Arc::new(VaultEngine::in_memory());
    let sui = AssetId::new("SUI").unwrap();

    {
        let engine = Arc::clone(&engine);
        race(8, move |i| {
            let members = vec![addr(&format!("a{i}")), addr(&format!("b{i}"))];
            let v = engine.create_vault(members.clone(), 2).unwrap();
            engine.deposit(v, &members[0], &sui, 100).unwrap();
            let p = engine
                .propose_transfer(v, &members[0], sui.clone(), addr("sink"), 10, None)
                .unwrap();
            engine.approve(p, &members[0]).unwrap();
            engine.approve(p, &members[1]).unwrap();
            engine.execute(p, &members[1]).unwrap();
        });
    }

    let sui = AssetId::new("SUI").unwrap();
    assert_eq!(engine.vault_count(), 8);
    assert_eq!(engine.get_account_balance(&addr("sink"), &sui), 80);
    assert_eq!(engine.event_count(), 8 * 7);

    let projection = engine.replay_journal().expect("journal verifies");
    for vault in engine.list_vaults() {
        assert_eq!(projection.vaults[&vault.id], vault);
        assert_eq!(vault.balance(&sui), 90);
    }
}

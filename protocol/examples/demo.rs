//! Terminal walkthrough of a 2-of-3 treasury vault.
//!
//! Creates a vault, funds it, moves funds out through a proposal, rotates
//! an owner, shows a rejected call, then replays the journal to prove the
//! engine state can be rebuilt from events alone.
//!
//! Run with:
//!   cargo run --example demo

use warden_protocol::{Address, AssetId, VaultEngine, VaultError};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

fn step(n: u32, title: &str) {
    println!();
    println!("{BOLD}{CYAN}[{n}] {title}{RESET}");
}

fn ok(msg: impl AsRef<str>) {
    println!("    {GREEN}ok{RESET}  {}", msg.as_ref());
}

fn note(msg: impl AsRef<str>) {
    println!("    {DIM}{}{RESET}", msg.as_ref());
}

fn main() -> Result<(), VaultError> {
    println!("{BOLD}Warden: multi-party vault walkthrough{RESET}");

    let engine = VaultEngine::in_memory();
    let alice = Address::new("alice")?;
    let bob = Address::new("bob")?;
    let carol = Address::new("carol")?;
    let dave = Address::new("dave")?;
    let supplier = Address::new("supplier")?;
    let usdc = AssetId::new("USDC")?;

    step(1, "Create a 2-of-3 vault");
    let vault = engine.create_vault(vec![alice.clone(), bob.clone(), carol.clone()], 2)?;
    ok(format!("vault {vault}"));

    step(2, "Fund it");
    let balance = engine.deposit(vault, &dave, &usdc, 10_000)?;
    ok(format!("{dave} deposited, balance {balance} {usdc}"));

    step(3, "Pay a supplier");
    let payment =
        engine.propose_transfer(vault, &alice, usdc.clone(), supplier.clone(), 2_500, None)?;
    note(format!("{alice} proposed {payment}"));
    engine.approve(payment, &alice)?;
    match engine.execute(payment, &alice) {
        Err(e) => note(format!("{YELLOW}rejected{RESET} ({}): {e}", e.code())),
        Ok(_) => unreachable!("one approval is below the threshold"),
    }
    let approvals = engine.approve(payment, &carol)?;
    note(format!("{carol} approved, {approvals}/2"));
    let receipt = engine.execute(payment, &bob)?;
    ok(format!(
        "executed at nonce {}, vault now holds {} {usdc}, supplier holds {}",
        receipt.vault_nonce,
        engine.get_balance(vault, &usdc)?,
        engine.get_account_balance(&supplier, &usdc)
    ));

    step(4, "Rotate carol out for dave");
    let add = engine.propose_add_owner(vault, &bob, dave.clone(), None)?;
    engine.approve(add, &alice)?;
    engine.approve(add, &bob)?;
    engine.execute(add, &bob)?;
    let remove = engine.propose_remove_owner(vault, &dave, carol.clone(), None)?;
    engine.approve(remove, &dave)?;
    engine.approve(remove, &alice)?;
    engine.execute(remove, &dave)?;
    let owners: Vec<String> = engine
        .get_vault(vault)?
        .owners()
        .iter()
        .map(ToString::to_string)
        .collect();
    ok(format!("owners: {}", owners.join(", ")));

    step(5, "A former owner is locked out");
    if let Err(e) = engine.propose_transfer(vault, &carol, usdc.clone(), carol.clone(), 1, None) {
        note(format!("{YELLOW}rejected{RESET} ({}): {e}", e.code()));
    }

    step(6, "Replay the journal");
    match engine.replay_journal() {
        Ok(projection) => ok(format!(
            "{} events replayed, head {}, vault rebuilt: {}",
            engine.event_count(),
            &engine.head_hash()[..16],
            projection.vaults.get(&vault) == Some(&engine.get_vault(vault)?)
        )),
        Err(e) => note(format!("{YELLOW}replay failed{RESET}: {e}")),
    }

    println!();
    Ok(())
}

//! Integration tests for issuing loans and moving them between accounts

mod common;

use common::{TestNetwork, TestResult};
use loanledger::accounts::AccountDirectory;
use loanledger::crypto::KeyPair;
use loanledger::error::LedgerError;
use loanledger::flows::{IssueLoanFlow, TransferLoanToAccountFlow};
use loanledger::state::{AccountInfo, AccountRef, Ownership};
use uuid::Uuid;

#[tokio::test]
async fn test_issue_to_local_account() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let alice = bank_a.create_account("alice")?;

    let loan = bank_a
        .start_flow(IssueLoanFlow::new(100, Some(alice.clone())))
        .await?;

    let state = loan.loan_book().ok_or("issued state is not a loan")?;
    assert_eq!(state.value_in_usd, 100);
    assert_eq!(
        state.owning_account,
        Ownership::Account(alice.info.signing_key)
    );
    assert_eq!(bank_a.loans_for_account(alice.info.account_id)?, vec![loan]);
    assert!(bank_a.checkpoints().list()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_bearer_loan_transferred_to_remote_account() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let bank_b = net.node("Bank B")?;
    let bob = bank_b.create_account("bob")?;
    bank_b.accounts().share_account_info(&bob, bank_a.party()).await?;

    let bearer = bank_a.start_flow(IssueLoanFlow::new(500, None)).await?;
    let moved = bank_a
        .start_flow(TransferLoanToAccountFlow {
            loan: bearer.clone(),
            target: bob.clone(),
        })
        .await?;

    assert!(bank_a.vault().is_consumed(&bearer.state_ref)?);
    let state = moved.loan_book().ok_or("not a loan")?;
    assert_eq!(state.value_in_usd, 500);
    assert_eq!(state.owning_account, Ownership::Account(bob.info.signing_key));
    // Bank B heard about it through the finality broadcast.
    assert_eq!(bank_b.loans_for_account(bob.info.account_id)?, vec![moved]);
    Ok(())
}

#[tokio::test]
async fn test_account_to_account_transfer_under_redelivery() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let bank_b = net.node("Bank B")?;
    let alice = bank_a.create_account("alice")?;
    let bob = bank_b.create_account("bob")?;
    bank_b.accounts().share_account_info(&bob, bank_a.party()).await?;

    let loan = bank_a
        .start_flow(IssueLoanFlow::new(250, Some(alice.clone())))
        .await?;

    net.network.set_redelivery(true);
    let moved = bank_a
        .start_flow(TransferLoanToAccountFlow {
            loan: loan.clone(),
            target: bob.clone(),
        })
        .await?;

    assert!(bank_a.loans_for_account(alice.info.account_id)?.is_empty());
    assert_eq!(bank_b.loans_for_account(bob.info.account_id)?, vec![moved.clone()]);
    assert_eq!(bank_b.loans()?, vec![moved]);
    Ok(())
}

#[tokio::test]
async fn test_cannot_move_loan_owned_by_remote_account() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let bank_b = net.node("Bank B")?;
    let alice = bank_a.create_account("alice")?;
    let bob = bank_b.create_account("bob")?;
    bank_b.accounts().share_account_info(&bob, bank_a.party()).await?;

    let loan = bank_a
        .start_flow(IssueLoanFlow::new(100, Some(bob.clone())))
        .await?;
    let result = bank_a
        .start_flow(TransferLoanToAccountFlow { loan, target: alice })
        .await;
    assert!(matches!(result, Err(LedgerError::NotHost { .. })));
    Ok(())
}

#[tokio::test]
async fn test_counterparty_refuses_key_it_does_not_hold() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let bank_b = net.node("Bank B")?;
    let bob = bank_b.create_account("bob")?;

    // An account claiming to live on Bank B under a key Bank B never issued.
    let forged = AccountRef {
        info: AccountInfo {
            account_id: Uuid::new_v4(),
            name: "mallory".to_string(),
            host: bank_b.party().clone(),
            signing_key: KeyPair::generate()?.public_key,
        },
        notary: bob.notary.clone(),
        state_ref: bob.state_ref,
    };
    bank_a.accounts().receive_account(&forged)?;

    let loan = bank_a.start_flow(IssueLoanFlow::new(100, None)).await?;
    let result = bank_a
        .start_flow(TransferLoanToAccountFlow {
            loan: loan.clone(),
            target: forged,
        })
        .await;

    assert!(matches!(result, Err(LedgerError::SigningRejected { .. })));
    assert!(!bank_a.vault().is_consumed(&loan.state_ref)?);
    assert!(bank_a.checkpoints().list()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_counterparty_moves_nothing() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let bank_b = net.node("Bank B")?;
    let bob = bank_b.create_account("bob")?;
    bank_b.accounts().share_account_info(&bob, bank_a.party()).await?;
    let loan = bank_a.start_flow(IssueLoanFlow::new(100, None)).await?;

    net.network.partition("Bank B");
    let result = bank_a
        .start_flow(TransferLoanToAccountFlow {
            loan: loan.clone(),
            target: bob,
        })
        .await;

    assert!(matches!(result, Err(ref e) if e.is_transient()));
    assert!(!bank_a.vault().is_consumed(&loan.state_ref)?);
    assert_eq!(net.notary.consumed_by(&loan.state_ref), None);
    Ok(())
}

#[tokio::test]
async fn test_account_lookup_by_name_is_scoped_to_host() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let bank_b = net.node("Bank B")?;
    let local = bank_a.create_account("treasury")?;
    let remote = bank_b.create_account("treasury")?;
    bank_b.accounts().share_account_info(&remote, bank_a.party()).await?;

    let directory = bank_a.accounts();
    assert_eq!(directory.account_by_name("treasury", bank_a.party())?, Some(local));
    assert_eq!(directory.account_by_name("treasury", bank_b.party())?, Some(remote));
    assert_eq!(directory.account_by_name("nobody", bank_a.party())?, None);
    Ok(())
}

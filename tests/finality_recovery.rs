//! Integration tests for pending finality and checkpoint recovery

mod common;

use common::{TestNetwork, TestResult, NOTARY};
use loanledger::config::NodeConfig;
use loanledger::error::LedgerError;
use loanledger::finality::{FlowStage, FollowUp};
use loanledger::flows::{IssueLoanFlow, SplitLoanFlow};
use loanledger::persistence::{CheckpointStore, SqliteCheckpointStore};

#[tokio::test]
async fn test_unreachable_notary_leaves_flow_pending() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let alice = bank_a.create_account("alice")?;
    let loan = bank_a
        .start_flow(IssueLoanFlow::new(100, Some(alice.clone())))
        .await?;

    net.notary.set_offline(true);
    let result = bank_a.start_flow(SplitLoanFlow::new(loan.clone(), 25)).await;
    let tx_id = match result {
        Err(LedgerError::FinalityPending(tx_id)) => tx_id,
        other => return Err(format!("expected pending finality, got {:?}", other).into()),
    };

    // Outcome unknown: nothing consumed, nothing produced, checkpoint kept.
    assert!(!bank_a.vault().is_consumed(&loan.state_ref)?);
    assert_eq!(bank_a.loans()?, vec![loan.clone()]);
    let pending = bank_a.checkpoints().list()?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].flow_name, "SplitLoanFlow");
    assert!(matches!(&pending[0].stage, FlowStage::Submitted(s) if s.tx.id == tx_id));

    net.notary.set_offline(false);
    let outcomes = bank_a.resume_flows().await?;
    assert_eq!(outcomes.len(), 1);
    let finalized = outcomes[0].1.as_ref().map_err(|e| e.to_string())?;
    assert_eq!(finalized.id(), tx_id);

    assert!(bank_a.vault().is_consumed(&loan.state_ref)?);
    let values: Vec<u64> = bank_a
        .loans_for_account(alice.info.account_id)?
        .iter()
        .filter_map(|s| s.loan_book())
        .map(|l| l.value_in_usd)
        .collect();
    assert_eq!(values, vec![25, 75]);
    assert!(bank_a.checkpoints().list()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_resume_while_notary_still_down_stays_pending() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    net.notary.set_offline(true);
    let result = bank_a.start_flow(IssueLoanFlow::new(10, None)).await;
    assert!(matches!(result, Err(LedgerError::FinalityPending(_))));

    let outcomes = bank_a.resume_flows().await?;
    assert!(matches!(outcomes[0].1, Err(LedgerError::FinalityPending(_))));
    assert_eq!(bank_a.checkpoints().list()?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_checkpoints_survive_in_sqlite() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("checkpoints.db");
    let path = path.to_str().ok_or("non-utf8 temp path")?.to_string();

    let net = TestNetwork::new()?;
    let mut config = NodeConfig::new("Bank A", NOTARY);
    config.database.checkpoint_path = Some(path.clone());
    let bank_a = net.node_with_config(config)?;

    net.notary.set_offline(true);
    let result = bank_a.start_flow(IssueLoanFlow::new(10, None)).await;
    assert!(matches!(result, Err(LedgerError::FinalityPending(_))));

    // A second handle on the same file sees the pending flow.
    let reopened = SqliteCheckpointStore::open(&path)?;
    let stored = reopened.list()?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].stage.name(), "submitted");

    net.notary.set_offline(false);
    bank_a.resume_flows().await?;
    assert!(reopened.list()?.is_empty());
    assert_eq!(bank_a.loans()?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_resubmitting_a_finalized_transaction_is_harmless() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let alice = bank_a.create_account("alice")?;
    let loan = bank_a
        .start_flow(IssueLoanFlow::new(100, Some(alice)))
        .await?;
    let split = bank_a.start_flow(SplitLoanFlow::new(loan.clone(), 50)).await?;
    let consumer = net
        .notary
        .consumed_by(&loan.state_ref)
        .ok_or("input not consumed")?;
    assert_eq!(consumer, split[0].state_ref.txhash);

    // Splitting the consumed input again is a new transaction and must conflict.
    let again = bank_a.start_flow(SplitLoanFlow::new(loan.clone(), 50)).await;
    match again {
        Err(LedgerError::NotaryConflict { conflicts, .. }) => {
            assert_eq!(conflicts, vec![(loan.state_ref, consumer)]);
        }
        other => return Err(format!("expected conflict, got {:?}", other).into()),
    }
    assert_eq!(bank_a.loans()?, split);
    Ok(())
}

#[tokio::test]
async fn test_resumed_split_still_copies_to_interested_accounts() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let bank_b = net.node("Bank B")?;
    let alice = bank_a.create_account("alice")?;
    let bob = bank_b.create_account("bob")?;
    bank_a.accounts().share_account_info(&alice, bank_b.party()).await?;
    bank_b.accounts().request_interest(&alice, &bob).await?;
    let loan = bank_a
        .start_flow(IssueLoanFlow::new(100, Some(alice.clone())))
        .await?;

    net.notary.set_offline(true);
    let result = bank_a.start_flow(SplitLoanFlow::new(loan, 30)).await;
    assert!(matches!(result, Err(LedgerError::FinalityPending(_))));
    let pending = bank_a.checkpoints().list()?;
    assert!(matches!(
        &pending[0].follow_up,
        Some(FollowUp::ShareOutputs { owner, receivers: None }) if *owner == alice.info.account_id
    ));

    net.notary.set_offline(false);
    let outcomes = bank_a.resume_flows().await?;
    let finalized = outcomes[0].1.as_ref().map_err(|e| e.to_string())?;
    let split = finalized.out_refs();
    assert_eq!(split.len(), 2);
    for state in &split {
        assert_eq!(bank_b.vault().state(&state.state_ref)?, Some(state.clone()));
    }
    assert_eq!(bank_b.loans_for_account(alice.info.account_id)?, split);
    assert!(bank_a.checkpoints().list()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_resumed_split_copies_to_named_receivers() -> TestResult {
    let net = TestNetwork::new()?;
    let bank_a = net.node("Bank A")?;
    let bank_c = net.node("Bank C")?;
    let alice = bank_a.create_account("alice")?;
    let carol = bank_c.create_account("carol")?;
    let loan = bank_a
        .start_flow(IssueLoanFlow::new(80, Some(alice)))
        .await?;

    net.notary.set_offline(true);
    let result = bank_a
        .start_flow(SplitLoanFlow::new(loan, 20).with_receivers(vec![carol.info.clone()]))
        .await;
    assert!(matches!(result, Err(LedgerError::FinalityPending(_))));

    net.notary.set_offline(false);
    let outcomes = bank_a.resume_flows().await?;
    let finalized = outcomes[0].1.as_ref().map_err(|e| e.to_string())?;
    for state in finalized.out_refs() {
        assert_eq!(bank_c.vault().state(&state.state_ref)?, Some(state));
    }
    Ok(())
}

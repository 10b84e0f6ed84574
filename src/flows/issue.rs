use super::{sign_and_finalize, Flow};
use crate::error::{LedgerError, Result};
use crate::node::Node;
use crate::state::{AccountRef, FungibleLoanState, Ownership, StateAndRef};
use crate::transaction::{CommandKind, TransactionBuilder};
use async_trait::async_trait;
use uuid::Uuid;

/// Issue a new loan, bearer-owned or owned by `owner`.
pub struct IssueLoanFlow {
    pub value_in_usd: u64,
    pub owner: Option<AccountRef>,
    /// Defaults to a fresh deal id.
    pub deal_id: Option<Uuid>,
}

impl IssueLoanFlow {
    pub fn new(value_in_usd: u64, owner: Option<AccountRef>) -> Self {
        IssueLoanFlow {
            value_in_usd,
            owner,
            deal_id: None,
        }
    }
}

#[async_trait]
impl Flow for IssueLoanFlow {
    type Output = StateAndRef;
    const NAME: &'static str = "IssueLoanFlow";

    async fn call(&self, node: &Node, flow_id: Uuid) -> Result<StateAndRef> {
        let ownership = match &self.owner {
            Some(account) => Ownership::Account(account.info.signing_key),
            None => Ownership::Bearer,
        };
        let loan = FungibleLoanState::new(
            self.deal_id.unwrap_or_else(Uuid::new_v4),
            self.value_in_usd,
            ownership,
        );

        let mut builder = TransactionBuilder::new(node.notary().clone());
        builder
            .add_output_state(loan)
            .add_command(CommandKind::Issue, [node.party().owning_key]);

        let finalized = sign_and_finalize(node, flow_id, Self::NAME, &builder, None).await?;
        finalized
            .out_refs()
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::InvalidTransaction("Issuance produced no output".to_string()))
    }
}

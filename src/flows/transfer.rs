use super::{hosted_owner, sign_and_finalize, Flow};
use crate::error::{LedgerError, Result};
use crate::node::Node;
use crate::state::{AccountRef, Ownership, StateAndRef};
use crate::transaction::{CommandKind, TransactionBuilder};
use async_trait::async_trait;
use uuid::Uuid;

/// Move a loan to `target`, which may be hosted by another node.
///
/// A loan already owned by an account can only be moved by that account's
/// host. The receiving account and its host both sign.
pub struct TransferLoanToAccountFlow {
    pub loan: StateAndRef,
    pub target: AccountRef,
}

#[async_trait]
impl Flow for TransferLoanToAccountFlow {
    type Output = StateAndRef;
    const NAME: &'static str = "TransferLoanToAccountFlow";

    async fn call(&self, node: &Node, flow_id: Uuid) -> Result<StateAndRef> {
        let loan = self.loan.loan_book().ok_or_else(|| {
            LedgerError::InvalidTransaction(format!("{} is not a loan", self.loan.state_ref))
        })?;
        let current = if loan.owning_account.is_bearer() {
            None
        } else {
            Some(hosted_owner(node, &self.loan)?)
        };

        let target = &self.target.info;
        let mut signers = vec![target.signing_key, target.host.owning_key];
        let mut builder = TransactionBuilder::new(self.loan.notary.clone());
        builder
            .add_input_state(self.loan.clone())
            .add_output_state(loan.with_owner(Ownership::Account(target.signing_key)))
            .add_reference_state(self.target.clone());
        if let Some(current) = current {
            signers.push(current.info.signing_key);
            signers.push(current.info.host.owning_key);
            if current.info.signing_key != target.signing_key {
                builder.add_reference_state(current);
            }
        }
        builder.add_command(CommandKind::TransferToAccount, signers);

        let finalized = sign_and_finalize(node, flow_id, Self::NAME, &builder, None).await?;
        finalized
            .out_refs()
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::InvalidTransaction("Transfer produced no output".to_string()))
    }
}

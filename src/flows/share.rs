use super::Flow;
use crate::accounts::AccountDirectory;
use crate::error::Result;
use crate::node::Node;
use crate::state::{AccountInfo, StateAndRef};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const SHARE_BACKOFF_MS: u64 = 50;

/// Give `account` a copy of `state`, retrying transient network failures.
pub struct ShareStateWithAccountFlow {
    pub account: AccountInfo,
    pub state: StateAndRef,
}

#[async_trait]
impl Flow for ShareStateWithAccountFlow {
    type Output = ();
    const NAME: &'static str = "ShareStateWithAccountFlow";

    async fn call(&self, node: &Node, _flow_id: Uuid) -> Result<()> {
        let retries = node.config.flows.broadcast_retries;
        let mut attempt = 0;
        loop {
            match node.accounts().share_state(&self.account, &self.state).await {
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    debug!(
                        "Retrying share of {} with {} ({}/{})",
                        self.state.state_ref, self.account.account_id, attempt, retries
                    );
                    tokio::time::sleep(Duration::from_millis(SHARE_BACKOFF_MS * attempt as u64))
                        .await;
                }
                other => return other,
            }
        }
    }
}

/// Accounts that registered interest in `account_id`.
pub struct GetAllInterestedAccountsFlow {
    pub account_id: Uuid,
}

#[async_trait]
impl Flow for GetAllInterestedAccountsFlow {
    type Output = Vec<AccountInfo>;
    const NAME: &'static str = "GetAllInterestedAccountsFlow";

    async fn call(&self, node: &Node, _flow_id: Uuid) -> Result<Vec<AccountInfo>> {
        Ok(node
            .accounts()
            .interested_accounts(self.account_id)?
            .into_iter()
            .map(|account| account.info)
            .collect())
    }
}

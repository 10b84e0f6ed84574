//! Point-to-point messaging between parties.
//!
//! Transport is an external collaborator offering at-least-once delivery, so
//! every handler must tolerate seeing the same message twice.
//! [`InMemoryNetwork`] can be told to redeliver every message to prove that.

use crate::crypto::{DigitalSignature, PublicKey};
use crate::error::{LedgerError, Result};
use crate::identity::Party;
use crate::state::{AccountInfo, AccountRef, StateAndRef};
use crate::transaction::{FinalizedTransaction, LedgerTransaction};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerMessage {
    /// Ask the receiver to sign `transaction` with each of `keys`.
    SignatureRequest {
        transaction: LedgerTransaction,
        keys: BTreeSet<PublicKey>,
    },
    /// Give `target` (hosted by the receiver) sight of `state`.
    ShareState {
        target: AccountInfo,
        state: StateAndRef,
    },
    ShareAccount(AccountRef),
    /// `interested` wants copies of future states of account `account_id`.
    RegisterInterest {
        account_id: Uuid,
        interested: AccountRef,
    },
    Finalized(FinalizedTransaction),
}

impl LedgerMessage {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerMessage::SignatureRequest { .. } => "SignatureRequest",
            LedgerMessage::ShareState { .. } => "ShareState",
            LedgerMessage::ShareAccount(_) => "ShareAccount",
            LedgerMessage::RegisterInterest { .. } => "RegisterInterest",
            LedgerMessage::Finalized(_) => "Finalized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerReply {
    Ack,
    Signatures(Vec<DigitalSignature>),
    Rejected(String),
}

/// Outbound side, one per node.
#[async_trait]
pub trait Messaging: Send + Sync {
    fn local_party(&self) -> &Party;

    async fn send(&self, to: &Party, message: LedgerMessage) -> Result<LedgerReply>;
}

/// Inbound side, implemented by the node.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, from: &Party, message: LedgerMessage) -> Result<LedgerReply>;
}

/// Routes messages between handlers living in the same process.
#[derive(Default)]
pub struct InMemoryNetwork {
    endpoints: RwLock<HashMap<String, Weak<dyn MessageHandler>>>,
    partitioned: RwLock<HashSet<String>>,
    redeliver: AtomicBool,
    delivered: AtomicU64,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, party: &Party, handler: Weak<dyn MessageHandler>) {
        self.endpoints.write().insert(party.name.clone(), handler);
    }

    pub fn endpoint(self: &Arc<Self>, party: Party) -> NetworkEndpoint {
        NetworkEndpoint {
            network: Arc::clone(self),
            party,
        }
    }

    /// Cut `name` off: every message to or from it fails.
    pub fn partition(&self, name: &str) {
        self.partitioned.write().insert(name.to_string());
    }

    pub fn heal(&self, name: &str) {
        self.partitioned.write().remove(name);
    }

    /// Deliver every message twice.
    pub fn set_redelivery(&self, enabled: bool) {
        self.redeliver.store(enabled, Ordering::SeqCst);
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    async fn deliver(&self, from: &Party, to: &Party, message: LedgerMessage) -> Result<LedgerReply> {
        {
            let partitioned = self.partitioned.read();
            if partitioned.contains(&from.name) || partitioned.contains(&to.name) {
                return Err(LedgerError::NetworkError(format!(
                    "{} is unreachable from {}",
                    to, from
                )));
            }
        }

        let handler = self
            .endpoints
            .read()
            .get(&to.name)
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| LedgerError::NetworkError(format!("No endpoint for {}", to)))?;

        debug!("{} -> {}: {}", from, to, message.name());
        if self.redeliver.load(Ordering::SeqCst) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            let _ = handler.handle(from, message.clone()).await;
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        handler.handle(from, message).await
    }
}

/// A node's handle on the in-memory network.
#[derive(Clone)]
pub struct NetworkEndpoint {
    network: Arc<InMemoryNetwork>,
    party: Party,
}

#[async_trait]
impl Messaging for NetworkEndpoint {
    fn local_party(&self) -> &Party {
        &self.party
    }

    async fn send(&self, to: &Party, message: LedgerMessage) -> Result<LedgerReply> {
        self.network.deliver(&self.party, to, message).await
    }
}

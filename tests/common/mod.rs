//! Shared fixtures for the integration tests

#![allow(dead_code)]

use loanledger::config::NodeConfig;
use loanledger::identity::IdentityService;
use loanledger::messaging::InMemoryNetwork;
use loanledger::node::Node;
use loanledger::notary::InMemoryNotary;
use std::sync::Arc;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const NOTARY: &str = "Notary";

/// An in-memory network with one notary and a shared network map.
pub struct TestNetwork {
    pub network: Arc<InMemoryNetwork>,
    pub identities: Arc<IdentityService>,
    pub notary: Arc<InMemoryNotary>,
}

impl TestNetwork {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(TestNetwork {
            network: InMemoryNetwork::new(),
            identities: Arc::new(IdentityService::new()),
            notary: Arc::new(InMemoryNotary::new(NOTARY)?),
        })
    }

    pub fn node(&self, name: &str) -> Result<Arc<Node>, Box<dyn std::error::Error>> {
        self.node_with_config(NodeConfig::new(name, NOTARY))
    }

    pub fn node_with_config(
        &self,
        config: NodeConfig,
    ) -> Result<Arc<Node>, Box<dyn std::error::Error>> {
        Ok(Node::join(
            &self.network,
            self.identities.clone(),
            self.notary.clone(),
            config,
        )?)
    }
}

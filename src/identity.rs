//! Network identities.

use crate::crypto::PublicKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A well-known network party: a legal name bound to its identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub owning_key: PublicKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Party {
            name: name.into(),
            owning_key,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A state participant. Account-owned states only reveal the account key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AbstractParty {
    Party(Party),
    Anonymous(PublicKey),
}

impl AbstractParty {
    pub fn owning_key(&self) -> &PublicKey {
        match self {
            AbstractParty::Party(p) => &p.owning_key,
            AbstractParty::Anonymous(key) => key,
        }
    }
}

/// Registry of well-known parties, keyed both ways.
#[derive(Debug, Default)]
pub struct IdentityService {
    by_key: RwLock<HashMap<PublicKey, Party>>,
    by_name: RwLock<HashMap<String, Party>>,
}

impl IdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, party: Party) {
        self.by_key.write().insert(party.owning_key, party.clone());
        self.by_name.write().insert(party.name.clone(), party);
    }

    pub fn party_from_key(&self, key: &PublicKey) -> Option<Party> {
        self.by_key.read().get(key).cloned()
    }

    pub fn party_from_name(&self, name: &str) -> Option<Party> {
        self.by_name.read().get(name).cloned()
    }
}

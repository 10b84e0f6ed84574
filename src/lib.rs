//! LoanLedger - an account-aware loan book on a notarised transaction ledger
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Ledger Model
//! - [`identity`] - Network parties
//! - [`state`] - Loan and account states
//! - [`transaction`] - Transaction types, builder and signature checks
//! - [`contract`] - Business-rule verification
//!
//! ## Accounts & Storage
//! - [`accounts`] - Account directory
//! - [`vault`] - State store
//! - [`persistence`] - Flow checkpoints (SQLite)
//!
//! ## Protocols
//! - [`signing`] - Signature collection
//! - [`finality`] - Notarisation and broadcast
//! - [`flows`] - Issue, transfer, split and share orchestrations
//!
//! ## Collaborators
//! - [`messaging`] - Point-to-point messaging
//! - [`notary`] - Notary service
//! - [`keys`] - Key management
//!
//! ## Configuration & Utilities
//! - [`node`] - Node wiring and logging
//! - [`config`] - Configuration management
//! - [`crypto`] - Signatures and hashing (secp256k1)
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Ledger Model
// ============================================================================
pub mod contract;
pub mod identity;
pub mod state;
pub mod transaction;

// ============================================================================
// Accounts & Storage
// ============================================================================
pub mod accounts;
pub mod persistence;
pub mod vault;

// ============================================================================
// Protocols
// ============================================================================
pub mod finality;
pub mod flows;
pub mod signing;

// ============================================================================
// Collaborators
// ============================================================================
pub mod keys;
pub mod messaging;
pub mod notary;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod crypto;
pub mod error;
pub mod node;

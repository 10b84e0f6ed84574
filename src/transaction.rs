//! Transaction module split into types, builder and signature validation

pub mod builder;
pub mod types;
pub mod validation;

pub use builder::TransactionBuilder;
pub use types::*;

//! Credential records and the in-memory collection

mod store;
mod types;

pub use store::CredentialStore;
pub use types::*;

//! Credential record and the vault contract consumed by the upload path.

mod record;
mod store;

pub use record::{mask_account, CredentialRecord};
pub use store::{CredentialStatus, CredentialStore, InMemoryCredentialStore, VaultError};

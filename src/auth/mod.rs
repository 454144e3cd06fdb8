//! Credential types, storage and the backend token exchange.

pub mod error;
pub mod exchange;
pub mod provider;
pub mod silent;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use exchange::{HttpTokenExchange, TokenExchange};
pub use provider::AuthProvider;
pub use silent::SilentRefresh;
pub use store::{CredentialStore, CredentialStoreConfig, FileCredentialStore, MemoryCredentialStore};
pub use token::{CredentialRecord, TokenResponse, UpstreamCredential};

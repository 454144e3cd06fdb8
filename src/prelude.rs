//! Convenience re-exports for common use.

pub use crate::auth::{
    AuthError, AuthProvider, CredentialRecord, CredentialStore, FileCredentialStore,
    HttpTokenExchange, MemoryCredentialStore, SilentRefresh, TokenExchange, TokenResponse,
    UpstreamCredential,
};
pub use crate::config::{ClientConfig, RefreshConfig};
pub use crate::refresh::TokenRefresher;
pub use crate::session::{SessionEvent, SessionSignal};
pub use crate::util::retry::RetryPolicy;

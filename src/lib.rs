//! tokenflight: single-flight access token refresh.
//!
//! Keeps a short-lived backend access token valid for any number of
//! concurrent callers. Concurrent refresh demands collapse into one network
//! exchange, tokens are renewed shortly before they expire, transient
//! failures are retried with backoff, and an unrecoverable refresh failure
//! clears the stored credentials and is broadcast as a session-expired event.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenflight::prelude::*;
//!
//! # async fn example() -> tokenflight::auth::error::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let refresher = TokenRefresher::builder()
//!     .store(Arc::new(FileCredentialStore::new(config.credential_store_config())))
//!     .exchange(Arc::new(HttpTokenExchange::with_timeout(
//!         &config.base_url,
//!         config.request_timeout,
//!     )?))
//!     .config(config.refresh.clone())
//!     .build();
//!
//! let token = refresher.get_valid_access_token().await?;
//! println!("Bearer {token}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod prelude;
pub mod refresh;
pub mod session;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

use async_trait::async_trait;

use super::provider::AuthProvider;

/// Provider SDK hook that can mint a fresh upstream identity token without
/// user interaction (for example a cached Google sign-in).
///
/// The refresher asks it once per refresh attempt, before falling back to the
/// backend refresh token, and only when the stored session came from
/// [`SilentRefresh::provider`].
#[async_trait]
pub trait SilentRefresh: Send + Sync {
    fn provider(&self) -> AuthProvider;

    /// A fresh upstream token, or `None` when the SDK cannot produce one.
    async fn refresh_upstream_token(&self) -> Option<String>;
}

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Upstream identity provider that issued the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthProvider {
    Google,
    Apple,
    Email,
}

impl AuthProvider {
    /// Provider assumed for refreshed tokens when none was recorded at sign-in.
    pub const FALLBACK: AuthProvider = AuthProvider::Google;
}

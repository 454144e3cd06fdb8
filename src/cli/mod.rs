//! CLI entry point for tokenflight.

pub mod auth;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use crate::auth::{AuthError, AuthProvider, FileCredentialStore, HttpTokenExchange};
use crate::config::ClientConfig;
use crate::refresh::TokenRefresher;

/// tokenflight CLI
#[derive(Parser, Debug)]
#[command(name = "tokenflight", version, about = "Manage a backend session from the terminal")]
pub struct Cli {
    /// TOML config file (environment variables still override it)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Exchange an upstream OAuth token for a backend session
    SignIn(SignInArgs),
    /// Show the stored session
    Status,
    /// Print a valid access token, refreshing if needed
    Token,
    /// Force a token refresh
    Refresh,
    /// Clear the stored session
    SignOut,
    /// Keep the session fresh until it expires or Ctrl-C
    Watch,
}

/// Arguments for `tokenflight sign-in`.
#[derive(Parser, Debug)]
pub struct SignInArgs {
    /// Upstream provider (google, apple, email)
    #[arg(long)]
    pub provider: AuthProvider,

    /// Token issued by the upstream provider
    #[arg(long)]
    pub token: String,

    /// Authorization code, when the provider issued one
    #[arg(long)]
    pub authorization_code: Option<String>,

    /// Stable user identifier to remember with the session
    #[arg(long)]
    pub user_id: Option<String>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Wire a refresher backed by the credential file and HTTP exchange in `config`.
pub fn build_refresher(config: &ClientConfig) -> Result<TokenRefresher, AuthError> {
    let store = FileCredentialStore::new(config.credential_store_config());
    let exchange = HttpTokenExchange::with_timeout(&config.base_url, config.request_timeout)?;
    Ok(TokenRefresher::builder()
        .store(Arc::new(store))
        .exchange(Arc::new(exchange))
        .config(config.refresh.clone())
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_sign_in_with_code() {
        let cli = Cli::try_parse_from([
            "tokenflight",
            "sign-in",
            "--provider",
            "apple",
            "--token",
            "id-token",
            "--authorization-code",
            "code-1",
        ])
        .unwrap();
        match cli.command {
            Commands::SignIn(args) => {
                assert_eq!(args.provider, AuthProvider::Apple);
                assert_eq!(args.token, "id-token");
                assert_eq!(args.authorization_code.as_deref(), Some("code-1"));
                assert!(args.user_id.is_none());
            }
            other => panic!("expected SignIn, got {other:?}"),
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = Cli::try_parse_from([
            "tokenflight",
            "sign-in",
            "--provider",
            "github",
            "--token",
            "t",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tokenflight",
            "status",
            "--config",
            "/tmp/tokenflight.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/tokenflight.toml")));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn log_format_defaults_to_text() {
        let cli = Cli::try_parse_from(["tokenflight", "watch"]).unwrap();
        assert!(matches!(cli.command, Commands::Watch));
        assert_eq!(cli.log_format, LogFormat::Text);
    }
}

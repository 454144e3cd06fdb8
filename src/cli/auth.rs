//! CLI session command handlers.

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;

use crate::auth::{CredentialStore, UpstreamCredential};
use crate::cli::SignInArgs;
use crate::refresh::TokenRefresher;
use crate::session::SessionEvent;

/// Handle `tokenflight sign-in`.
pub async fn handle_sign_in(
    refresher: &TokenRefresher,
    args: SignInArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut credential = UpstreamCredential::new(args.provider, args.token);
    if let Some(code) = args.authorization_code {
        credential = credential.with_authorization_code(code);
    }
    if let Some(id) = args.user_id {
        credential = credential.with_user_identifier(id);
    }

    let response = refresher.sign_in(&credential).await?;
    println!("✅ Signed in with {}", args.provider);
    println!("   Access token valid for {}s", response.expires_in);
    Ok(())
}

/// Handle `tokenflight status`.
pub async fn handle_status(refresher: &TokenRefresher) -> Result<(), Box<dyn std::error::Error>> {
    let store = refresher.store();

    println!("🔐 Session Status\n");

    let Some(record) = store.load()? else {
        println!("  ❌ Not signed in");
        return Ok(());
    };
    if record.access_token.is_none() {
        println!("  ❌ Not signed in");
        return Ok(());
    }

    let provider = record
        .auth_provider
        .map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("  Provider: {provider}");
    if let Some(user) = &record.user_identifier {
        println!("  User: {user}");
    }

    let status = match record.expires_at {
        Some(expires) if !store.is_access_token_expired() => {
            format!("✅ Valid (expires {})", expires.format("%Y-%m-%d %H:%M:%S UTC"))
        }
        Some(expires) if expires > Utc::now() => {
            "⚠️  Expiring soon (will refresh on next use)".to_string()
        }
        Some(_) => "⚠️  Expired (will refresh on next use)".to_string(),
        None => "⚠️  No expiry recorded (will refresh on next use)".to_string(),
    };
    println!("  Access token: {status}");
    let refresh = if record.refresh_token.is_some() {
        "✅ Stored"
    } else {
        "❌ Missing (sign in again)"
    };
    println!("  Refresh token: {refresh}");
    Ok(())
}

/// Handle `tokenflight token`.
pub async fn handle_token(refresher: &TokenRefresher) -> Result<(), Box<dyn std::error::Error>> {
    let token = refresher.get_valid_access_token().await?;
    println!("{token}");
    Ok(())
}

/// Handle `tokenflight refresh`.
pub async fn handle_refresh(refresher: &TokenRefresher) -> Result<(), Box<dyn std::error::Error>> {
    refresher.force_refresh().await?;
    let expires = refresher.store().token_expiration_date()?;
    match expires {
        Some(expires) => println!(
            "✅ Token refreshed (expires {})",
            expires.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("✅ Token refreshed"),
    }
    Ok(())
}

/// Handle `tokenflight sign-out`.
pub async fn handle_sign_out(refresher: &TokenRefresher) -> Result<(), Box<dyn std::error::Error>> {
    refresher.sign_out()?;
    println!("✅ Signed out");
    Ok(())
}

/// Handle `tokenflight watch`.
pub async fn handle_watch(refresher: &TokenRefresher) -> Result<(), Box<dyn std::error::Error>> {
    if !refresher.store().is_authenticated() {
        eprintln!("❌ Not signed in");
        std::process::exit(1);
    }

    let mut events = refresher.subscribe();
    refresher.resume_session().await;
    println!("⏳ Watching session, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Expired) => {
                    println!("❌ Session expired, sign in again");
                    return Ok(());
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Session watcher lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                refresher.cancel_proactive_refresh();
                println!("\n👋 Stopped watching");
                return Ok(());
            }
        }
    }
}

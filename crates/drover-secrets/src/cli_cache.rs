//! Read-only consumers of external CLI credential caches.
//!
//! The Gemini and Codex CLIs own their OAuth flows; drover only reads the
//! cached credentials they write and, when a token has expired, re-runs the
//! CLI's auth command over the controlling terminal and re-reads the file.

use std::path::PathBuf;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{CredentialError, Result};
use crate::store::OAuthToken;

/// Which external CLI owns the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalCli {
    Gemini,
    Codex,
}

impl ExternalCli {
    pub fn provider_id(&self) -> &'static str {
        match self {
            ExternalCli::Gemini => "gemini-cli",
            ExternalCli::Codex => "openai-codex",
        }
    }

    pub fn binary(&self) -> &'static str {
        match self {
            ExternalCli::Gemini => "gemini",
            ExternalCli::Codex => "codex",
        }
    }

    /// Argument passed to the binary to start its interactive auth flow.
    pub fn auth_arg(&self) -> &'static str {
        "auth"
    }

    /// npm package installed when the binary is absent.
    pub fn npm_package(&self) -> &'static str {
        match self {
            ExternalCli::Gemini => "@google/gemini-cli",
            ExternalCli::Codex => "@openai/codex",
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        match self {
            ExternalCli::Gemini => home.join(".gemini").join("oauth_creds.json"),
            ExternalCli::Codex => home.join(".codex").join("auth.json"),
        }
    }
}

/// Parse a CLI cache file into the canonical token shape. The two CLIs use
/// different field names and expiry units; both normalize here.
pub fn parse_cache(cli: ExternalCli, raw: &str) -> Result<OAuthToken> {
    let value: Value = serde_json::from_str(raw)?;
    match cli {
        ExternalCli::Gemini => parse_gemini(&value),
        ExternalCli::Codex => parse_codex(&value),
    }
}

fn parse_gemini(value: &Value) -> Result<OAuthToken> {
    let access_token = value
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| CredentialError::NotFound("gemini cache access_token".into()))?;
    // The Gemini CLI stores `expiry_date` in milliseconds.
    let expires_at = value
        .get("expiry_date")
        .and_then(Value::as_i64)
        .map(|ms| ms / 1000)
        .or_else(|| value.get("expires_at").and_then(Value::as_i64))
        .unwrap_or(0);
    Ok(OAuthToken {
        access_token: access_token.to_string(),
        refresh_token: value
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string),
        expires_at,
        email: value.get("email").and_then(Value::as_str).map(str::to_string),
    })
}

fn parse_codex(value: &Value) -> Result<OAuthToken> {
    // Newer Codex CLI nests tokens; older builds keep them flat.
    let tokens = value.get("tokens").unwrap_or(value);
    let access_token = tokens
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| CredentialError::NotFound("codex cache access_token".into()))?;
    let expires_at = tokens
        .get("expires_at")
        .or_else(|| value.get("expires_at"))
        .and_then(Value::as_i64)
        .or_else(|| {
            // Fall back to last_refresh + 1h, the token's nominal lifetime.
            value
                .get("last_refresh")
                .and_then(Value::as_str)
                .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.timestamp() + 3600)
        })
        .unwrap_or(0);
    Ok(OAuthToken {
        access_token: access_token.to_string(),
        refresh_token: tokens
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string),
        expires_at,
        email: tokens.get("email").and_then(Value::as_str).map(str::to_string),
    })
}

/// Load the cache from disk without refreshing.
pub fn load(cli: ExternalCli) -> Result<OAuthToken> {
    let path = cli.cache_path();
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CredentialError::NotFound(format!(
                "{} credential cache at {}",
                cli.binary(),
                path.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };
    parse_cache(cli, &raw)
}

/// Load the cache, re-running the CLI auth flow when the token is stale.
pub async fn load_fresh(cli: ExternalCli) -> Result<OAuthToken> {
    match load(cli) {
        Ok(token) if !token.is_expired() => Ok(token),
        Ok(_) => {
            info!(cli = cli.binary(), "cached credential expired, re-running auth");
            spawn_auth(cli).await?;
            let token = load(cli)?;
            if token.is_expired() {
                return Err(CredentialError::Expired {
                    provider: cli.provider_id().to_string(),
                });
            }
            Ok(token)
        }
        Err(e) => Err(e),
    }
}

/// Run the CLI's interactive auth command, inheriting stdio so the user can
/// complete the browser/device flow.
pub async fn spawn_auth(cli: ExternalCli) -> Result<()> {
    let status = tokio::process::Command::new(cli.binary())
        .arg(cli.auth_arg())
        .status()
        .await
        .map_err(|e| {
            CredentialError::NotFound(format!(
                "{} CLI not runnable ({e}); install it and retry",
                cli.binary()
            ))
        })?;
    if !status.success() {
        warn!(cli = cli.binary(), code = ?status.code(), "auth flow exited non-zero");
        return Err(CredentialError::NotFound(format!(
            "{} auth flow failed",
            cli.binary()
        )));
    }
    Ok(())
}

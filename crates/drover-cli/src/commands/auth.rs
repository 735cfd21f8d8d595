//! `drover models auth` — external-CLI OAuth delegation and static keys.

use anyhow::{bail, Result};
use drover_core::mask::mask_secret;
use drover_core::model_ref::normalize_provider;
use drover_secrets::cli_cache::{self, ExternalCli};

/// Providers whose `auth set-key` requires an explicit base URL.
const BASE_REQUIRED: &[&str] = &["scalytics-copilot", "vllm"];

fn external_cli_for(provider: &str) -> Option<ExternalCli> {
    match provider {
        "gemini" | "gemini-cli" | "google" => Some(ExternalCli::Gemini),
        "openai-codex" | "codex" => Some(ExternalCli::Codex),
        _ => None,
    }
}

fn binary_on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}

/// Install the CLI through npm when it is not on PATH. The npm global
/// install is the documented fallback for hosts without a platform package.
async fn ensure_installed(cli: ExternalCli) -> bool {
    if binary_on_path(cli.binary()) {
        return true;
    }
    println!(
        "{} CLI not found, installing via `npm install -g {}` ...",
        cli.binary(),
        cli.npm_package()
    );
    let status = tokio::process::Command::new("npm")
        .args(["install", "-g", cli.npm_package()])
        .status()
        .await;
    match status {
        Ok(s) if s.success() => binary_on_path(cli.binary()),
        _ => false,
    }
}

/// Exit codes: 0 success, 1 install failure, 2 auth flow cancelled,
/// 3 verification failure.
pub async fn login(provider: &str) -> i32 {
    let Some(cli) = external_cli_for(provider) else {
        eprintln!("provider '{provider}' does not use CLI-delegated OAuth; use `auth set-key`");
        return 1;
    };

    if !ensure_installed(cli).await {
        eprintln!("could not install the {} CLI", cli.binary());
        return 1;
    }

    if cli_cache::spawn_auth(cli).await.is_err() {
        eprintln!("{} auth flow did not complete", cli.binary());
        return 2;
    }

    match cli_cache::load(cli) {
        Ok(token) => {
            if token.is_expired() {
                eprintln!(
                    "credential at {} is already expired",
                    cli.cache_path().display()
                );
                return 3;
            }
            // Seal a snapshot into the credential store so the audit and
            // status surfaces see this provider as authenticated even when
            // the CLI cache moves.
            match super::open_store() {
                Ok(store) => {
                    if let Err(e) = store.save_token(cli.provider_id(), &token) {
                        tracing::warn!(err = %e, "could not seal credential snapshot");
                    }
                }
                Err(e) => tracing::warn!(err = %e, "credential store unavailable"),
            }
            println!(
                "authenticated {} ({})",
                cli.provider_id(),
                token.email.as_deref().unwrap_or("no email recorded")
            );
            0
        }
        Err(e) => {
            eprintln!("credential verification failed: {e}");
            3
        }
    }
}

pub fn set_key(
    config_path: Option<&str>,
    provider: &str,
    key: &str,
    base: Option<&str>,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let provider_id = normalize_provider(provider, config.has_gemini_api_key())?;

    if BASE_REQUIRED.contains(&provider_id.as_str()) && base.is_none() {
        bail!("provider '{provider_id}' needs --base <url> (self-hosted endpoint)");
    }

    let store = super::open_store()?;
    store.save_api_key(&provider_id, key)?;
    if let Some(base) = base {
        store.save_api_base(&provider_id, base)?;
    }
    println!("stored key for {provider_id} ({})", mask_secret(key));
    Ok(())
}

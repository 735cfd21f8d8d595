//! `drover models list` — providers, per-agent models, credential status.

use anyhow::Result;
use drover_core::config::config_root;
use drover_provider::registry::{AuthFlavor, KNOWN_PROVIDERS};
use drover_provider::Resolver;
use drover_secrets::audit::audit_plaintext;
use drover_secrets::cli_cache::{self, ExternalCli};
use std::sync::Arc;

pub async fn run(config_path: Option<&str>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let (store, key_source) = super::open_store_with_source()?;
    let store = Arc::new(store);
    let resolver = Resolver::new(config.clone(), Some(store.clone()));

    println!("master key: {key_source}");
    println!("\nproviders:");
    for known in KNOWN_PROVIDERS {
        let status = match known.auth {
            AuthFlavor::OAuthBearer => {
                let cli = if known.id == "gemini-cli" {
                    ExternalCli::Gemini
                } else {
                    ExternalCli::Codex
                };
                match cli_cache::load(cli) {
                    Ok(tok) if !tok.is_expired() => "oauth ok".to_string(),
                    Ok(_) => "oauth expired".to_string(),
                    Err(_) => "no credential".to_string(),
                }
            }
            AuthFlavor::OptionalBearer => {
                if resolver.api_key_for(known.id).is_some() {
                    "key set".to_string()
                } else {
                    "anonymous".to_string()
                }
            }
            _ => {
                if resolver.api_key_for(known.id).is_some() {
                    "key set".to_string()
                } else {
                    "no key".to_string()
                }
            }
        };
        println!("  {:<20} {:<24} {}", known.id, known.name, status);
    }

    println!("\nagents:");
    let mut agent_ids: Vec<&str> = config.agents.iter().map(|a| a.id.as_str()).collect();
    if agent_ids.is_empty() {
        agent_ids.push("main");
    }
    for agent_id in agent_ids {
        match resolver.resolve(agent_id) {
            Ok(resolution) => {
                let fallbacks = if resolution.fallbacks.is_empty() {
                    String::new()
                } else {
                    let list: Vec<String> =
                        resolution.fallbacks.iter().map(|f| f.to_string()).collect();
                    format!("  (fallbacks: {})", list.join(", "))
                };
                println!(
                    "  {:<16} {}/{}{}",
                    agent_id, resolution.provider_id, resolution.model, fallbacks
                );
            }
            Err(e) => println!("  {agent_id:<16} unresolved: {e}"),
        }
    }

    let findings = audit_plaintext(std::path::Path::new(&config_root()))?;
    if !findings.is_empty() {
        println!("\nsecurity audit:");
        for finding in findings {
            println!("  ! {}: {}", finding.path.display(), finding.reason);
        }
    }

    Ok(())
}

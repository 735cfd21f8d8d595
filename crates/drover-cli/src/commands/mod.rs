pub mod auth;
pub mod list;
pub mod stats;

use anyhow::{Context, Result};
use drover_core::config::{config_root, DroverConfig};
use drover_secrets::{master_key, CredentialStore, KeySource};

/// Open the credential store, resolving the master key through the backend
/// hierarchy (keyring, sealed container, key file).
pub fn open_store() -> Result<CredentialStore> {
    open_store_with_source().map(|(store, _)| store)
}

pub fn open_store_with_source() -> Result<(CredentialStore, KeySource)> {
    let root = config_root();
    let (key, source) = master_key::load_or_create(std::path::Path::new(&root), true)
        .context("master key resolution failed")?;
    tracing::debug!(%source, "master key resolved");
    Ok((CredentialStore::new(root, key), source))
}

pub fn load_config(path: Option<&str>) -> Result<DroverConfig> {
    DroverConfig::load(path).context("loading configuration")
}

//! Typed credential storage over the secretbox primitives.
//!
//! OAuth tokens are one sealed file per provider so an external CLI-driven
//! refresh rewrites a single small blob. Static API keys share one sealed
//! container (the tomb) as an env-map, giving them a single-seal integrity
//! check. Tomb writes hold an exclusive advisory lock; reads do not lock.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use drover_core::config::TOKEN_EXPIRY_GRACE_SECS;

use crate::error::{CredentialError, Result};
use crate::master_key::{ensure_private_dir, write_private_file, MasterKey};
use crate::secretbox;

/// An OAuth credential as stored inside a sealed token file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
    #[serde(default)]
    pub email: Option<String>,
}

impl OAuthToken {
    /// Expired when within the 60 s grace window of `expires_at`.
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        now >= self.expires_at - TOKEN_EXPIRY_GRACE_SECS
    }
}

fn tomb_entry_key(provider_id: &str) -> String {
    format!("provider.apikey.{}", provider_id.to_ascii_lowercase())
}

fn tomb_base_key(provider_id: &str) -> String {
    format!("provider.apibase.{}", provider_id.to_ascii_lowercase())
}

/// Encrypted credential store rooted at the config directory.
pub struct CredentialStore {
    root: PathBuf,
    key: MasterKey,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>, key: MasterKey) -> Self {
        Self {
            root: root.into(),
            key,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn auth_dir(&self) -> PathBuf {
        self.root.join("auth")
    }

    fn token_path(&self, provider_id: &str) -> PathBuf {
        self.auth_dir()
            .join("providers")
            .join(provider_id.to_ascii_lowercase())
            .join("token.json")
    }

    fn tomb_path(&self) -> PathBuf {
        self.auth_dir().join("tomb.sealed")
    }

    fn tomb_lock_path(&self) -> PathBuf {
        self.auth_dir().join("tomb.sealed.lock")
    }

    // ── OAuth tokens ─────────────────────────────────────────────────────

    pub fn load_token(&self, provider_id: &str) -> Result<OAuthToken> {
        let path = self.token_path(provider_id);
        let sealed = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound(format!(
                    "oauth token for provider '{provider_id}'"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let plaintext = secretbox::decrypt(&self.key, &sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Seal and persist a token. Holds the per-file lock for the duration of
    /// the write so a concurrent refresh cannot interleave.
    pub fn save_token(&self, provider_id: &str, token: &OAuthToken) -> Result<()> {
        let path = self.token_path(provider_id);
        ensure_private_dir(path.parent().expect("token path has parent"))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.with_extension("json.lock"))?;
        lock_file.lock_exclusive()?;

        let plaintext = serde_json::to_vec(token)?;
        let sealed = secretbox::encrypt(&self.key, &plaintext)?;
        let result = write_private_file(&path, &sealed);

        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    pub fn is_expired(&self, token: &OAuthToken) -> bool {
        token.is_expired()
    }

    // ── Static API keys (the tomb) ───────────────────────────────────────

    fn read_tomb(&self) -> Result<BTreeMap<String, String>> {
        let sealed = match std::fs::read(self.tomb_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let plaintext = secretbox::decrypt(&self.key, &sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn write_tomb(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let plaintext = serde_json::to_vec(entries)?;
        let sealed = secretbox::encrypt(&self.key, &plaintext)?;
        write_private_file(&self.tomb_path(), &sealed)
    }

    /// Run `mutate` against the tomb under an exclusive advisory lock,
    /// re-reading inside the lock so concurrent writers cannot lose updates.
    fn with_tomb_lock<T>(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<T> {
        ensure_private_dir(&self.auth_dir())?;
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.tomb_lock_path())?;
        lock_file.lock_exclusive()?;

        let result = (|| {
            let mut entries = self.read_tomb()?;
            let value = mutate(&mut entries);
            self.write_tomb(&entries)?;
            Ok(value)
        })();

        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    pub fn load_api_key(&self, provider_id: &str) -> Result<String> {
        self.read_tomb()?
            .remove(&tomb_entry_key(provider_id))
            .ok_or_else(|| {
                CredentialError::NotFound(format!("api key for provider '{provider_id}'"))
            })
    }

    pub fn save_api_key(&self, provider_id: &str, api_key: &str) -> Result<()> {
        let entry = tomb_entry_key(provider_id);
        let value = api_key.to_string();
        self.with_tomb_lock(move |entries| {
            entries.insert(entry, value);
        })
    }

    pub fn delete_api_key(&self, provider_id: &str) -> Result<bool> {
        let entry = tomb_entry_key(provider_id);
        self.with_tomb_lock(move |entries| entries.remove(&entry).is_some())
    }

    /// Base URL override stored alongside the key (self-hosted backends).
    pub fn load_api_base(&self, provider_id: &str) -> Option<String> {
        self.read_tomb()
            .ok()
            .and_then(|mut entries| entries.remove(&tomb_base_key(provider_id)))
    }

    pub fn save_api_base(&self, provider_id: &str, api_base: &str) -> Result<()> {
        let entry = tomb_base_key(provider_id);
        let value = api_base.to_string();
        self.with_tomb_lock(move |entries| {
            entries.insert(entry, value);
        })
    }

    /// Provider ids with a stored key. Values are never returned here.
    pub fn list_api_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .read_tomb()?
            .keys()
            .filter_map(|k| k.strip_prefix("provider.apikey.").map(str::to_string))
            .collect())
    }
}

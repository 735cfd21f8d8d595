//! Master-key resolution for the secrets store.
//!
//! Strict order, first success wins:
//!   1. OS keyring under a fixed service/account pair.
//!   2. A sealed key container unsealed by a machine-derived passphrase.
//!   3. A plain 0600 key file.
//!
//! Backends 2 and 3 are only created when a new key must be persisted; a
//! missing key with no readable backend is an error, never a fresh key per
//! process (divergent keys would strand previously sealed credentials).

use std::path::{Path, PathBuf};

use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::error::{CredentialError, Result};
use crate::secretbox;

const KEYRING_SERVICE: &str = "drover";
const KEYRING_ACCOUNT: &str = "master-key";
const MACHINE_KEY_CONTEXT: &str = "drover-master-key-v1";
const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// 256-bit symmetric key for the secretbox.
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes)
            .map_err(|_| CredentialError::Crypto("key generation failed".into()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Which backend the key was resolved from, reported by `models list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Keyring,
    SealedContainer,
    KeyFile,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Keyring => f.write_str("os-keyring"),
            KeySource::SealedContainer => f.write_str("sealed-container"),
            KeySource::KeyFile => f.write_str("key-file"),
        }
    }
}

fn container_path(root: &Path) -> PathBuf {
    root.join("secrets").join("master.key.sealed")
}

fn key_file_path(root: &Path) -> PathBuf {
    root.join("secrets").join("master.key")
}

/// Passphrase-derived key for the sealed container, bound to this machine.
/// Stable across restarts; moving the container to another host will not
/// unseal it, which is the point.
fn machine_bound_key() -> MasterKey {
    let mut segments = vec![
        MACHINE_KEY_CONTEXT.to_string(),
        format!("os={}", std::env::consts::OS),
        format!("arch={}", std::env::consts::ARCH),
    ];
    for variable in ["HOSTNAME", "USER", "HOME"] {
        if let Ok(value) = std::env::var(variable) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                segments.push(format!("{variable}={trimmed}"));
            }
        }
    }
    for path in MACHINE_ID_PATHS {
        if let Ok(raw) = std::fs::read_to_string(path) {
            let id = raw.trim();
            if !id.is_empty() {
                segments.push(format!("machine_id={id}"));
                break;
            }
        }
    }

    let digest = Sha256::digest(segments.join("|").as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    MasterKey(bytes)
}

fn read_keyring() -> Option<MasterKey> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT).ok()?;
    let encoded = entry.get_password().ok()?;
    decode_key_hex(&encoded).ok()
}

fn write_keyring(key: &MasterKey) -> bool {
    let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT) else {
        return false;
    };
    entry.set_password(&hex::encode(key.bytes())).is_ok()
}

fn decode_key_hex(encoded: &str) -> Result<MasterKey> {
    let raw = hex::decode(encoded.trim())
        .map_err(|_| CredentialError::Crypto("master key file is not valid hex".into()))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| CredentialError::Crypto("master key has wrong length".into()))?;
    Ok(MasterKey(bytes))
}

fn read_container(root: &Path) -> Result<Option<MasterKey>> {
    let path = container_path(root);
    let sealed = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let raw = secretbox::decrypt(&machine_bound_key(), &sealed)?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| CredentialError::Crypto("master key container has wrong length".into()))?;
    Ok(Some(MasterKey(bytes)))
}

fn write_container(root: &Path, key: &MasterKey) -> Result<()> {
    let path = container_path(root);
    ensure_private_dir(path.parent().expect("container path has parent"))?;
    let sealed = secretbox::encrypt(&machine_bound_key(), key.bytes())?;
    write_private_file(&path, &sealed)
}

fn read_key_file(root: &Path) -> Result<Option<MasterKey>> {
    let path = key_file_path(root);
    match std::fs::read_to_string(&path) {
        Ok(encoded) => decode_key_hex(&encoded).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_key_file(root: &Path, key: &MasterKey) -> Result<()> {
    let path = key_file_path(root);
    ensure_private_dir(path.parent().expect("key file path has parent"))?;
    write_private_file(&path, hex::encode(key.bytes()).as_bytes())
}

pub(crate) fn ensure_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Resolve the master key, creating and persisting one if no backend holds
/// a key yet. `use_keyring: false` skips backend 1 (headless hosts, tests).
pub fn load_or_create(root: &Path, use_keyring: bool) -> Result<(MasterKey, KeySource)> {
    if use_keyring {
        if let Some(key) = read_keyring() {
            return Ok((key, KeySource::Keyring));
        }
    }
    if let Some(key) = read_container(root)? {
        return Ok((key, KeySource::SealedContainer));
    }
    if let Some(key) = read_key_file(root)? {
        return Ok((key, KeySource::KeyFile));
    }

    // Nothing stored anywhere: mint one key and persist it to the first
    // backend that will take it.
    let key = MasterKey::generate()?;
    if use_keyring && write_keyring(&key) {
        tracing::info!("master key created in OS keyring");
        return Ok((key, KeySource::Keyring));
    }
    if write_container(root, &key).is_ok() {
        tracing::info!("master key created in sealed container");
        return Ok((key, KeySource::SealedContainer));
    }
    write_key_file(root, &key)?;
    tracing::info!("master key created as 0600 key file");
    Ok((key, KeySource::KeyFile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_then_reloads_same_key() {
        let dir = TempDir::new().unwrap();
        let (first, _) = load_or_create(dir.path(), false).unwrap();
        let (second, source) = load_or_create(dir.path(), false).unwrap();
        assert_eq!(first.bytes(), second.bytes());
        assert!(matches!(
            source,
            KeySource::SealedContainer | KeySource::KeyFile
        ));
    }

    #[test]
    fn container_unseals_with_machine_key() {
        let dir = TempDir::new().unwrap();
        let key = MasterKey::from_bytes([3u8; 32]);
        write_container(dir.path(), &key).unwrap();
        let loaded = read_container(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.bytes(), key.bytes());
    }

    #[test]
    fn corrupted_container_reports_crypto_not_missing() {
        let dir = TempDir::new().unwrap();
        let key = MasterKey::from_bytes([3u8; 32]);
        write_container(dir.path(), &key).unwrap();
        let path = container_path(dir.path());
        let mut data = std::fs::read(&path).unwrap();
        let last = data.last_mut().unwrap();
        *last ^= 0xFF;
        std::fs::write(&path, &data).unwrap();
        assert!(matches!(
            read_container(dir.path()),
            Err(CredentialError::Crypto(_))
        ));
    }

    #[test]
    fn key_file_round_trips_hex() {
        let dir = TempDir::new().unwrap();
        let key = MasterKey::from_bytes([0xAB; 32]);
        write_key_file(dir.path(), &key).unwrap();
        let loaded = read_key_file(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.bytes(), key.bytes());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        write_key_file(dir.path(), &MasterKey::from_bytes([1u8; 32])).unwrap();
        let mode = std::fs::metadata(key_file_path(dir.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn debug_never_prints_key_bytes() {
        let key = MasterKey::from_bytes([0x41; 32]);
        let formatted = format!("{key:?}");
        assert!(formatted.contains("REDACTED"));
        assert!(!formatted.contains("41, 41"));
    }
}

//! Authenticated symmetric encryption for credentials at rest.
//!
//! Sealed layout: `version(1) ‖ nonce(12) ‖ ciphertext+tag`. The version
//! byte lets future algorithms coexist with already-sealed blobs.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{CredentialError, Result};
use crate::master_key::MasterKey;

/// Current sealed-format version byte.
pub const FORMAT_VERSION: u8 = 1;

/// AES-256-GCM authentication tag length.
const TAG_LEN: usize = 16;

/// Minimum size of any valid sealed blob: version + nonce + tag.
pub const MIN_SEALED_LEN: usize = 1 + NONCE_LEN + TAG_LEN;

fn aead_key(key: &MasterKey) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key.bytes())
        .map_err(|_| CredentialError::Crypto("invalid master key length".into()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Seal `plaintext` under the master key with a fresh random nonce.
pub fn encrypt(key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| CredentialError::Crypto("nonce generation failed".into()))?;

    let sealing = aead_key(key)?;
    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| CredentialError::Crypto("encryption failed".into()))?;

    let mut sealed = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
    sealed.push(FORMAT_VERSION);
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&in_out);
    Ok(sealed)
}

/// Open a sealed blob. Any structural or integrity problem is `Crypto`,
/// never `NotFound` — a missing blob is the caller's concern.
pub fn decrypt(key: &MasterKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(CredentialError::Crypto("sealed blob is truncated".into()));
    }
    if sealed[0] != FORMAT_VERSION {
        return Err(CredentialError::Crypto(format!(
            "unsupported sealed format version {}",
            sealed[0]
        )));
    }

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&sealed[1..1 + NONCE_LEN]);

    let opening = aead_key(key)?;
    let mut in_out = sealed[1 + NONCE_LEN..].to_vec();
    let plaintext = opening
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| CredentialError::Crypto("integrity check failed".into()))?;
    Ok(plaintext.to_vec())
}

/// Heuristic used by the security audit: does this byte string start with a
/// known sealed-format version?
pub fn looks_sealed(data: &[u8]) -> bool {
    data.first() == Some(&FORMAT_VERSION)
}

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use constant_time_eq::constant_time_eq;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use zeroize::{ZeroizeOnDrop, Zeroizing};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// 32-byte ChaCha20Poly1305 master key. Read-only after startup.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Generate a fresh random master key.
pub fn generate_key() -> EncryptionKey {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    EncryptionKey(key)
}

/// Wrap raw key bytes. Returns `None` unless exactly 32 bytes are given.
pub fn load_key(bytes: &[u8]) -> Option<EncryptionKey> {
    let key: [u8; KEY_LEN] = bytes.try_into().ok()?;
    Some(EncryptionKey(key))
}

/// Parse a base64-encoded master key (standard or URL-safe, padding optional).
pub fn parse_key(encoded: &str) -> Result<EncryptionKey> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        anyhow::bail!("master key is empty");
    }

    let decoded = [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(encoded).ok())
        .map(Zeroizing::new)
        .context("master key is not valid base64")?;

    let key = load_key(&decoded).with_context(|| {
        format!(
            "master key must decode to {KEY_LEN} bytes, got {}",
            decoded.len()
        )
    })?;
    if key.as_bytes().iter().all(|b| *b == 0) {
        anyhow::bail!("master key must not be all zeroes");
    }
    Ok(key)
}

/// Base64 (standard, padded) form of a key, as printed by `burnbox keygen`.
pub fn encode_key(key: &EncryptionKey) -> String {
    STANDARD.encode(key.as_bytes())
}

// ── Passphrase hashing ────────────────────────────────────────────────────────

/// Key-derivation algorithm used to hash passphrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Pbkdf2Sha256,
    Pbkdf2Sha512,
    Argon2id,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pbkdf2Sha256 => "pbkdf2-sha256",
            Self::Pbkdf2Sha512 => "pbkdf2-sha512",
            Self::Argon2id => "argon2id",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pbkdf2-sha256" | "sha256" => Ok(Self::Pbkdf2Sha256),
            "pbkdf2-sha512" | "sha512" => Ok(Self::Pbkdf2Sha512),
            "argon2id" => Ok(Self::Argon2id),
            other => anyhow::bail!(
                "unknown hash algorithm '{other}' (expected pbkdf2-sha256, pbkdf2-sha512 or argon2id)"
            ),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for [`hash_passphrase`]. Stored with every record so a record
/// stays verifiable after the configured defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashParams {
    pub algorithm: HashAlgorithm,
    /// PBKDF2 rounds, or Argon2 time cost.
    pub iterations: u32,
    /// Argon2 memory cost in KiB. Ignored by PBKDF2.
    pub memory_kib: u32,
    /// Output length in bytes.
    pub hash_len: usize,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Pbkdf2Sha256,
            iterations: 600_000,
            memory_kib: 19_456,
            hash_len: 32,
        }
    }
}

/// Generate `len` random salt bytes.
pub fn generate_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive the passphrase hash. Deterministic for equal inputs.
pub fn hash_passphrase(passphrase: &[u8], salt: &[u8], params: &HashParams) -> Result<Vec<u8>> {
    let mut out = vec![0u8; params.hash_len];
    match params.algorithm {
        HashAlgorithm::Pbkdf2Sha256 => {
            pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, params.iterations, &mut out)
        }
        HashAlgorithm::Pbkdf2Sha512 => {
            pbkdf2::pbkdf2_hmac::<Sha512>(passphrase, salt, params.iterations, &mut out)
        }
        HashAlgorithm::Argon2id => {
            argon2_hasher(params)?
                .hash_password_into(passphrase, salt, &mut out)
                .map_err(|e| anyhow::anyhow!("argon2 hash: {e}"))?;
        }
    }
    Ok(out)
}

/// Build the Argon2id hasher for `params`. Also used to validate config at startup.
pub fn argon2_hasher(params: &HashParams) -> Result<Argon2<'static>> {
    let argon_params = Params::new(params.memory_kib, params.iterations, 1, Some(params.hash_len))
        .map_err(|e| anyhow::anyhow!("argon2 params: {e}"))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params))
}

/// Constant-time comparison of a freshly derived hash against the stored one.
pub fn verify_passphrase(candidate: &[u8], stored: &[u8]) -> bool {
    constant_time_eq(candidate, stored)
}

// ── Payload encryption ───────────────────────────────────────────────────────

/// Encrypt `plaintext` with `key`. Output is `nonce || ciphertext || tag`.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("encrypt: {e}"))?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt output of [`encrypt`]. Any tampering, truncation or wrong key is an error.
pub fn decrypt(key: &EncryptionKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < NONCE_LEN + TAG_LEN {
        anyhow::bail!("ciphertext truncated ({} bytes)", ciphertext.len());
    }
    let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|e| anyhow::anyhow!("decrypt: {e}"))?;

    Ok(Zeroizing::new(plaintext))
}

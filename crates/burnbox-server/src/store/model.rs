use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use super::crypto::{HashAlgorithm, HashParams, NONCE_LEN, TAG_LEN};

/// Leading byte of every stored record. Anything else is rejected on decode.
const RECORD_V1_MARKER: u8 = 0x01;

/// Stored in redb under the retrieval token as `[RECORD_V1_MARKER] + bincode(record)`.
/// `expire_at` stays plaintext so the background sweep can evict without decrypting.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// `nonce || ChaCha20Poly1305 ciphertext || tag` under the master key.
    pub ciphertext: Vec<u8>,
    /// Passphrase hash produced with `salt` and `kdf`.
    pub passphrase_hash: Vec<u8>,
    /// Per-record random salt.
    pub salt: Vec<u8>,
    #[zeroize(skip)]
    pub kdf: HashParams,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
    /// Unix timestamp (seconds) at and after which the record is gone. Never extended.
    pub expire_at: i64,
}

impl SecretRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expire_at
    }

    /// Structural checks applied to every record read back from storage.
    fn validate(&self) -> Result<()> {
        if self.ciphertext.len() < NONCE_LEN + TAG_LEN {
            anyhow::bail!("ciphertext too short ({} bytes)", self.ciphertext.len());
        }
        if self.salt.is_empty() {
            anyhow::bail!("empty salt");
        }
        if self.passphrase_hash.len() != self.kdf.hash_len {
            anyhow::bail!(
                "hash length {} does not match kdf output length {}",
                self.passphrase_hash.len(),
                self.kdf.hash_len
            );
        }
        if self.kdf.iterations == 0 {
            anyhow::bail!("kdf iteration count is zero");
        }
        if self.kdf.algorithm == HashAlgorithm::Argon2id && self.kdf.memory_kib == 0 {
            anyhow::bail!("argon2 memory cost is zero");
        }
        if self.expire_at < self.created_at {
            anyhow::bail!("record expires before it was created");
        }
        Ok(())
    }
}

/// Encode a record for storage.
pub fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode")?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_V1_MARKER);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode and validate a stored record.
pub fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    let Some((&marker, payload)) = bytes.split_first() else {
        anyhow::bail!("empty record");
    };
    if marker != RECORD_V1_MARKER {
        anyhow::bail!("unknown record format 0x{marker:02x}");
    }
    let (record, read): (SecretRecord, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .context("bincode decode")?;
    if read != payload.len() {
        anyhow::bail!("{} trailing bytes after record", payload.len() - read);
    }
    record.validate()?;
    Ok(record)
}

use std::time::Duration;

use anyhow::Result;

use crate::store::crypto::{self, HashAlgorithm, HashParams};

pub const MIN_SALT_LEN: usize = 16;
pub const MAX_SALT_LEN: usize = 64;
pub const MIN_HASH_LEN: usize = 16;
pub const MAX_HASH_LEN: usize = 64;
pub const MIN_PBKDF2_ROUNDS: u32 = 1_000;
pub const MAX_PASSPHRASE_BYTES: usize = 1024;

/// Tunables consumed by [`crate::vault::Vault`].
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub hash: HashParams,
    /// Salt length in bytes, fresh per record.
    pub salt_len: usize,
    /// Lifetime of a record from creation.
    pub ttl: Duration,
    /// Upper bound on the secret payload, in bytes.
    pub max_secret_bytes: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            hash: HashParams::default(),
            salt_len: 32,
            ttl: Duration::from_secs(7 * 24 * 3600),
            max_secret_bytes: 64 * 1024,
        }
    }
}

impl VaultConfig {
    /// Reject configurations the server must refuse to start with.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&self.salt_len) {
            anyhow::bail!(
                "salt size must be {MIN_SALT_LEN}..={MAX_SALT_LEN} bytes, got {}",
                self.salt_len
            );
        }
        if !(MIN_HASH_LEN..=MAX_HASH_LEN).contains(&self.hash.hash_len) {
            anyhow::bail!(
                "hash length must be {MIN_HASH_LEN}..={MAX_HASH_LEN} bytes, got {}",
                self.hash.hash_len
            );
        }
        match self.hash.algorithm {
            HashAlgorithm::Pbkdf2Sha256 | HashAlgorithm::Pbkdf2Sha512 => {
                if self.hash.iterations < MIN_PBKDF2_ROUNDS {
                    anyhow::bail!(
                        "{} needs at least {MIN_PBKDF2_ROUNDS} iterations, got {}",
                        self.hash.algorithm,
                        self.hash.iterations
                    );
                }
            }
            HashAlgorithm::Argon2id => {
                crypto::argon2_hasher(&self.hash)?;
            }
        }
        if self.ttl.is_zero() {
            anyhow::bail!("ttl must be greater than zero");
        }
        if i64::try_from(self.ttl.as_secs()).is_err() {
            anyhow::bail!("ttl is out of range");
        }
        if self.max_secret_bytes == 0 {
            anyhow::bail!("max secret size must be greater than zero");
        }
        Ok(())
    }
}

//! Secret lifecycle: `Pending -> Active -> (Consumed | Expired)`.
//!
//! `create` moves a token from pending to active by persisting an encrypted
//! record. `consume` removes the record *before* checking the passphrase, so
//! every attempt against a token is its last one, right or wrong. Peeking,
//! verifying and deleting only on success would allow unlimited guesses
//! against a live record and would open a read race between two consumers.
//!
//! The vault keeps no mutable state of its own; coordination between
//! concurrent requests rests entirely on [`SecretStore::take`].

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::config::{VaultConfig, MAX_PASSPHRASE_BYTES};
use crate::error::VaultError;
use crate::store::{
    crypto::{self, EncryptionKey},
    db, token, InsertResult, SecretRecord, SecretStore, Store, TakeResult,
};

/// Attempts at finding an unused token before giving up.
pub const MAX_TOKEN_ATTEMPTS: usize = 3;

/// Returned by [`Vault::create`].
#[derive(Debug, Clone)]
pub struct Created {
    pub token: String,
    /// Unix timestamp (seconds) after which the secret is gone.
    pub expires_at: i64,
}

/// Creates and consumes one-shot secrets.
#[derive(Clone)]
pub struct Vault<S = Store> {
    store: S,
    key: Arc<EncryptionKey>,
    config: Arc<VaultConfig>,
}

impl<S: SecretStore> Vault<S> {
    pub fn new(store: S, key: EncryptionKey, config: VaultConfig) -> Self {
        Self {
            store,
            key: Arc::new(key),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store `secret` behind `passphrase` and return its retrieval token.
    pub fn create(&self, passphrase: &str, secret: &str) -> Result<Created, VaultError> {
        check_passphrase(passphrase)?;
        if secret.is_empty() {
            return Err(VaultError::validation("secret must not be empty"));
        }
        if secret.len() > self.config.max_secret_bytes {
            return Err(VaultError::validation(format!(
                "secret exceeds {} bytes",
                self.config.max_secret_bytes
            )));
        }

        let salt = crypto::generate_salt(self.config.salt_len);
        let passphrase_hash = crypto::hash_passphrase(passphrase.as_bytes(), &salt, &self.config.hash)
            .context("hash passphrase")?;
        let ciphertext = crypto::encrypt(&self.key, secret.as_bytes()).context("encrypt secret")?;

        let created_at = db::now();
        let ttl = i64::try_from(self.config.ttl.as_secs()).unwrap_or(i64::MAX);
        let record = SecretRecord {
            ciphertext,
            passphrase_hash,
            salt,
            kdf: self.config.hash,
            created_at,
            expire_at: created_at.saturating_add(ttl),
        };

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = token::new_token();
            match self.store.insert(&token, &record)? {
                InsertResult::Inserted => {
                    info!(
                        token = %token::hint(&token),
                        expires_at = record.expire_at,
                        "secret created"
                    );
                    return Ok(Created {
                        token,
                        expires_at: record.expire_at,
                    });
                }
                InsertResult::DuplicateToken => {
                    warn!(attempt, "token collision, regenerating");
                }
            }
        }

        error!(
            attempts = MAX_TOKEN_ATTEMPTS,
            "anomaly: every generated token collided with a live record"
        );
        Err(VaultError::DuplicateToken)
    }

    /// Exchange `token` and `passphrase` for the secret, exactly once.
    ///
    /// The record is gone once this returns, whatever the outcome. A wrong
    /// passphrase yields `PassphraseMismatch` and burns the token.
    pub fn consume(&self, token: &str, passphrase: &str) -> Result<Zeroizing<String>, VaultError> {
        check_passphrase(passphrase)?;
        if !token::is_well_formed(token) {
            debug!("rejected malformed token");
            return Err(VaultError::SecretNotFound);
        }

        let record = match self.store.take(token)? {
            TakeResult::Taken(record) => record,
            TakeResult::NotFound => {
                debug!(token = %token::hint(token), "secret not found");
                return Err(VaultError::SecretNotFound);
            }
            TakeResult::Corrupt => {
                error!(token = %token::hint(token), "integrity failure: stored record is corrupt");
                return Err(VaultError::Integrity);
            }
        };

        let candidate = crypto::hash_passphrase(passphrase.as_bytes(), &record.salt, &record.kdf)
            .context("hash passphrase candidate")?;
        if !crypto::verify_passphrase(&candidate, &record.passphrase_hash) {
            info!(token = %token::hint(token), "passphrase mismatch, secret burned");
            return Err(VaultError::PassphraseMismatch);
        }

        let plaintext = crypto::decrypt(&self.key, &record.ciphertext).map_err(|e| {
            error!(token = %token::hint(token), error = %e, "integrity failure: decrypt failed");
            VaultError::Integrity
        })?;
        let secret = std::str::from_utf8(&plaintext).map_err(|_| {
            error!(token = %token::hint(token), "integrity failure: plaintext is not UTF-8");
            VaultError::Integrity
        })?;

        info!(token = %token::hint(token), "secret consumed");
        Ok(Zeroizing::new(secret.to_owned()))
    }
}

fn check_passphrase(passphrase: &str) -> Result<(), VaultError> {
    if passphrase.is_empty() {
        return Err(VaultError::validation("passphrase must not be empty"));
    }
    if passphrase.len() > MAX_PASSPHRASE_BYTES {
        return Err(VaultError::validation(format!(
            "passphrase exceeds {MAX_PASSPHRASE_BYTES} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Barrier,
    };
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::store::crypto::{HashAlgorithm, HashParams};
    use tempfile::tempdir;

    fn test_config() -> VaultConfig {
        VaultConfig {
            hash: HashParams {
                algorithm: HashAlgorithm::Pbkdf2Sha256,
                iterations: 1_000,
                memory_kib: 64,
                hash_len: 32,
            },
            salt_len: 32,
            ttl: Duration::from_secs(3600),
            max_secret_bytes: 1024,
        }
    }

    fn make_vault(config: VaultConfig) -> (Vault, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("vault.db")).unwrap();
        (Vault::new(store, crypto::generate_key(), config), dir)
    }

    #[test]
    fn create_then_consume_round_trip() {
        let (v, _dir) = make_vault(test_config());
        let created = v.create("p1", "s1").unwrap();
        assert_eq!(created.token.len(), token::TOKEN_LEN);
        assert_eq!(v.consume(&created.token, "p1").unwrap().as_str(), "s1");
        assert!(matches!(
            v.consume(&created.token, "p1"),
            Err(VaultError::SecretNotFound)
        ));
    }

    #[test]
    fn wrong_passphrase_burns_token() {
        let (v, _dir) = make_vault(test_config());
        let created = v.create("open-sesame", "the vault code is 42").unwrap();
        assert!(created.token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(matches!(
            v.consume(&created.token, "wrong"),
            Err(VaultError::PassphraseMismatch)
        ));
        assert!(matches!(
            v.consume(&created.token, "open-sesame"),
            Err(VaultError::SecretNotFound)
        ));
        assert!(v.store().is_empty().unwrap());
    }

    #[test]
    fn unknown_and_malformed_tokens_are_not_found() {
        let (v, _dir) = make_vault(test_config());
        assert!(matches!(
            v.consume(&token::new_token(), "pw"),
            Err(VaultError::SecretNotFound)
        ));
        assert!(matches!(
            v.consume("../../etc/passwd", "pw"),
            Err(VaultError::SecretNotFound)
        ));
    }

    #[test]
    fn expired_secret_is_not_found() {
        // TTL = 0 means already expired.
        let (v, _dir) = make_vault(VaultConfig {
            ttl: Duration::ZERO,
            ..test_config()
        });
        let created = v.create("pw", "short-lived").unwrap();
        assert!(matches!(
            v.consume(&created.token, "pw"),
            Err(VaultError::SecretNotFound)
        ));
    }

    #[test]
    fn empty_inputs_are_rejected_before_storage() {
        let (v, _dir) = make_vault(test_config());
        assert!(matches!(v.create("", "s"), Err(VaultError::Validation(_))));
        assert!(matches!(v.create("p", ""), Err(VaultError::Validation(_))));
        assert!(v.store().is_empty().unwrap());

        let created = v.create("p", "s").unwrap();
        // An empty candidate is not a guess: the token survives it.
        assert!(matches!(
            v.consume(&created.token, ""),
            Err(VaultError::Validation(_))
        ));
        assert_eq!(v.consume(&created.token, "p").unwrap().as_str(), "s");
    }

    #[test]
    fn oversized_inputs_are_rejected() {
        let (v, _dir) = make_vault(test_config());
        let big_secret = "x".repeat(1025);
        assert!(matches!(
            v.create("p", &big_secret),
            Err(VaultError::Validation(_))
        ));
        let big_passphrase = "p".repeat(MAX_PASSPHRASE_BYTES + 1);
        assert!(matches!(
            v.create(&big_passphrase, "s"),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn salt_and_hash_are_fresh_per_create() {
        let (v, _dir) = make_vault(test_config());
        let a = v.create("same", "one").unwrap();
        let b = v.create("same", "two").unwrap();
        assert_ne!(a.token, b.token);

        let ra = match v.store().take(&a.token).unwrap() {
            TakeResult::Taken(r) => r,
            other => panic!("expected record, got {other:?}"),
        };
        let rb = match v.store().take(&b.token).unwrap() {
            TakeResult::Taken(r) => r,
            other => panic!("expected record, got {other:?}"),
        };
        assert_ne!(ra.salt, rb.salt);
        assert_ne!(ra.passphrase_hash, rb.passphrase_hash);
        assert_ne!(ra.ciphertext, rb.ciphertext);
    }

    #[test]
    fn record_holds_no_plaintext() {
        let (v, _dir) = make_vault(test_config());
        let created = v.create("hunter2-passphrase", "plaintext-marker").unwrap();
        let record = match v.store().take(&created.token).unwrap() {
            TakeResult::Taken(r) => r,
            other => panic!("expected record, got {other:?}"),
        };
        let bytes = crate::store::model::encode(&record).unwrap();
        let contains = |needle: &[u8]| bytes.windows(needle.len()).any(|w| w == needle);
        assert!(!contains(b"plaintext-marker"));
        assert!(!contains(b"hunter2-passphrase"));
    }

    #[test]
    fn kdf_params_travel_with_the_record() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("vault.db")).unwrap();
        let key = crypto::generate_key();
        let key_copy = crypto::load_key(key.as_bytes()).unwrap();

        let old = Vault::new(store.clone(), key, test_config());
        let created = old.create("pw", "survives reconfiguration").unwrap();

        let new = Vault::new(
            store,
            key_copy,
            VaultConfig {
                hash: HashParams {
                    algorithm: HashAlgorithm::Pbkdf2Sha512,
                    iterations: 2_000,
                    memory_kib: 64,
                    hash_len: 64,
                },
                ..test_config()
            },
        );
        assert_eq!(
            new.consume(&created.token, "pw").unwrap().as_str(),
            "survives reconfiguration"
        );
    }

    #[test]
    fn argon2id_round_trip() {
        let (v, _dir) = make_vault(VaultConfig {
            hash: HashParams {
                algorithm: HashAlgorithm::Argon2id,
                iterations: 2,
                memory_kib: 64,
                hash_len: 32,
            },
            ..test_config()
        });
        let created = v.create("pw", "argon").unwrap();
        assert_eq!(v.consume(&created.token, "pw").unwrap().as_str(), "argon");
    }

    #[test]
    fn wrong_master_key_is_an_integrity_error() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("vault.db")).unwrap();
        let writer = Vault::new(store.clone(), crypto::generate_key(), test_config());
        let reader = Vault::new(store, crypto::generate_key(), test_config());

        let created = writer.create("pw", "secret").unwrap();
        assert!(matches!(
            reader.consume(&created.token, "pw"),
            Err(VaultError::Integrity)
        ));
        assert!(matches!(
            writer.consume(&created.token, "pw"),
            Err(VaultError::SecretNotFound)
        ));
    }

    #[test]
    fn corrupt_record_is_an_integrity_error() {
        let (v, _dir) = make_vault(test_config());
        let token = token::new_token();
        v.store().put_raw(&token, b"\x01not a record").unwrap();
        assert!(matches!(
            v.consume(&token, "pw"),
            Err(VaultError::Integrity)
        ));
    }

    #[test]
    fn concurrent_consume_has_one_winner() {
        let (v, _dir) = make_vault(test_config());
        let created = v.create("pw", "only once").unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let v = v.clone();
                let token = created.token.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    v.consume(&token, "pw").map(|s| s.as_str().to_owned())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners, vec!["only once"]);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(VaultError::SecretNotFound)))
                .count(),
            threads - 1
        );
    }

    #[test]
    fn concurrent_wrong_guesses_burn_once() {
        let (v, _dir) = make_vault(test_config());
        let created = v.create("pw", "guarded").unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let v = v.clone();
                let token = created.token.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    v.consume(&token, "not-pw").map(|s| s.as_str().to_owned())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(VaultError::PassphraseMismatch)))
                .count(),
            1
        );
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(VaultError::SecretNotFound)))
                .count(),
            threads - 1
        );
        assert!(v.store().is_empty().unwrap());
    }

    #[test]
    fn multibyte_secret_round_trip() {
        let (v, _dir) = make_vault(test_config());
        let secret = "пароль: 秘密 🔑 ñ";
        let created = v.create("clé-secrète", secret).unwrap();
        assert_eq!(
            v.consume(&created.token, "clé-secrète").unwrap().as_str(),
            secret
        );
    }

    /// Store whose every insert collides.
    #[derive(Clone, Default)]
    struct CollidingStore {
        inserts: Arc<AtomicUsize>,
    }

    impl SecretStore for CollidingStore {
        fn insert(&self, _token: &str, _record: &SecretRecord) -> anyhow::Result<InsertResult> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Ok(InsertResult::DuplicateToken)
        }

        fn take(&self, _token: &str) -> anyhow::Result<TakeResult> {
            Ok(TakeResult::NotFound)
        }

        fn prune(&self) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn token_collisions_retry_then_fail() {
        let store = CollidingStore::default();
        let v = Vault::new(store.clone(), crypto::generate_key(), test_config());
        assert!(matches!(
            v.create("pw", "secret"),
            Err(VaultError::DuplicateToken)
        ));
        assert_eq!(store.inserts.load(Ordering::SeqCst), MAX_TOKEN_ATTEMPTS);
    }
}

pub mod crypto;
pub mod db;
pub mod model;
pub mod token;

pub use crypto::{EncryptionKey, HashAlgorithm, HashParams};
pub use db::{InsertResult, SecretStore, Store, TakeResult};
pub use model::SecretRecord;

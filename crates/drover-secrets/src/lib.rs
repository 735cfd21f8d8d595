//! Encrypted credential storage for the provider layer.
//!
//! Two layers: `secretbox` seals byte strings under a 256-bit master key
//! resolved by `master_key` (OS keyring, then a machine-bound sealed
//! container, then a 0600 key file). On top of those, `store` keeps OAuth
//! tokens as one sealed file per provider and static API keys inside a
//! single sealed container (the tomb).

pub mod audit;
pub mod cli_cache;
pub mod error;
pub mod master_key;
pub mod secretbox;
pub mod store;

pub use error::CredentialError;
pub use master_key::{KeySource, MasterKey};
pub use store::{CredentialStore, OAuthToken};

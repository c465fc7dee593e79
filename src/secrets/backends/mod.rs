//! Remote [`SecretStore`](super::SecretStore) implementations.
//!
//! - **GCP Secret Manager**: REST client over `reqwest`
//!
//! The in-process store used for tests and local development lives in
//! [`super::memory`].

pub mod gcp;

pub use gcp::{GcpSecretStore, SECRET_MANAGER_ENDPOINT};

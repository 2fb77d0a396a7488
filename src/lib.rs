//! Wallet Service - HSM-backed key custody
//!
//! This service drives a PKCS#11 module to mint elliptic-curve keypairs,
//! persists only the non-secret identifiers (the public point and the
//! module-resident key labels), and signs caller-supplied digests by
//! re-locating the key material inside the module.
//!
//! Key features:
//! - EC key generation on the configured curve
//! - Label-based key lookup, one session per request
//! - Every signature is self-verified against the public key object
//!   before it is released

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod pkcs11;
pub mod repository;
pub mod server;
pub mod session;
pub mod wallet;

pub use config::ModuleConfig;
pub use error::WalletError;
pub use pkcs11::{ModuleGateway, ModuleSession, Pkcs11Gateway};
pub use repository::{KeyRecord, KeyRecordStore};
pub use wallet::Wallet;

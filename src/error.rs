//! Wallet Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Module error: {0}")]
    Module(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Signature failed self-verification")]
    SignatureIntegrity,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
}

impl From<cryptoki::error::Error> for WalletError {
    fn from(e: cryptoki::error::Error) -> Self {
        WalletError::Module(e.to_string())
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(e: sqlx::Error) -> Self {
        WalletError::Storage(e.to_string())
    }
}

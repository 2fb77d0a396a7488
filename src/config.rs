//! Module configuration
//!
//! Everything the session lifecycle needs to reach the PKCS#11 module:
//! library location, slot index, optional authentication PIN, and the
//! DER parameter encoding of the curve to generate keys on.

use crate::error::WalletError;

/// Default SoftHSM2 library location on linux.
pub const DEFAULT_LIBRARY: &str = "/usr/lib/softhsm/libsofthsm2.so";

/// secp256k1 curve parameters (DER-encoded OID 1.3.132.0.10).
/// SoftHSM2 deployments on secp256r1 use `06082a8648ce3d030107` instead.
pub const DEFAULT_EC_PARAMS_HEX: &str = "06052b8104000a";

#[derive(Debug, Clone)]
pub struct ModuleConfig {
    /// Path to the PKCS#11 library.
    pub library: String,
    /// Index into the module's slot list.
    pub slot: usize,
    /// User PIN; no login is attempted when absent.
    pub pin: Option<String>,
    /// DER parameter encoding of the curve for new keypairs.
    pub ec_params: Vec<u8>,
}

impl ModuleConfig {
    /// Read the module configuration from the environment, falling back
    /// to SoftHSM2 defaults.
    pub fn from_env() -> Result<Self, WalletError> {
        let library = std::env::var("HSM_LIBRARY").unwrap_or_else(|_| DEFAULT_LIBRARY.to_string());

        let slot = std::env::var("HSM_SLOT")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<usize>()
            .map_err(|e| {
                WalletError::Configuration(format!("HSM_SLOT must be a valid number: {}", e))
            })?;

        let pin = std::env::var("HSM_PIN").ok().filter(|pin| !pin.is_empty());

        let ec_params_hex =
            std::env::var("HSM_EC_PARAMS").unwrap_or_else(|_| DEFAULT_EC_PARAMS_HEX.to_string());
        let ec_params = hex::decode(&ec_params_hex).map_err(|e| {
            WalletError::Configuration(format!("HSM_EC_PARAMS must be valid hex: {}", e))
        })?;

        Ok(Self {
            library,
            slot,
            pin,
            ec_params,
        })
    }
}

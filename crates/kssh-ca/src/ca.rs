//! CA key lifecycle.
//!
//! The CA signs with a single Ed25519 key stored as an OpenSSH private key
//! at `ca_key_location`. Destination hosts trust it through
//! `TrustedUserCAKeys` pointing at the `.pub` sibling.

use kssh_crypto::keys::{self, CaKeyPair};

use crate::config::CaConfig;
use crate::error::CaError;

/// Whether a CA key exists at the configured location.
pub fn is_initialized(config: &CaConfig) -> bool {
    config.ca_key_location.exists()
}

/// Generate and store a new CA key.
///
/// Fails when a key already exists unless `overwrite` is set. Replacing
/// the key invalidates every certificate issued so far once hosts pick up
/// the new public key.
pub fn generate(config: &CaConfig, overwrite: bool) -> Result<CaKeyPair, CaError> {
    let key = keys::generate_ca_keypair()?;
    keys::save_ca_key(&config.ca_key_location, &key, overwrite)?;
    tracing::info!(
        path = %config.ca_key_location.display(),
        fingerprint = %key.fingerprint(),
        overwrite,
        "CA key generated"
    );
    Ok(key)
}

pub fn load(config: &CaConfig) -> Result<CaKeyPair, CaError> {
    let key = keys::load_ca_key(&config.ca_key_location)?;
    tracing::debug!(fingerprint = %key.fingerprint(), "CA key loaded");
    Ok(key)
}

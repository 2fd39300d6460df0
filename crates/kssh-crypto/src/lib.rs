//! Kssh Crypto: SSH key material for the CA and the client.
//!
//! Ed25519 key generation and OpenSSH encoding, CA key storage,
//! user-certificate issuance and inspection, and constant-time
//! fingerprint pinning.

pub mod certificate;
pub mod keys;
pub mod pinning;

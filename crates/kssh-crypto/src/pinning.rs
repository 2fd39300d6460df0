//! CA fingerprint pinning.
//!
//! Clients record the CA key from the team config and require every
//! certificate they receive to be signed by exactly that key.

use subtle::ConstantTimeEq;

/// Compare two fingerprint strings in constant time.
///
/// Returns `true` if both fingerprints are equal. Uses `subtle::ConstantTimeEq`
/// to prevent timing side-channels.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    if a_bytes.len() != b_bytes.len() {
        return false;
    }

    a_bytes.ct_eq(b_bytes).into()
}

//! OpenSSH user certificates.
//!
//! The CA issues user certificates carrying the principal set its policy
//! grants. Clients inspect them for expiry and verify they were signed by
//! the pinned CA key before trusting them.

use std::collections::BTreeSet;

use rand::rngs::OsRng;
use rand::RngCore;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::{Certificate, HashAlg, PublicKey};

use crate::keys::{CaKeyPair, CryptoError};
use crate::pinning;

/// Seconds a new certificate is backdated to absorb clock skew between
/// the CA and the destination host.
const VALID_AFTER_SKEW_SECS: u64 = 60;

/// Extensions granted to every user certificate.
const DEFAULT_EXTENSIONS: &[&str] = &[
    "permit-X11-forwarding",
    "permit-agent-forwarding",
    "permit-port-forwarding",
    "permit-pty",
    "permit-user-rc",
];

/// Parameters for one issuance.
#[derive(Debug, Clone)]
pub struct CertificateSpec<'a> {
    pub subject: &'a PublicKey,
    pub key_id: &'a str,
    pub principals: &'a BTreeSet<String>,
    /// Issue time, seconds since the Unix epoch.
    pub issued_at: u64,
    pub validity_secs: u64,
}

/// Sign a user certificate for `spec.subject` with the CA key.
pub fn issue_user_certificate(
    ca: &CaKeyPair,
    spec: &CertificateSpec<'_>,
) -> Result<Certificate, CryptoError> {
    if spec.principals.is_empty() {
        // An empty principal list means "any principal" to sshd.
        return Err(CryptoError::Certificate(
            "refusing to issue a certificate without principals".to_string(),
        ));
    }

    let valid_after = spec.issued_at.saturating_sub(VALID_AFTER_SKEW_SECS);
    let valid_before = spec.issued_at.saturating_add(spec.validity_secs);

    let mut builder =
        Builder::new_with_random_nonce(&mut OsRng, spec.subject, valid_after, valid_before)
            .map_err(cert_err)?;
    builder.serial(OsRng.next_u64()).map_err(cert_err)?;
    builder.key_id(spec.key_id).map_err(cert_err)?;
    builder.cert_type(CertType::User).map_err(cert_err)?;
    for principal in spec.principals {
        builder.valid_principal(principal.as_str()).map_err(cert_err)?;
    }
    for extension in DEFAULT_EXTENSIONS {
        builder.extension(*extension, "").map_err(cert_err)?;
    }
    builder.comment(spec.subject.comment()).map_err(cert_err)?;

    let cert = builder.sign(ca.private_key()).map_err(cert_err)?;

    tracing::debug!(
        key_id = %spec.key_id,
        serial = cert.serial(),
        valid_before,
        "User certificate signed"
    );
    Ok(cert)
}

pub fn parse_certificate(openssh: &str) -> Result<Certificate, CryptoError> {
    Certificate::from_openssh(openssh.trim()).map_err(cert_err)
}

pub fn encode_certificate(cert: &Certificate) -> Result<String, CryptoError> {
    cert.to_openssh().map_err(cert_err)
}

/// Whether the certificate is still valid at `now` (strictly before
/// `valid_before`).
pub fn is_unexpired(cert: &Certificate, now: u64) -> bool {
    now < cert.valid_before()
}

pub fn principals(cert: &Certificate) -> BTreeSet<String> {
    cert.valid_principals().iter().cloned().collect()
}

/// Check that `cert` certifies `subject` and was signed by `ca_public_key`.
///
/// The CA match uses a constant-time fingerprint comparison before the
/// signature itself is verified.
pub fn verify_issued_by(
    cert: &Certificate,
    ca_public_key: &PublicKey,
    subject: &PublicKey,
    now: u64,
) -> Result<(), CryptoError> {
    if cert.public_key() != subject.key_data() {
        return Err(CryptoError::Certificate(
            "certificate does not certify the requested key".to_string(),
        ));
    }

    if !signed_by(cert, ca_public_key) {
        return Err(CryptoError::Certificate(format!(
            "certificate signed by unexpected CA {}",
            cert.signature_key().fingerprint(HashAlg::Sha256)
        )));
    }

    let expected = ca_public_key.fingerprint(HashAlg::Sha256);
    cert.validate_at(now, [&expected]).map_err(cert_err)
}

/// Whether `cert` names `ca_public_key` as its signing key. Constant-time
/// fingerprint comparison; the signature itself is not checked.
pub fn signed_by(cert: &Certificate, ca_public_key: &PublicKey) -> bool {
    let expected = ca_public_key.fingerprint(HashAlg::Sha256);
    let actual = cert.signature_key().fingerprint(HashAlg::Sha256);
    pinning::fingerprints_match(&expected.to_string(), &actual.to_string())
}

fn cert_err(e: ssh_key::Error) -> CryptoError {
    CryptoError::Certificate(e.to_string())
}

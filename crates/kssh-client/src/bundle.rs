//! The cached credential: private key, public key, certificate.
//!
//! Three files in the ssh dir (see [`ClientPaths`]). The team the
//! certificate was obtained through is recorded as the key comment; reuse
//! is decided by the signing CA, since every team behind one CA yields the
//! same grant.

use kssh_crypto::{certificate, keys};
use ssh_key::{Certificate, PrivateKey, PublicKey};

use crate::error::{ClientError, Result};
use crate::paths::ClientPaths;

#[derive(Debug, Clone)]
pub struct Bundle {
    pub private_key: PrivateKey,
    pub certificate: Certificate,
}

impl Bundle {
    /// Team the certificate was obtained through.
    pub fn team(&self) -> &str {
        self.private_key.comment()
    }

    /// Expiry, seconds since the epoch.
    pub fn valid_before(&self) -> u64 {
        self.certificate.valid_before()
    }

    /// Reusable at `now` against the CA holding `ca_public_key`: unexpired
    /// (strictly) and signed by that CA.
    pub fn is_usable_with(&self, ca_public_key: &PublicKey, now: u64) -> bool {
        certificate::is_unexpired(&self.certificate, now)
            && certificate::signed_by(&self.certificate, ca_public_key)
    }
}

/// Load the bundle. `Ok(None)` when no bundle exists; unreadable or
/// inconsistent files are [`ClientError::CacheCorruption`].
pub fn load(paths: &ClientPaths) -> Result<Option<Bundle>> {
    let key_path = paths.private_key();
    let cert_path = paths.certificate();
    if !key_path.exists() || !cert_path.exists() {
        return Ok(None);
    }

    let private_key = keys::read_private_key(&key_path)
        .map_err(|e| ClientError::CacheCorruption(format!("{}: {e}", key_path.display())))?;
    let raw = std::fs::read_to_string(&cert_path)?;
    let certificate = certificate::parse_certificate(&raw)
        .map_err(|e| ClientError::CacheCorruption(format!("{}: {e}", cert_path.display())))?;

    if certificate.public_key() != private_key.public_key().key_data() {
        return Err(ClientError::CacheCorruption(
            "certificate does not certify the cached key".to_string(),
        ));
    }

    Ok(Some(Bundle {
        private_key,
        certificate,
    }))
}

/// Write all three files, replacing any previous bundle. Each file is
/// written to a temp sibling and renamed into place.
pub fn write(paths: &ClientPaths, bundle: &Bundle) -> Result<()> {
    std::fs::create_dir_all(paths.dir())?;

    let key_path = paths.private_key();
    let mut tmp_name = key_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let key_tmp = key_path.with_file_name(tmp_name);
    match std::fs::remove_file(&key_tmp) {
        Ok(()) => tracing::debug!(path = %key_tmp.display(), "Removed leftover temp key"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    keys::write_private_key(&key_tmp, &bundle.private_key)?;
    std::fs::rename(&key_tmp, &key_path)?;

    let public = keys::encode_public_key(bundle.private_key.public_key())?;
    kssh_common::persist::write_atomic(&paths.public_key(), format!("{public}\n").as_bytes())?;

    let cert = certificate::encode_certificate(&bundle.certificate)?;
    kssh_common::persist::write_atomic(&paths.certificate(), format!("{cert}\n").as_bytes())?;

    tracing::info!(
        path = %paths.dir().display(),
        team = %bundle.team(),
        valid_before = bundle.valid_before(),
        "Signed key bundle written"
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kssh_crypto::certificate::CertificateSpec;
    use kssh_crypto::keys::CaKeyPair;
    use std::collections::BTreeSet;

    pub(crate) fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    /// A bundle for `team` signed by `ca`, issued at `issued_at` for
    /// `validity_secs`.
    pub(crate) fn sample_bundle(
        ca: &CaKeyPair,
        team: &str,
        issued_at: u64,
        validity_secs: u64,
    ) -> Bundle {
        let private_key = keys::generate_keypair(team).unwrap();
        let principals = BTreeSet::from(["staging".to_string()]);
        let certificate = certificate::issue_user_certificate(
            ca,
            &CertificateSpec {
                subject: private_key.public_key(),
                key_id: "alice:test",
                principals: &principals,
                issued_at,
                validity_secs,
            },
        )
        .unwrap();
        Bundle {
            private_key,
            certificate,
        }
    }

    #[test]
    fn missing_bundle_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&ClientPaths::new(dir.path())).unwrap().is_none());
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ClientPaths::new(dir.path().join("ssh"));
        let ca = keys::generate_ca_keypair().unwrap();
        let other_ca = keys::generate_ca_keypair().unwrap();
        let bundle = sample_bundle(&ca, "acme.ssh.staging", now(), 3600);

        write(&paths, &bundle).unwrap();
        assert!(paths.public_key().exists());

        let loaded = load(&paths).unwrap().unwrap();
        assert_eq!(loaded.team(), "acme.ssh.staging");
        assert_eq!(loaded.valid_before(), bundle.valid_before());
        assert!(loaded.is_usable_with(ca.public_key(), now()));
        assert!(!loaded.is_usable_with(other_ca.public_key(), now()));
    }

    #[cfg(unix)]
    #[test]
    fn private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());
        let ca = keys::generate_ca_keypair().unwrap();
        write(&paths, &sample_bundle(&ca, "acme.ssh.staging", now(), 3600)).unwrap();
        let mode = std::fs::metadata(paths.private_key()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn leftover_temp_key_does_not_loosen_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());
        let tmp = dir.path().join("kssh-signed-key.tmp");
        std::fs::write(&tmp, "stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        let ca = keys::generate_ca_keypair().unwrap();
        write(&paths, &sample_bundle(&ca, "acme.ssh.staging", now(), 3600)).unwrap();
        let mode = std::fs::metadata(paths.private_key()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!tmp.exists());
    }

    #[test]
    fn expiry_is_exact() {
        let ca = keys::generate_ca_keypair().unwrap();
        let issued = now() - 7200;
        let bundle = sample_bundle(&ca, "acme.ssh.staging", issued, 3600);
        let expiry = bundle.valid_before();
        assert!(bundle.is_usable_with(ca.public_key(), expiry - 1));
        assert!(!bundle.is_usable_with(ca.public_key(), expiry));
        assert!(!bundle.is_usable_with(ca.public_key(), now()));
    }

    #[test]
    fn garbage_certificate_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());
        let ca = keys::generate_ca_keypair().unwrap();
        write(&paths, &sample_bundle(&ca, "acme.ssh.staging", now(), 3600)).unwrap();
        std::fs::write(paths.certificate(), "not a certificate").unwrap();
        assert!(matches!(load(&paths), Err(ClientError::CacheCorruption(_))));
    }

    #[test]
    fn mismatched_key_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());
        let ca = keys::generate_ca_keypair().unwrap();
        write(&paths, &sample_bundle(&ca, "acme.ssh.staging", now(), 3600)).unwrap();
        let other = sample_bundle(&ca, "acme.ssh.staging", now(), 3600);
        let cert = certificate::encode_certificate(&other.certificate).unwrap();
        std::fs::write(paths.certificate(), cert).unwrap();
        assert!(matches!(load(&paths), Err(ClientError::CacheCorruption(_))));
    }
}

//! Ed25519 key generation and OpenSSH storage.
//!
//! The CA key lives in a single OpenSSH private key file (0600) with a
//! `.pub` sibling. Client keys are generated fresh for every signing round
//! trip and never reused across certificates.

use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use ssh_key::{Algorithm, HashAlg, LineEnding, PrivateKey, PublicKey};
use zeroize::Zeroizing;

/// Comment stamped on generated CA keys.
const CA_KEY_COMMENT: &str = "keybaseca";

/// Ed25519 CA signing key.
pub struct CaKeyPair {
    key: PrivateKey,
}

impl CaKeyPair {
    /// Access the inner private key for certificate signing.
    pub fn private_key(&self) -> &PrivateKey {
        &self.key
    }

    pub fn public_key(&self) -> &PublicKey {
        self.key.public_key()
    }

    /// Export the public key in OpenSSH `authorized_keys` format.
    pub fn public_key_openssh(&self) -> Result<String, CryptoError> {
        encode_public_key(self.key.public_key())
    }

    /// Export the private key in OpenSSH format.
    pub fn private_key_openssh(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.key
            .to_openssh(LineEnding::LF)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
    }

    /// `SHA256:...` fingerprint of the CA public key.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.key.public_key())
    }
}

impl std::fmt::Debug for CaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Generate a fresh Ed25519 keypair with the given comment.
pub fn generate_keypair(comment: &str) -> Result<PrivateKey, CryptoError> {
    let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    key.set_comment(comment);
    Ok(key)
}

/// Generate a new CA keypair.
pub fn generate_ca_keypair() -> Result<CaKeyPair, CryptoError> {
    Ok(CaKeyPair {
        key: generate_keypair(CA_KEY_COMMENT)?,
    })
}

/// Path of the `.pub` sibling for a private key path.
pub fn public_key_path(private_path: &Path) -> PathBuf {
    let mut name = private_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".pub");
    private_path.with_file_name(name)
}

/// Write the CA key (0600) and its public half.
///
/// Refuses to replace an existing key unless `overwrite` is set.
pub fn save_ca_key(path: &Path, key: &CaKeyPair, overwrite: bool) -> Result<(), CryptoError> {
    if path.exists() && !overwrite {
        return Err(CryptoError::KeyExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    write_private_key(path, key.private_key())?;
    std::fs::write(public_key_path(path), key.public_key_openssh()? + "\n")?;

    tracing::debug!(path = %path.display(), "CA key saved");
    Ok(())
}

/// Load the CA key from an OpenSSH private key file.
pub fn load_ca_key(path: &Path) -> Result<CaKeyPair, CryptoError> {
    if !path.exists() {
        return Err(CryptoError::KeyNotFound(path.to_path_buf()));
    }
    let key = read_private_key(path)?;
    if key.is_encrypted() {
        return Err(CryptoError::KeyEncoding(
            "encrypted CA keys are not supported".to_string(),
        ));
    }
    Ok(CaKeyPair { key })
}

/// Write an OpenSSH private key, owner-only on Unix.
pub fn write_private_key(path: &Path, key: &PrivateKey) -> Result<(), CryptoError> {
    let pem = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;

    // `mode` only applies on creation; reset a pre-existing file before
    // writing key bytes into it.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        file.write_all(pem.as_bytes())?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, pem.as_bytes())?;
    }
    Ok(())
}

pub fn read_private_key(path: &Path) -> Result<PrivateKey, CryptoError> {
    let pem = Zeroizing::new(std::fs::read_to_string(path)?);
    PrivateKey::from_openssh(pem.as_bytes()).map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

pub fn encode_public_key(key: &PublicKey) -> Result<String, CryptoError> {
    key.to_openssh()
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

pub fn parse_public_key(openssh: &str) -> Result<PublicKey, CryptoError> {
    PublicKey::from_openssh(openssh.trim()).map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

/// `SHA256:...` fingerprint of a public key.
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key generation: {0}")]
    KeyGeneration(String),
    #[error("key encoding: {0}")]
    KeyEncoding(String),
    #[error("no key at {}", .0.display())]
    KeyNotFound(PathBuf),
    #[error("a key already exists at {} (use --overwrite-existing-key)", .0.display())]
    KeyExists(PathBuf),
    #[error("certificate: {0}")]
    Certificate(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

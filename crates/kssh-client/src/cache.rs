//! Certificate cache: reuse the local bundle while it is valid, otherwise
//! obtain a fresh one from the team's CA.

use std::time::Duration;

use kssh_common::types::TeamConfig;
use kssh_crypto::{certificate, keys};
use ssh_key::PublicKey;

use crate::bundle::{self, Bundle};
use crate::error::{ClientError, Result};
use crate::lock::{BundleLock, DEFAULT_LOCK_TIMEOUT};
use crate::paths::ClientPaths;
use crate::requester::CaRequester;

/// Validity requested for every new certificate.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The existing bundle was still valid; no channel traffic.
    Reused,
    /// A new key was generated and signed.
    Refreshed,
}

/// A usable credential on disk.
#[derive(Debug, Clone)]
pub struct CachedCredential {
    pub paths: ClientPaths,
    pub team: String,
    pub valid_before: u64,
    pub outcome: CacheOutcome,
}

pub struct CertificateCache {
    paths: ClientPaths,
    requester: CaRequester,
    validity: Duration,
    lock_timeout: Duration,
}

impl CertificateCache {
    pub fn new(paths: ClientPaths, requester: CaRequester) -> Self {
        Self {
            paths,
            requester,
            validity: DEFAULT_VALIDITY,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn paths(&self) -> &ClientPaths {
        &self.paths
    }

    /// Return a usable credential for `config`, refreshing when the cached
    /// one is missing, corrupt, expired, or signed by a different CA.
    ///
    /// A bundle obtained through another team of the same CA is reused: the
    /// CA grants the union over all of the requester's teams, so it would
    /// sign the same principals again.
    ///
    /// The bundle lock is held throughout, so a concurrent invocation waits
    /// and then reuses what this one wrote. On any refresh failure the
    /// previous bundle is left as it was.
    pub async fn ensure(&self, config: &TeamConfig) -> Result<CachedCredential> {
        let ca_key = pinned_ca_key(config)?;
        let _lock = BundleLock::acquire(self.paths.lock(), self.lock_timeout).await?;

        match bundle::load(&self.paths) {
            Ok(Some(existing)) if existing.is_usable_with(&ca_key, unix_now()) => {
                tracing::debug!(
                    team = %config.team,
                    valid_before = existing.valid_before(),
                    "Reusing cached certificate"
                );
                return Ok(self.credential(&existing, CacheOutcome::Reused));
            }
            Ok(Some(existing)) => {
                tracing::debug!(
                    cached_team = %existing.team(),
                    team = %config.team,
                    valid_before = existing.valid_before(),
                    "Cached certificate expired or from another CA"
                );
            }
            Ok(None) => tracing::debug!("No cached certificate"),
            Err(ClientError::CacheCorruption(reason)) => {
                tracing::warn!(reason = %reason, "Ignoring corrupt key bundle");
            }
            Err(e) => return Err(e),
        }

        let fresh = self.obtain(config, &ca_key).await?;
        bundle::write(&self.paths, &fresh)?;
        Ok(self.credential(&fresh, CacheOutcome::Refreshed))
    }

    /// Generate a key, have it signed, and check the certificate came from
    /// the pinned CA for this key.
    async fn obtain(&self, config: &TeamConfig, ca_key: &PublicKey) -> Result<Bundle> {
        let private_key = keys::generate_keypair(&config.team)?;
        let public_key = keys::encode_public_key(private_key.public_key())?;

        let issued = self
            .requester
            .request_signature(
                config,
                public_key,
                config.environment_principals(),
                self.validity.as_secs(),
            )
            .await?;

        let cert = certificate::parse_certificate(&issued)
            .map_err(|e| ClientError::UntrustedCertificate(e.to_string()))?;
        certificate::verify_issued_by(&cert, ca_key, private_key.public_key(), unix_now())
            .map_err(|e| ClientError::UntrustedCertificate(e.to_string()))?;

        tracing::info!(
            team = %config.team,
            principals = ?certificate::principals(&cert),
            valid_before = cert.valid_before(),
            "Obtained new certificate"
        );
        Ok(Bundle {
            private_key,
            certificate: cert,
        })
    }

    fn credential(&self, bundle: &Bundle, outcome: CacheOutcome) -> CachedCredential {
        CachedCredential {
            paths: self.paths.clone(),
            team: bundle.team().to_string(),
            valid_before: bundle.valid_before(),
            outcome,
        }
    }
}

fn pinned_ca_key(config: &TeamConfig) -> Result<PublicKey> {
    keys::parse_public_key(&config.ca_public_key).map_err(|e| ClientError::BadTeamConfig {
        team: config.team.clone(),
        reason: format!("unparseable CA public key: {e}"),
    })
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

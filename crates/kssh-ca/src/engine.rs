//! Signing engine: authorize, sign, audit.

use std::collections::BTreeSet;
use std::sync::Arc;

use kssh_channel::Channel;
use kssh_common::error::ErrorCode;
use kssh_common::protocol::{SignatureOutcome, SignatureRequest, SignatureResponse};
use kssh_crypto::certificate::{self, CertificateSpec};
use kssh_crypto::keys::{self, CaKeyPair};
use ssh_key::Certificate;

use crate::audit::{AuditLedger, AuditLogEntry};
use crate::config::format_expiration;
use crate::error::CaError;
use crate::policy::AuthorizationPolicy;

/// A certificate minted for one request.
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    pub certificate: Certificate,
    /// OpenSSH `-cert.pub` encoding.
    pub openssh: String,
    pub principals: BTreeSet<String>,
    /// Seconds since the epoch.
    pub valid_before: u64,
    pub algorithm: String,
}

pub struct SigningEngine {
    ca_key: CaKeyPair,
    policy: AuthorizationPolicy,
    max_validity_secs: u64,
    ledger: Arc<AuditLedger>,
    channel: Arc<dyn Channel>,
}

impl SigningEngine {
    pub fn new(
        ca_key: CaKeyPair,
        policy: AuthorizationPolicy,
        max_validity_secs: u64,
        ledger: Arc<AuditLedger>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            ca_key,
            policy,
            max_validity_secs,
            ledger,
            channel,
        }
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn ca_public_key_openssh(&self) -> Result<String, CaError> {
        Ok(self.ca_key.public_key_openssh()?)
    }

    /// Sign `request`, attributed by the channel to `sender`.
    ///
    /// Denials return before anything is written to the ledger. A signed
    /// certificate is only returned once its audit entry is written.
    pub async fn sign(
        &self,
        sender: &str,
        request: &SignatureRequest,
    ) -> Result<SignedCertificate, CaError> {
        if request.requester != sender {
            return Err(CaError::IdentityMismatch {
                declared: request.requester.clone(),
                sender: sender.to_string(),
            });
        }
        if !self.policy.serves(&request.team) {
            return Err(CaError::UnknownTeam(request.team.clone()));
        }
        if request.validity_secs == 0 {
            return Err(CaError::InvalidRequest("validity must be positive".to_string()));
        }
        let subject = keys::parse_public_key(&request.public_key)
            .map_err(|e| CaError::InvalidRequest(format!("bad public key: {e}")))?;

        let principals = self
            .policy
            .resolve_grant(self.channel.as_ref(), sender)
            .await?;
        if principals.is_empty() {
            return Err(CaError::Unauthorized {
                requester: sender.to_string(),
                team: request.team.clone(),
            });
        }

        let validity_secs = request.validity_secs.min(self.max_validity_secs);
        let key_id = format!("{sender}:{}", request.correlation_id);
        let cert = certificate::issue_user_certificate(
            &self.ca_key,
            &CertificateSpec {
                subject: &subject,
                key_id: &key_id,
                principals: &principals,
                issued_at: unix_now(),
                validity_secs,
            },
        )?;
        let openssh = certificate::encode_certificate(&cert)?;
        let algorithm = subject.algorithm().as_str().to_string();

        let entry = AuditLogEntry::now(
            sender,
            &principals,
            format_expiration(validity_secs),
            format!("{algorithm} {}", keys::fingerprint(&subject)),
            &request.team,
            &request.correlation_id,
        );
        self.ledger.append(&entry).await?;

        tracing::info!(
            requester = sender,
            team = %request.team,
            principals = ?principals,
            validity_secs,
            id = %request.correlation_id,
            "Certificate signed"
        );

        Ok(SignedCertificate {
            valid_before: cert.valid_before(),
            certificate: cert,
            openssh,
            principals,
            algorithm,
        })
    }

    /// Sign and turn the result into a wire response. Failures become
    /// structured denials.
    pub async fn handle(&self, sender: &str, request: &SignatureRequest) -> SignatureResponse {
        let outcome = match self.sign(sender, request).await {
            Ok(signed) => SignatureOutcome::Signed {
                certificate: signed.openssh,
            },
            Err(e) => {
                let code = ErrorCode::from(&e);
                if code == ErrorCode::Internal {
                    tracing::error!(requester = sender, error = %e, "Signing failed");
                } else {
                    tracing::warn!(requester = sender, team = %request.team, code = %code, error = %e, "Signature request denied");
                }
                SignatureOutcome::Denied {
                    code,
                    message: e.to_string(),
                }
            }
        };
        SignatureResponse {
            correlation_id: request.correlation_id.clone(),
            outcome,
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

//! CA key export.

use zeroize::Zeroizing;

use crate::audit::AuditLedger;
use crate::config::CaConfig;
use crate::error::CaError;

/// Audit event written whenever the CA private key leaves the host.
pub const KEY_EXPORTED_EVENT: &str = "ca_key_exported";

/// Return the CA private key in OpenSSH form and record the export.
///
/// The audit line is written first; if it cannot be written the key is not
/// returned.
pub async fn export_ca_key(
    config: &CaConfig,
    ledger: &AuditLedger,
    operator: &str,
) -> Result<Zeroizing<String>, CaError> {
    let key = crate::ca::load(config)?;
    let fingerprint = key.fingerprint();
    ledger
        .append_event(
            KEY_EXPORTED_EVENT,
            &[("operator", operator), ("fingerprint", &fingerprint)],
        )
        .await?;
    tracing::warn!(operator, fingerprint = %fingerprint, "CA private key exported");
    Ok(key.private_key_openssh()?)
}

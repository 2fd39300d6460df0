//! Provisioning mode: load the credential into a running ssh-agent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use kssh_common::types::TeamConfig;

use crate::cache::{unix_now, CachedCredential, CertificateCache};
use crate::error::{ClientError, Result};

/// Something that can hold a key and its certificate for later ssh use.
#[async_trait]
pub trait KeyAgent: Send + Sync {
    /// Add the private key at `private_key`; its `-cert.pub` sibling is
    /// picked up alongside. `lifetime` bounds how long the agent keeps it.
    async fn add_identity(&self, private_key: &Path, lifetime: Option<Duration>) -> Result<()>;
}

/// The local `ssh-add`, talking to `$SSH_AUTH_SOCK`.
#[derive(Debug, Clone)]
pub struct SshAddAgent {
    program: PathBuf,
}

impl Default for SshAddAgent {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh-add"),
        }
    }
}

impl SshAddAgent {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl KeyAgent for SshAddAgent {
    async fn add_identity(&self, private_key: &Path, lifetime: Option<Duration>) -> Result<()> {
        let mut cmd = tokio::process::Command::new(&self.program);
        if let Some(lifetime) = lifetime {
            cmd.arg("-t").arg(lifetime.as_secs().max(1).to_string());
        }
        cmd.arg(private_key);

        let output = cmd.output().await.map_err(|e| {
            ClientError::Agent(format!("failed to run {}: {e}", self.program.display()))
        })?;
        if !output.status.success() {
            return Err(ClientError::Agent(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        tracing::debug!(key = %private_key.display(), "Key added to agent");
        Ok(())
    }
}

/// Obtains a credential through the cache and hands it to an agent.
pub struct ProvisioningAdapter<'a, A: KeyAgent> {
    cache: &'a CertificateCache,
    agent: A,
}

impl<'a, A: KeyAgent> ProvisioningAdapter<'a, A> {
    pub fn new(cache: &'a CertificateCache, agent: A) -> Self {
        Self { cache, agent }
    }

    /// At most one signing round trip, then one agent load. The agent is
    /// told to drop the key when the certificate expires.
    pub async fn provision(&self, config: &TeamConfig) -> Result<CachedCredential> {
        let credential = self.cache.ensure(config).await?;
        let remaining = credential.valid_before.saturating_sub(unix_now());
        self.agent
            .add_identity(
                &credential.paths.private_key(),
                Some(Duration::from_secs(remaining)),
            )
            .await?;
        tracing::info!(
            team = %credential.team,
            valid_before = credential.valid_before,
            "Certificate loaded into agent"
        );
        Ok(credential)
    }
}

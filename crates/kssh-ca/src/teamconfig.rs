//! Publication of client configs into every served team.

use kssh_channel::Channel;
use kssh_common::types::{CaAddress, TEAM_CONFIG_OBJECT};

use crate::error::CaError;
use crate::policy::AuthorizationPolicy;

/// Write a [`kssh_common::types::TeamConfig`] into each team the policy
/// serves. Returns the teams written.
///
/// All or nothing: if any team cannot be written, the configs already
/// written are withdrawn before the error is returned, so clients never
/// discover a CA that did not start.
pub async fn publish(
    channel: &dyn Channel,
    policy: &AuthorizationPolicy,
    address: &CaAddress,
    ca_public_key: &str,
) -> Result<Vec<String>, CaError> {
    let mut published = Vec::new();
    if let Err(e) = publish_each(channel, policy, address, ca_public_key, &mut published).await {
        tracing::error!(error = %e, written = published.len(), "Client config publication failed");
        withdraw(channel, &published).await;
        return Err(e);
    }
    Ok(published)
}

async fn publish_each(
    channel: &dyn Channel,
    policy: &AuthorizationPolicy,
    address: &CaAddress,
    ca_public_key: &str,
    published: &mut Vec<String>,
) -> Result<(), CaError> {
    for team in policy.teams() {
        let config = policy
            .team_config(team, address, ca_public_key)
            .ok_or_else(|| CaError::Internal(format!("no grant for served team {team}")))?;
        let bytes = serde_json::to_vec_pretty(&config)
            .map_err(|e| CaError::Internal(format!("encode team config: {e}")))?;
        channel.write_object(team, TEAM_CONFIG_OBJECT, bytes).await?;
        tracing::info!(team, ca = %address, "Client config published");
        published.push(team.to_string());
    }
    Ok(())
}

/// Remove published configs. Best-effort: failures are logged and the
/// remaining teams are still attempted.
pub async fn withdraw(channel: &dyn Channel, teams: &[String]) {
    for team in teams {
        match channel.delete_object(team, TEAM_CONFIG_OBJECT).await {
            Ok(()) => tracing::info!(team = %team, "Client config withdrawn"),
            Err(e) => tracing::warn!(team = %team, error = %e, "Failed to withdraw client config"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::TeamGrant;
    use kssh_channel::memory::MemoryHub;
    use kssh_common::types::TeamConfig;
    use std::collections::BTreeSet;

    fn policy() -> AuthorizationPolicy {
        AuthorizationPolicy::new(["acme.ssh.staging", "acme.ssh.prod"].map(|team| TeamGrant {
            team: team.to_string(),
            environment: team.rsplit('.').next().unwrap().to_string(),
            principals: BTreeSet::from([team.rsplit('.').next().unwrap().to_string()]),
        }))
    }

    fn address() -> CaAddress {
        CaAddress {
            bot_name: "cabot".to_string(),
            channel_name: "ssh-provision".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_then_withdraw() {
        let hub = MemoryHub::new();
        hub.add_member("acme.ssh.staging", "cabot");
        hub.add_member("acme.ssh.prod", "cabot");
        let ca = hub.handle("cabot");

        let teams = publish(&ca, &policy(), &address(), "ssh-ed25519 AAAA")
            .await
            .unwrap();
        assert_eq!(teams.len(), 2);

        let raw = hub.peek_object("acme.ssh.prod", TEAM_CONFIG_OBJECT).unwrap();
        let config: TeamConfig = serde_json::from_slice(&raw).unwrap();
        config.validate("acme.ssh.prod").unwrap();
        assert_eq!(config.environment, "prod");
        assert_eq!(config.ca, address());

        withdraw(&ca, &teams).await;
        assert!(hub.peek_object("acme.ssh.prod", TEAM_CONFIG_OBJECT).is_none());
        assert!(hub.peek_object("acme.ssh.staging", TEAM_CONFIG_OBJECT).is_none());
    }

    #[tokio::test]
    async fn publish_fails_when_bot_is_not_a_member() {
        let hub = MemoryHub::new();
        hub.add_member("acme.ssh.staging", "cabot");
        let ca = hub.handle("cabot");

        let err = publish(&ca, &policy(), &address(), "ssh-ed25519 AAAA")
            .await
            .unwrap_err();
        assert!(matches!(err, CaError::Channel(_)));
    }

    #[tokio::test]
    async fn partial_publish_is_rolled_back() {
        // prod sorts first and is written; staging then fails.
        let hub = MemoryHub::new();
        hub.add_member("acme.ssh.prod", "cabot");
        hub.add_member("acme.ssh.staging", "alice");
        let ca = hub.handle("cabot");

        let err = publish(&ca, &policy(), &address(), "ssh-ed25519 AAAA")
            .await
            .unwrap_err();
        assert!(matches!(err, CaError::Channel(_)));
        assert!(hub.peek_object("acme.ssh.prod", TEAM_CONFIG_OBJECT).is_none());
    }
}

//! Discovery of the team configs reachable by the local identity.

use kssh_channel::Channel;
use kssh_common::types::{TeamConfig, TEAM_CONFIG_OBJECT};

use crate::error::{ClientError, Result};

/// Read the published config from every team the local identity belongs
/// to. Teams without a config are skipped; a malformed config, or one that
/// names a different team than the one it was read from, is an error.
/// The result is sorted by team name.
pub async fn discover_configs(channel: &dyn Channel) -> Result<Vec<TeamConfig>> {
    let mut configs = Vec::new();
    for team in channel.teams().await? {
        let bytes = match channel.read_object(&team, TEAM_CONFIG_OBJECT).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(e) => {
                // Unreadable teams are treated as having no config.
                tracing::debug!(team = %team, error = %e, "Skipping team while searching for configs");
                continue;
            }
        };

        let config: TeamConfig =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::BadTeamConfig {
                team: team.clone(),
                reason: e.to_string(),
            })?;
        config
            .validate(&team)
            .map_err(|reason| ClientError::BadTeamConfig {
                team: team.clone(),
                reason,
            })?;
        configs.push(config);
    }

    configs.sort_by(|a, b| a.team.cmp(&b.team));
    tracing::debug!(count = configs.len(), "Discovered team configs");
    Ok(configs)
}

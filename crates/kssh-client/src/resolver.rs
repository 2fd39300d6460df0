//! Team config resolution.
//!
//! Picks the one config an invocation uses:
//!
//! 1. an explicit `--team` override, which must name a discovered team;
//! 2. the stored default team, when it is still reachable;
//! 3. the only CA reachable, when every discovered config routes to the
//!    same CA;
//! 4. otherwise ambiguity is an error.

use std::collections::BTreeSet;

use kssh_channel::Channel;
use kssh_common::types::{CaAddress, TeamConfig};

use crate::discovery::discover_configs;
use crate::error::{ClientError, Result};

/// Resolve over an already discovered set. Pure; `configs` is expected to
/// be sorted by team.
pub fn resolve(
    configs: &[TeamConfig],
    team_override: Option<&str>,
    default_team: Option<&str>,
) -> Result<TeamConfig> {
    if let Some(team) = team_override {
        return configs
            .iter()
            .find(|c| c.team == team)
            .cloned()
            .ok_or_else(|| ClientError::UnknownTeam(team.to_string()));
    }

    if let Some(team) = default_team {
        match configs.iter().find(|c| c.team == team) {
            Some(config) => return Ok(config.clone()),
            None => tracing::warn!(team, "Default team is no longer reachable, ignoring it"),
        }
    }

    let cas: BTreeSet<&CaAddress> = configs.iter().map(|c| &c.ca).collect();
    match cas.len() {
        0 => Err(ClientError::NoTeams),
        1 => Ok(configs[0].clone()),
        count => Err(ClientError::AmbiguousTeam {
            count,
            teams: distinct_ca_teams(configs),
        }),
    }
}

/// First team (by name) for each distinct CA.
fn distinct_ca_teams(configs: &[TeamConfig]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    configs
        .iter()
        .filter(|c| seen.insert(&c.ca))
        .map(|c| c.team.clone())
        .collect()
}

/// Discovery plus resolution against a live channel.
pub struct TeamConfigResolver<'a> {
    channel: &'a dyn Channel,
}

impl<'a> TeamConfigResolver<'a> {
    pub fn new(channel: &'a dyn Channel) -> Self {
        Self { channel }
    }

    pub async fn resolve(
        &self,
        team_override: Option<&str>,
        default_team: Option<&str>,
    ) -> Result<TeamConfig> {
        let configs = discover_configs(self.channel).await?;
        let config = resolve(&configs, team_override, default_team)?;
        tracing::debug!(team = %config.team, ca = %config.ca, "Resolved team config");
        Ok(config)
    }
}

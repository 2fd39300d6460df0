//! Authorization policy: which principals a requester may obtain.
//!
//! Each served team maps to an environment and a principal set. A
//! requester is granted the union of the principal sets of every served
//! team they belong to; membership comes from the channel.

use std::collections::{BTreeMap, BTreeSet};

use kssh_channel::Channel;
use kssh_common::types::{CaAddress, TeamConfig};

use crate::config::CaConfig;
use crate::error::CaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamGrant {
    pub team: String,
    pub environment: String,
    pub principals: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthorizationPolicy {
    grants: BTreeMap<String, TeamGrant>,
}

impl AuthorizationPolicy {
    pub fn new(grants: impl IntoIterator<Item = TeamGrant>) -> Self {
        Self {
            grants: grants
                .into_iter()
                .map(|g| (g.team.clone(), g))
                .collect(),
        }
    }

    pub fn from_config(config: &CaConfig) -> Self {
        Self::new(config.teams.iter().map(|t| TeamGrant {
            team: t.name.clone(),
            environment: t.environment(),
            principals: t.principals(),
        }))
    }

    pub fn serves(&self, team: &str) -> bool {
        self.grants.contains_key(team)
    }

    pub fn teams(&self) -> impl Iterator<Item = &str> {
        self.grants.keys().map(String::as_str)
    }

    pub fn grant(&self, team: &str) -> Option<&TeamGrant> {
        self.grants.get(team)
    }

    /// Principal sets keyed by environment, merged across teams that share
    /// an environment.
    pub fn environments(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut envs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for grant in self.grants.values() {
            envs.entry(grant.environment.clone())
                .or_default()
                .extend(grant.principals.iter().cloned());
        }
        envs
    }

    /// Principals granted to a member of exactly `member_of`.
    pub fn principals_for<'a>(
        &self,
        member_of: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        member_of
            .into_iter()
            .filter_map(|team| self.grants.get(team))
            .flat_map(|g| g.principals.iter().cloned())
            .collect()
    }

    /// Ask the channel which served teams `requester` belongs to and return
    /// the resulting grant. Empty when they belong to none.
    pub async fn resolve_grant(
        &self,
        channel: &dyn Channel,
        requester: &str,
    ) -> Result<BTreeSet<String>, CaError> {
        let mut member_of = Vec::new();
        for team in self.teams() {
            if channel.is_member(team, requester).await? {
                member_of.push(team);
            }
        }
        tracing::debug!(requester, teams = ?member_of, "Resolved team memberships");
        Ok(self.principals_for(member_of))
    }

    /// The client-facing document published into `team`.
    pub fn team_config(
        &self,
        team: &str,
        address: &CaAddress,
        ca_public_key: &str,
    ) -> Option<TeamConfig> {
        let grant = self.grants.get(team)?;
        Some(TeamConfig {
            team: grant.team.clone(),
            environment: grant.environment.clone(),
            principals: self.environments(),
            ca: address.clone(),
            ca_public_key: ca_public_key.to_string(),
        })
    }
}

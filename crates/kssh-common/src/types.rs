use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Object name under which a CA publishes its [`TeamConfig`] in each team.
pub const TEAM_CONFIG_OBJECT: &str = "kssh-client.config";

/// Where to reach a team's CA on the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaAddress {
    /// Channel identity the CA answers as.
    pub bot_name: String,
    /// Named channel inside the team that carries signing traffic.
    pub channel_name: String,
}

impl std::fmt::Display for CaAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.bot_name, self.channel_name)
    }
}

/// A team's published client configuration.
///
/// Written by the CA into every team it serves, read-only for clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamConfig {
    pub team: String,
    pub environment: String,
    /// Principal sets per environment served by the CA.
    pub principals: BTreeMap<String, BTreeSet<String>>,
    pub ca: CaAddress,
    /// CA public key in OpenSSH format, pinned by the client.
    pub ca_public_key: String,
}

impl TeamConfig {
    /// Principals this team's own environment maps to.
    pub fn environment_principals(&self) -> BTreeSet<String> {
        self.principals
            .get(&self.environment)
            .cloned()
            .unwrap_or_default()
    }

    /// Check the document is internally consistent and was read from the
    /// team it names.
    pub fn validate(&self, read_from_team: &str) -> Result<(), String> {
        if self.team.is_empty() || self.ca.bot_name.is_empty() {
            return Err("config file is missing data".to_string());
        }
        if self.team != read_from_team {
            return Err(format!(
                "config in team {read_from_team} specifies incorrect team name {}",
                self.team
            ));
        }
        if self.ca_public_key.trim().is_empty() {
            return Err("config file is missing the CA public key".to_string());
        }
        Ok(())
    }
}

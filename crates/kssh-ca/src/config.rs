//! CA server configuration (`keybaseca.toml`).

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use kssh_common::paths;
use kssh_common::types::CaAddress;
use serde::{Deserialize, Serialize};

use crate::error::CaError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "KEYBASECA_CONFIG";

const CONFIG_FILENAME: &str = "keybaseca.toml";
const CA_KEY_FILENAME: &str = "ca_key";

/// One team served by the CA.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamEntry {
    pub name: String,
    /// Defaults to the last dotted segment of `name`.
    #[serde(default)]
    pub environment: Option<String>,
    /// Defaults to `[environment]`.
    #[serde(default)]
    pub principals: Option<Vec<String>>,
}

impl TeamEntry {
    pub fn environment(&self) -> String {
        match &self.environment {
            Some(env) => env.clone(),
            None => self
                .name
                .rsplit('.')
                .next()
                .unwrap_or(&self.name)
                .to_string(),
        }
    }

    pub fn principals(&self) -> BTreeSet<String> {
        match &self.principals {
            Some(list) => list.iter().cloned().collect(),
            None => BTreeSet::from([self.environment()]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaConfig {
    #[serde(default = "default_ca_key_location")]
    pub ca_key_location: PathBuf,
    /// Longest validity the CA will issue, e.g. `+1h`.
    #[serde(default = "default_key_expiration")]
    pub key_expiration: String,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    pub bot_name: String,
    /// Team hosting the ledger object; the first team when unset.
    #[serde(default)]
    pub audit_team: Option<String>,
    #[serde(default = "default_audit_object")]
    pub audit_object: String,
    /// Local ledger file used instead of the channel object.
    #[serde(default)]
    pub audit_file: Option<PathBuf>,
    #[serde(default)]
    pub teams: Vec<TeamEntry>,
}

fn default_ca_key_location() -> PathBuf {
    paths::kssh_ca_dir().join(CA_KEY_FILENAME)
}

fn default_key_expiration() -> String {
    "+1h".to_string()
}

fn default_channel_name() -> String {
    "ssh-provision".to_string()
}

fn default_audit_object() -> String {
    "ca.log".to_string()
}

/// Default config location under the data dir.
pub fn default_config_path() -> PathBuf {
    paths::kssh_data_dir().join(CONFIG_FILENAME)
}

impl CaConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, CaError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CaError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::parse(&raw)?;
        tracing::debug!(path = %path.display(), teams = config.teams.len(), "CA config loaded");
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, CaError> {
        let mut config: Self =
            toml::from_str(raw).map_err(|e| CaError::Config(format!("invalid TOML: {e}")))?;
        if let Some(location) = config.ca_key_location.to_str() {
            config.ca_key_location = paths::expand_tilde(location);
        }
        if let Some(file) = config.audit_file.as_ref().and_then(|f| f.to_str()) {
            config.audit_file = Some(paths::expand_tilde(file));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaError> {
        if self.bot_name.trim().is_empty() {
            return Err(CaError::Config("bot_name must be set".to_string()));
        }
        if self.teams.is_empty() {
            return Err(CaError::Config("at least one [[teams]] entry is required".to_string()));
        }
        let mut seen = HashSet::new();
        for team in &self.teams {
            if team.name.trim().is_empty() {
                return Err(CaError::Config("team name must not be empty".to_string()));
            }
            if !seen.insert(team.name.as_str()) {
                return Err(CaError::Config(format!("duplicate team {}", team.name)));
            }
            if team.principals().iter().all(|p| p.trim().is_empty()) {
                return Err(CaError::Config(format!(
                    "team {} grants no principals",
                    team.name
                )));
            }
        }
        if let Some(audit_team) = &self.audit_team {
            if !seen.contains(audit_team.as_str()) {
                return Err(CaError::Config(format!(
                    "audit_team {audit_team} is not a configured team"
                )));
            }
        }
        parse_expiration(&self.key_expiration)?;
        Ok(())
    }

    /// Maximum validity, in seconds.
    pub fn max_validity_secs(&self) -> Result<u64, CaError> {
        parse_expiration(&self.key_expiration)
    }

    pub fn address(&self) -> CaAddress {
        CaAddress {
            bot_name: self.bot_name.clone(),
            channel_name: self.channel_name.clone(),
        }
    }

    /// Team hosting the channel ledger.
    pub fn audit_team(&self) -> &str {
        match &self.audit_team {
            Some(team) => team,
            None => self.teams.first().map(|t| t.name.as_str()).unwrap_or_default(),
        }
    }
}

/// Parse `+<n><s|m|h|d>` into seconds.
pub fn parse_expiration(raw: &str) -> Result<u64, CaError> {
    let invalid = || CaError::Config(format!("invalid key_expiration {raw:?}, expected e.g. +1h"));

    let body = raw.trim().strip_prefix('+').ok_or_else(invalid)?;
    let unit_at = match body.char_indices().last() {
        Some((0, _)) | None => return Err(invalid()),
        Some((i, _)) => i,
    };
    let (count, unit) = body.split_at(unit_at);
    let count: u64 = count.parse().map_err(|_| invalid())?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(invalid()),
    };
    match count.checked_mul(scale) {
        Some(0) | None => Err(invalid()),
        Some(secs) => Ok(secs),
    }
}

/// Render seconds in the `+<n><unit>` form, using the largest exact unit.
pub fn format_expiration(secs: u64) -> String {
    for (scale, unit) in [(86_400, 'd'), (3600, 'h'), (60, 'm')] {
        if secs >= scale && secs % scale == 0 {
            return format!("+{}{unit}", secs / scale);
        }
    }
    format!("+{secs}s")
}

//! The client's local preferences (`~/.ssh/kssh.config`).
//!
//! Holds at most one default team. Written only by `--set-default-team`,
//! removed by `--clear-default-team`, read on every invocation. Every
//! access happens under the [`BundleLock`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lock::BundleLock;
use crate::paths::ClientPaths;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientLocalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_team: Option<String>,
}

impl ClientLocalConfig {
    fn load(paths: &ClientPaths) -> Result<Self> {
        let mut config: Self = kssh_common::persist::read_json_or_default(&paths.local_config())?;
        // An empty string is how older configs spelled "no default".
        if config.default_team.as_deref() == Some("") {
            config.default_team = None;
        }
        Ok(config)
    }

    fn save(&self, paths: &ClientPaths) -> Result<()> {
        let path = paths.local_config();
        kssh_common::persist::write_json(&path, self)?;
        kssh_common::persist::set_owner_only(&path)?;
        Ok(())
    }
}

/// The stored default team, if any.
pub async fn default_team(paths: &ClientPaths, lock_timeout: Duration) -> Result<Option<String>> {
    let _lock = BundleLock::acquire(paths.lock(), lock_timeout).await?;
    Ok(ClientLocalConfig::load(paths)?.default_team)
}

pub async fn set_default_team(paths: &ClientPaths, team: &str, lock_timeout: Duration) -> Result<()> {
    let _lock = BundleLock::acquire(paths.lock(), lock_timeout).await?;
    let mut config = ClientLocalConfig::load(paths)?;
    config.default_team = Some(team.to_string());
    config.save(paths)?;
    tracing::info!(team, "Default team set");
    Ok(())
}

pub async fn clear_default_team(paths: &ClientPaths, lock_timeout: Duration) -> Result<()> {
    let _lock = BundleLock::acquire(paths.lock(), lock_timeout).await?;
    match std::fs::remove_file(paths.local_config()) {
        Ok(()) => tracing::info!("Default team cleared"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn set_get_clear() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());

        assert_eq!(default_team(&paths, T).await.unwrap(), None);

        set_default_team(&paths, "acme.ssh.staging", T).await.unwrap();
        assert_eq!(
            default_team(&paths, T).await.unwrap().as_deref(),
            Some("acme.ssh.staging")
        );
        let raw = std::fs::read_to_string(paths.local_config()).unwrap();
        assert_eq!(raw, r#"{"default_team":"acme.ssh.staging"}"#);

        set_default_team(&paths, "other.ssh", T).await.unwrap();
        assert_eq!(default_team(&paths, T).await.unwrap().as_deref(), Some("other.ssh"));

        clear_default_team(&paths, T).await.unwrap();
        clear_default_team(&paths, T).await.unwrap();
        assert_eq!(default_team(&paths, T).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_default_means_none() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());
        std::fs::write(paths.local_config(), r#"{"default_team":""}"#).unwrap();
        assert_eq!(default_team(&paths, T).await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());
        set_default_team(&paths, "acme.ssh.staging", T).await.unwrap();
        let mode = std::fs::metadata(paths.local_config()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

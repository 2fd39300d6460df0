//! Locations of the client's local state inside the ssh dir.

use std::path::{Path, PathBuf};

const KEY_FILENAME: &str = "kssh-signed-key";
const LOCAL_CONFIG_FILENAME: &str = "kssh.config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPaths {
    dir: PathBuf,
}

impl ClientPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.ssh`, or `$KSSH_SSH_DIR` when set.
    pub fn from_env() -> Self {
        Self::new(kssh_common::paths::ssh_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Private key, 0600.
    pub fn private_key(&self) -> PathBuf {
        self.dir.join(KEY_FILENAME)
    }

    pub fn public_key(&self) -> PathBuf {
        self.dir.join(format!("{KEY_FILENAME}.pub"))
    }

    /// Certificate, named so `ssh` and `ssh-add` pick it up next to the key.
    pub fn certificate(&self) -> PathBuf {
        self.dir.join(format!("{KEY_FILENAME}-cert.pub"))
    }

    /// Guards the bundle and the local config.
    pub fn lock(&self) -> PathBuf {
        self.dir.join(format!("{KEY_FILENAME}.lock"))
    }

    pub fn local_config(&self) -> PathBuf {
        self.dir.join(LOCAL_CONFIG_FILENAME)
    }
}

use std::path::PathBuf;

/// Overrides the kssh data directory (CA config, channel root, logs).
pub const DATA_DIR_ENV: &str = "KSSH_DATA_DIR";

/// Overrides the ssh directory holding the cached bundle and local config.
pub const SSH_DIR_ENV: &str = "KSSH_SSH_DIR";

fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        if let Some(profile) = std::env::var_os("USERPROFILE") {
            return Some(PathBuf::from(profile));
        }
    }

    std::env::var_os("HOME").map(PathBuf::from)
}

/// Root data directory for kssh.
///
/// - `$KSSH_DATA_DIR` when set
/// - otherwise `~/.kssh/`
pub fn kssh_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    match home_dir() {
        Some(home) => home.join(".kssh"),
        // Fallback
        None => PathBuf::from(".kssh"),
    }
}

/// The user's ssh directory, where the signed key bundle and
/// `kssh.config` live.
pub fn ssh_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(SSH_DIR_ENV) {
        return PathBuf::from(dir);
    }

    match home_dir() {
        Some(home) => home.join(".ssh"),
        None => PathBuf::from(".ssh"),
    }
}

/// CA state directory (key material).
pub fn kssh_ca_dir() -> PathBuf {
    kssh_data_dir().join("ca")
}

/// Root of the directory-backed channel used by the binaries.
pub fn kssh_channel_dir() -> PathBuf {
    kssh_data_dir().join("channel")
}

/// Expand a leading `~/` against the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

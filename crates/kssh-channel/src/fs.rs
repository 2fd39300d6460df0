//! Directory-backed channel.
//!
//! Each team is a directory under the channel root:
//!
//! ```text
//! <root>/<team>/members            one identity per line
//! <root>/<team>/objects/<name>     hosted objects (team config, ledger)
//! <root>/<team>/topics/<topic>.log JSON lines, one message each
//! ```
//!
//! The root is expected to be a shared filesystem whose access control
//! already matches team membership; sender attribution is the writing
//! handle's identity.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kssh_common::lockfile::LockFile;
use serde::{Deserialize, Serialize};

use crate::{Channel, ChannelError, Message};

/// Overrides the channel root.
pub const CHANNEL_ROOT_ENV: &str = "KSSH_CHANNEL_ROOT";

/// Overrides the local identity.
pub const IDENTITY_ENV: &str = "KSSH_IDENTITY";

const MEMBERS_FILE: &str = "members";
const OBJECTS_DIR: &str = "objects";
const TOPICS_DIR: &str = "topics";

/// How long a writer waits for a topic or object lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    seq: u64,
    sender: String,
    body: String,
}

#[derive(Debug, Clone)]
pub struct FsChannel {
    root: PathBuf,
    identity: String,
}

impl FsChannel {
    pub fn new(root: impl Into<PathBuf>, identity: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            identity: identity.into(),
        }
    }

    /// Build from `KSSH_CHANNEL_ROOT` / `KSSH_IDENTITY`, falling back to the
    /// data dir and the login name.
    pub fn from_env() -> Result<Self, ChannelError> {
        let root = default_root();
        let identity = std::env::var(IDENTITY_ENV)
            .or_else(|_| std::env::var("USER"))
            .or_else(|_| std::env::var("USERNAME"))
            .map_err(|_| {
                ChannelError::InvalidName(format!(
                    "cannot determine local identity; set {IDENTITY_ENV}"
                ))
            })?;
        validate_name(&identity)?;
        Ok(Self::new(root, identity))
    }

    async fn run<R, F>(&self, team: &str, f: F) -> Result<R, ChannelError>
    where
        R: Send + 'static,
        F: FnOnce(PathBuf) -> Result<R, ChannelError> + Send + 'static,
    {
        validate_name(team)?;
        let team_dir = self.root.join(team);
        let identity = self.identity.clone();
        let team = team.to_string();
        tokio::task::spawn_blocking(move || {
            if !member_of(&team_dir, &identity)? {
                return Err(ChannelError::NotMember { team, identity });
            }
            f(team_dir)
        })
        .await
        .map_err(|e| ChannelError::Task(e.to_string()))?
    }
}

/// `$KSSH_CHANNEL_ROOT`, or the channel dir under the kssh data dir.
pub fn default_root() -> PathBuf {
    std::env::var_os(CHANNEL_ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(kssh_common::paths::kssh_channel_dir)
}

/// Add `identity` to `team` under `root` (administrative setup).
pub fn add_member(root: &Path, team: &str, identity: &str) -> Result<(), ChannelError> {
    validate_name(team)?;
    validate_name(identity)?;
    let team_dir = root.join(team);
    std::fs::create_dir_all(&team_dir)?;
    if member_of(&team_dir, identity)? {
        return Ok(());
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(team_dir.join(MEMBERS_FILE))?;
    writeln!(file, "{identity}")?;
    tracing::debug!(team, identity, "Member added");
    Ok(())
}

fn member_of(team_dir: &Path, identity: &str) -> Result<bool, ChannelError> {
    let path = team_dir.join(MEMBERS_FILE);
    if !path.exists() {
        return Ok(false);
    }
    let members = std::fs::read_to_string(path)?;
    Ok(members.lines().any(|line| line.trim() == identity))
}

fn validate_name(name: &str) -> Result<(), ChannelError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_whitespace)
    {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn topic_path(team_dir: &Path, topic: &str) -> PathBuf {
    team_dir.join(TOPICS_DIR).join(format!("{topic}.log"))
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// The newline-terminated prefix of `raw`. A trailing line without its
/// newline is an append still in progress, or one a writer died during.
fn complete_lines(raw: &str) -> &str {
    raw.rfind('\n').map(|end| &raw[..=end]).unwrap_or("")
}

fn read_topic(path: &Path) -> Result<Vec<Message>, ChannelError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    complete_lines(&raw)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let stored: StoredMessage = serde_json::from_str(line)
                .map_err(|e| ChannelError::Corrupt(format!("{}: {e}", path.display())))?;
            let body = BASE64
                .decode(stored.body.as_bytes())
                .map_err(|e| ChannelError::Corrupt(format!("{}: {e}", path.display())))?;
            Ok(Message {
                seq: stored.seq,
                sender: stored.sender,
                body,
            })
        })
        .collect()
}

/// Cut off an unterminated last line. Only called under the topic lock,
/// where no append can be in flight, so such a line is a dead writer's.
fn drop_torn_tail(path: &Path) -> Result<(), ChannelError> {
    if !path.exists() {
        return Ok(());
    }
    let raw = std::fs::read_to_string(path)?;
    let keep = complete_lines(&raw).len();
    if keep < raw.len() {
        tracing::warn!(path = %path.display(), bytes = raw.len() - keep, "Dropping torn topic line");
        std::fs::OpenOptions::new()
            .write(true)
            .open(path)?
            .set_len(keep as u64)?;
    }
    Ok(())
}

#[async_trait]
impl Channel for FsChannel {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn teams(&self) -> Result<Vec<String>, ChannelError> {
        let root = self.root.clone();
        let identity = self.identity.clone();
        tokio::task::spawn_blocking(move || {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut teams = Vec::new();
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                if member_of(&entry.path(), &identity)? {
                    teams.push(entry.file_name().to_string_lossy().to_string());
                }
            }
            teams.sort();
            Ok(teams)
        })
        .await
        .map_err(|e| ChannelError::Task(e.to_string()))?
    }

    async fn is_member(&self, team: &str, identity: &str) -> Result<bool, ChannelError> {
        validate_name(team)?;
        let team_dir = self.root.join(team);
        let identity = identity.to_string();
        tokio::task::spawn_blocking(move || member_of(&team_dir, &identity))
            .await
            .map_err(|e| ChannelError::Task(e.to_string()))?
    }

    async fn deliver(&self, team: &str, topic: &str, body: Vec<u8>) -> Result<u64, ChannelError> {
        validate_name(topic)?;
        let topic = topic.to_string();
        let sender = self.identity.clone();
        self.run(team, move |team_dir| {
            let path = topic_path(&team_dir, &topic);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let _lock = LockFile::acquire(&lock_path(&path), LOCK_TIMEOUT)?;
            drop_torn_tail(&path)?;

            let seq = read_topic(&path)?.last().map(|m| m.seq).unwrap_or(0) + 1;
            let line = serde_json::to_string(&StoredMessage {
                seq,
                sender,
                body: BASE64.encode(&body),
            })
            .map_err(|e| ChannelError::Corrupt(e.to_string()))?;

            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(format!("{line}\n").as_bytes())?;
            Ok(seq)
        })
        .await
    }

    async fn read(
        &self,
        team: &str,
        topic: &str,
        after: u64,
    ) -> Result<Vec<Message>, ChannelError> {
        validate_name(topic)?;
        let topic = topic.to_string();
        self.run(team, move |team_dir| {
            Ok(read_topic(&topic_path(&team_dir, &topic))?
                .into_iter()
                .filter(|m| m.seq > after)
                .collect())
        })
        .await
    }

    async fn head(&self, team: &str, topic: &str) -> Result<u64, ChannelError> {
        validate_name(topic)?;
        let topic = topic.to_string();
        self.run(team, move |team_dir| {
            Ok(read_topic(&topic_path(&team_dir, &topic))?
                .last()
                .map(|m| m.seq)
                .unwrap_or(0))
        })
        .await
    }

    async fn read_object(&self, team: &str, name: &str) -> Result<Option<Vec<u8>>, ChannelError> {
        validate_name(name)?;
        let name = name.to_string();
        self.run(team, move |team_dir| {
            let path = team_dir.join(OBJECTS_DIR).join(&name);
            if !path.exists() {
                return Ok(None);
            }
            Ok(Some(std::fs::read(path)?))
        })
        .await
    }

    async fn write_object(
        &self,
        team: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ChannelError> {
        validate_name(name)?;
        let name = name.to_string();
        self.run(team, move |team_dir| {
            let path = team_dir.join(OBJECTS_DIR).join(&name);
            kssh_common::persist::write_atomic(&path, &bytes)?;
            Ok(())
        })
        .await
    }

    async fn append_object(
        &self,
        team: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ChannelError> {
        validate_name(name)?;
        let name = name.to_string();
        self.run(team, move |team_dir| {
            let dir = team_dir.join(OBJECTS_DIR);
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(&name);
            let _lock = LockFile::acquire(&lock_path(&path), LOCK_TIMEOUT)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(&bytes)?;
            Ok(())
        })
        .await
    }

    async fn delete_object(&self, team: &str, name: &str) -> Result<(), ChannelError> {
        validate_name(name)?;
        let name = name.to_string();
        self.run(team, move |team_dir| {
            let path = team_dir.join(OBJECTS_DIR).join(&name);
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}

//! Append-only audit ledger for CA operations.
//!
//! One line per signed request, plus plain event lines for operator
//! actions such as key export. The ledger lives either in a local file or
//! as an appendable object inside a team channel. Appends are serialized
//! so concurrent signings never interleave partial lines.
//!
//! Formats:
//! `2026-02-11T10:30:00.123456Z | Processing SignatureRequest from user=alice | principals:staging, expiration:+1h, pubkey:ssh-ed25519 SHA256:... | team=acme.ssh.staging | id=...`
//! `2026-02-11T10:31:00.000000Z | ca_key_exported | operator=root`

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use kssh_channel::Channel;
use tokio::io::AsyncWriteExt;

use crate::error::CaError;

const SIGNATURE_EVENT: &str = "Processing SignatureRequest from user=";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// One signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub requester: String,
    pub principals: BTreeSet<String>,
    /// Issued validity, `+<n><unit>`.
    pub expiration: String,
    /// Key algorithm and fingerprint, e.g. `ssh-ed25519 SHA256:...`.
    pub pubkey: String,
    /// Team channel the request arrived on.
    pub team: String,
    pub correlation_id: String,
}

impl AuditLogEntry {
    /// Entry stamped now, truncated to the microseconds the line carries.
    pub fn now(
        requester: &str,
        principals: &BTreeSet<String>,
        expiration: String,
        pubkey: String,
        team: &str,
        correlation_id: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now().trunc_subsecs(6),
            requester: requester.to_string(),
            principals: principals.clone(),
            expiration,
            pubkey,
            team: team.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

impl fmt::Display for AuditLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let principals = self
            .principals
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "{} | {SIGNATURE_EVENT}{} | principals:{principals}, expiration:{}, pubkey:{} | team={} | id={}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.requester,
            self.expiration,
            self.pubkey,
            self.team,
            self.correlation_id,
        )
    }
}

impl FromStr for AuditLogEntry {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.trim_end().split(" | ").collect();
        let [ts, who, details, team, id] = parts.as_slice() else {
            return Err(format!("expected 5 fields, found {}", parts.len()));
        };

        let requester = who
            .strip_prefix(SIGNATURE_EVENT)
            .ok_or_else(|| "not a signature line".to_string())?;
        let details = details
            .strip_prefix("principals:")
            .ok_or_else(|| "missing principals".to_string())?;
        let (principals, rest) = details
            .split_once(", expiration:")
            .ok_or_else(|| "missing expiration".to_string())?;
        let (expiration, pubkey) = rest
            .split_once(", pubkey:")
            .ok_or_else(|| "missing pubkey".to_string())?;

        Ok(Self {
            timestamp: parse_timestamp(ts)?,
            requester: requester.to_string(),
            principals: principals
                .split(',')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            expiration: expiration.to_string(),
            pubkey: pubkey.to_string(),
            team: team
                .strip_prefix("team=")
                .ok_or_else(|| "missing team".to_string())?
                .to_string(),
            correlation_id: id
                .strip_prefix("id=")
                .ok_or_else(|| "missing id".to_string())?
                .to_string(),
        })
    }
}

/// A non-signature ledger line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub fields: Vec<(String, String)>,
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.timestamp.format(TIMESTAMP_FORMAT), self.event)?;
        for (key, value) in &self.fields {
            write!(f, " | {key}={value}")?;
        }
        Ok(())
    }
}

/// Any line read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditLine {
    Signed(AuditLogEntry),
    Event(AuditEvent),
}

impl fmt::Display for AuditLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signed(entry) => entry.fmt(f),
            Self::Event(event) => event.fmt(f),
        }
    }
}

impl FromStr for AuditLine {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.trim_end().split(" | ");
        let ts = parts.next().ok_or_else(|| "empty line".to_string())?;
        let event = parts.next().ok_or_else(|| "missing event".to_string())?;
        if event.starts_with(SIGNATURE_EVENT) {
            return line.parse().map(AuditLine::Signed);
        }

        let fields = parts
            .map(|field| match field.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (field.to_string(), String::new()),
            })
            .collect();
        Ok(AuditLine::Event(AuditEvent {
            timestamp: parse_timestamp(ts)?,
            event: event.to_string(),
            fields,
        }))
    }
}

fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(ts)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {ts:?}: {e}"))
}

/// Where ledger lines are stored.
#[derive(Clone)]
pub enum AuditSink {
    File(PathBuf),
    Channel {
        channel: Arc<dyn Channel>,
        team: String,
        object: String,
    },
}

impl fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "File({})", path.display()),
            Self::Channel { team, object, .. } => write!(f, "Channel({team}/{object})"),
        }
    }
}

#[derive(Debug)]
pub struct AuditLedger {
    sink: AuditSink,
    append_lock: tokio::sync::Mutex<()>,
}

impl AuditLedger {
    pub fn new(sink: AuditSink) -> Self {
        Self {
            sink,
            append_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn sink(&self) -> &AuditSink {
        &self.sink
    }

    /// Append one signed-request entry.
    pub async fn append(&self, entry: &AuditLogEntry) -> Result<(), CaError> {
        self.append_line(&entry.to_string()).await?;
        tracing::debug!(
            requester = %entry.requester,
            team = %entry.team,
            id = %entry.correlation_id,
            "Audit log entry written"
        );
        Ok(())
    }

    /// Append an operator event with key=value fields.
    pub async fn append_event(&self, event: &str, fields: &[(&str, &str)]) -> Result<(), CaError> {
        let record = AuditEvent {
            timestamp: Utc::now().trunc_subsecs(6),
            event: event.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.append_line(&record.to_string()).await?;
        tracing::debug!(event, "Audit event written");
        Ok(())
    }

    async fn append_line(&self, line: &str) -> Result<(), CaError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');

        let _guard = self.append_lock.lock().await;
        match &self.sink {
            AuditSink::File(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                file.write_all(&bytes).await?;
                file.flush().await?;
            }
            AuditSink::Channel {
                channel,
                team,
                object,
            } => channel.append_object(team, object, bytes).await?,
        }
        Ok(())
    }

    /// Raw ledger contents (empty when nothing has been written yet).
    pub async fn read_raw(&self) -> Result<String, CaError> {
        let bytes = match &self.sink {
            AuditSink::File(path) => match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(e.into()),
            },
            AuditSink::Channel {
                channel,
                team,
                object,
            } => channel.read_object(team, object).await?.unwrap_or_default(),
        };
        String::from_utf8(bytes).map_err(|e| CaError::Internal(format!("ledger is not UTF-8: {e}")))
    }

    /// Every parseable ledger line, in append order.
    pub async fn read_lines(&self) -> Result<Vec<AuditLine>, CaError> {
        let raw = self.read_raw().await?;
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match line.parse::<AuditLine>() {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unparseable audit line");
                    None
                }
            })
            .collect())
    }

    /// Signed-request entries only.
    pub async fn read_entries(&self) -> Result<Vec<AuditLogEntry>, CaError> {
        Ok(self
            .read_lines()
            .await?
            .into_iter()
            .filter_map(|line| match line {
                AuditLine::Signed(entry) => Some(entry),
                AuditLine::Event(_) => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kssh_channel::memory::MemoryHub;

    fn entry(requester: &str) -> AuditLogEntry {
        AuditLogEntry::now(
            requester,
            &BTreeSet::from(["staging".to_string(), "root_everywhere".to_string()]),
            "+1h".to_string(),
            "ssh-ed25519 SHA256:abc".to_string(),
            "acme.ssh.staging",
            "0196-id",
        )
    }

    #[test]
    fn line_format_matches_reader_expectations() {
        let line = entry("alice").to_string();
        assert!(line.contains(
            "| Processing SignatureRequest from user=alice | principals:root_everywhere,staging, expiration:+1h, pubkey:ssh-ed25519 SHA256:abc |"
        ));
        assert!(line.ends_with("| team=acme.ssh.staging | id=0196-id"));
    }

    #[test]
    fn entry_parses_back() {
        let original = entry("alice");
        let parsed: AuditLogEntry = original.to_string().parse().unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn event_lines_parse_as_events() {
        let line = "2026-02-11T10:31:00.000000Z | ca_key_exported | operator=root";
        let parsed = line.parse::<AuditLine>().unwrap();
        assert_eq!(parsed.to_string(), line);
        match parsed {
            AuditLine::Event(event) => {
                assert_eq!(event.event, "ca_key_exported");
                assert_eq!(event.fields, vec![("operator".to_string(), "root".to_string())]);
            }
            other => panic!("expected event, got {other:?}"),
        }
        assert!("garbage".parse::<AuditLogEntry>().is_err());
    }

    #[tokio::test]
    async fn file_ledger_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AuditLedger::new(AuditSink::File(dir.path().join("logs").join("ca.log")));
        assert!(ledger.read_entries().await.unwrap().is_empty());

        ledger.append(&entry("alice")).await.unwrap();
        ledger.append_event("ca_key_exported", &[("operator", "root")]).await.unwrap();
        ledger.append(&entry("bob")).await.unwrap();

        let lines = ledger.read_lines().await.unwrap();
        assert_eq!(lines.len(), 3);
        let entries = ledger.read_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].requester, "alice");
        assert_eq!(entries[1].requester, "bob");
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let hub = MemoryHub::new();
        hub.add_member("acme.ssh.staging", "cabot");
        let ledger = Arc::new(AuditLedger::new(AuditSink::Channel {
            channel: Arc::new(hub.handle("cabot")),
            team: "acme.ssh.staging".to_string(),
            object: "ca.log".to_string(),
        }));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger.append(&entry(&format!("user{i}"))).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let entries = ledger.read_entries().await.unwrap();
        assert_eq!(entries.len(), 16);
        let raw = ledger.read_raw().await.unwrap();
        assert_eq!(raw.lines().count(), 16);
    }
}

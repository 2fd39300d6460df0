//! In-process channel.
//!
//! A [`MemoryHub`] holds every team's members, topics and objects; each
//! [`MemoryChannel`] is a handle speaking as one identity. Handles are cheap
//! to clone and share the hub.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{Channel, ChannelError, Message};

#[derive(Default)]
struct TeamState {
    members: BTreeSet<String>,
    topics: HashMap<String, Vec<Message>>,
    objects: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct HubInner {
    teams: Mutex<HashMap<String, TeamState>>,
    deliveries: AtomicU64,
}

/// Shared state behind every [`MemoryChannel`].
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `identity` to `team`, creating the team if needed.
    pub fn add_member(&self, team: &str, identity: &str) {
        self.lock()
            .entry(team.to_string())
            .or_default()
            .members
            .insert(identity.to_string());
    }

    /// A handle speaking as `identity`.
    pub fn handle(&self, identity: &str) -> MemoryChannel {
        MemoryChannel {
            hub: self.clone(),
            identity: identity.to_string(),
        }
    }

    /// Total messages delivered across all teams.
    pub fn delivery_count(&self) -> u64 {
        self.inner.deliveries.load(Ordering::SeqCst)
    }

    /// Read an object without a membership check.
    pub fn peek_object(&self, team: &str, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(team)
            .and_then(|state| state.objects.get(name).cloned())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TeamState>> {
        self.inner.teams.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle onto a [`MemoryHub`] for one identity.
#[derive(Clone)]
pub struct MemoryChannel {
    hub: MemoryHub,
    identity: String,
}

impl MemoryChannel {
    fn with_team<R>(
        &self,
        team: &str,
        f: impl FnOnce(&mut TeamState) -> R,
    ) -> Result<R, ChannelError> {
        let mut teams = self.hub.lock();
        match teams.get_mut(team) {
            Some(state) if state.members.contains(&self.identity) => Ok(f(state)),
            _ => Err(ChannelError::NotMember {
                team: team.to_string(),
                identity: self.identity.clone(),
            }),
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn teams(&self) -> Result<Vec<String>, ChannelError> {
        let mut teams: Vec<String> = self
            .hub
            .lock()
            .iter()
            .filter(|(_, state)| state.members.contains(&self.identity))
            .map(|(name, _)| name.clone())
            .collect();
        teams.sort();
        Ok(teams)
    }

    async fn is_member(&self, team: &str, identity: &str) -> Result<bool, ChannelError> {
        Ok(self
            .hub
            .lock()
            .get(team)
            .map(|state| state.members.contains(identity))
            .unwrap_or(false))
    }

    async fn deliver(&self, team: &str, topic: &str, body: Vec<u8>) -> Result<u64, ChannelError> {
        let sender = self.identity.clone();
        let seq = self.with_team(team, |state| {
            let messages = state.topics.entry(topic.to_string()).or_default();
            let seq = messages.last().map(|m| m.seq).unwrap_or(0) + 1;
            messages.push(Message { seq, sender, body });
            seq
        })?;
        self.hub.inner.deliveries.fetch_add(1, Ordering::SeqCst);
        Ok(seq)
    }

    async fn read(
        &self,
        team: &str,
        topic: &str,
        after: u64,
    ) -> Result<Vec<Message>, ChannelError> {
        self.with_team(team, |state| {
            state
                .topics
                .get(topic)
                .map(|messages| {
                    messages
                        .iter()
                        .filter(|m| m.seq > after)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    async fn head(&self, team: &str, topic: &str) -> Result<u64, ChannelError> {
        self.with_team(team, |state| {
            state
                .topics
                .get(topic)
                .and_then(|messages| messages.last())
                .map(|m| m.seq)
                .unwrap_or(0)
        })
    }

    async fn read_object(&self, team: &str, name: &str) -> Result<Option<Vec<u8>>, ChannelError> {
        self.with_team(team, |state| state.objects.get(name).cloned())
    }

    async fn write_object(
        &self,
        team: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ChannelError> {
        self.with_team(team, |state| {
            state.objects.insert(name.to_string(), bytes);
        })
    }

    async fn append_object(
        &self,
        team: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ChannelError> {
        self.with_team(team, |state| {
            state
                .objects
                .entry(name.to_string())
                .or_default()
                .extend_from_slice(&bytes);
        })
    }

    async fn delete_object(&self, team: &str, name: &str) -> Result<(), ChannelError> {
        self.with_team(team, |state| {
            state.objects.remove(name);
        })
    }
}

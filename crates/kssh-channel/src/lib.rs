//! Kssh Channel: the identity-attributed team channel.
//!
//! The channel is an external collaborator: a per-team, mutually
//! authenticated substrate that carries messages and hosts small objects
//! (team configs, the audit ledger). This crate defines the interface the
//! CA and the client depend on, plus two adapters:
//!
//! - [`memory::MemoryHub`]: in-process, used by tests and embedding.
//! - [`fs::FsChannel`]: a shared directory tree, one subdirectory per team.
//!
//! [`correlator::Correlator`] pairs responses with in-flight requests.

pub mod correlator;
pub mod error;
pub mod fs;
pub mod memory;

use async_trait::async_trait;

pub use error::ChannelError;

/// A message read back from a team channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Position in the topic; strictly increasing.
    pub seq: u64,
    /// Identity the channel attributes the message to.
    pub sender: String,
    pub body: Vec<u8>,
}

/// Team channel interface.
///
/// Every operation is performed as [`Channel::identity`] and fails with
/// [`ChannelError::NotMember`] for teams that identity does not belong to.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Identity this handle speaks as.
    fn identity(&self) -> &str;

    /// Teams the local identity belongs to.
    async fn teams(&self) -> Result<Vec<String>, ChannelError>;

    /// Whether `identity` belongs to `team`.
    async fn is_member(&self, team: &str, identity: &str) -> Result<bool, ChannelError>;

    /// Post `body` to `topic` inside `team`. Returns the assigned sequence.
    async fn deliver(&self, team: &str, topic: &str, body: Vec<u8>) -> Result<u64, ChannelError>;

    /// Messages on `topic` with a sequence greater than `after`, in order.
    async fn read(&self, team: &str, topic: &str, after: u64)
        -> Result<Vec<Message>, ChannelError>;

    /// Highest sequence currently on `topic` (0 when empty).
    async fn head(&self, team: &str, topic: &str) -> Result<u64, ChannelError>;

    async fn read_object(&self, team: &str, name: &str) -> Result<Option<Vec<u8>>, ChannelError>;

    async fn write_object(&self, team: &str, name: &str, bytes: Vec<u8>)
        -> Result<(), ChannelError>;

    /// Append to an object, creating it if missing. Appends are atomic with
    /// respect to each other.
    async fn append_object(&self, team: &str, name: &str, bytes: Vec<u8>)
        -> Result<(), ChannelError>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete_object(&self, team: &str, name: &str) -> Result<(), ChannelError>;
}

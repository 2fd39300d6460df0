//! Kssh Client: obtains and caches short-lived SSH certificates.
//!
//! An invocation resolves one team config ([`resolver`]), makes sure a
//! valid key and certificate are on disk ([`cache`]), asking the team's CA
//! over the channel when they are not ([`requester`]), and optionally
//! loads them into ssh-agent ([`provision`]).

pub mod bundle;
pub mod cache;
pub mod discovery;
pub mod error;
pub mod local_config;
pub mod lock;
pub mod paths;
pub mod provision;
pub mod requester;
pub mod resolver;

pub use cache::{CacheOutcome, CachedCredential, CertificateCache};
pub use error::{ClientError, Result};
pub use paths::ClientPaths;
pub use requester::CaRequester;
pub use resolver::TeamConfigResolver;

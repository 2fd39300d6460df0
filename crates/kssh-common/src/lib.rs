//! Kssh Common: shared building blocks for the CA and the client.
//!
//! Data-dir paths, atomic JSON persistence, machine-readable error codes,
//! correlation ids, and the wire types exchanged over a team channel.

pub mod error;
pub mod id;
pub mod lockfile;
pub mod paths;
pub mod persist;
pub mod protocol;
pub mod test;
pub mod types;

//! Connection and request lifecycle engine (`spec.md` §2): greeting and
//! challenge/response auth, a sync-multiplexed request registry, the
//! metadata cache, and the typed space operation surface, wired together
//! over a single tokio-owned TCP connection.

pub mod client;
pub mod connection;
pub mod metadata_cache;
pub mod registry;
pub mod space;

pub use client::Client;
pub use connection::{Connection, ConnectionState};
pub use metadata_cache::MetadataCache;
pub use registry::{RequestRegistry, ShutdownReason};
pub use space::{IndexRef, SelectOptions, Space, UpdateOp};

pub use iproto_dsn::{ClientCredentials, Config};
pub use iproto_errors::Error;

#[cfg(test)]
mod stub_server;

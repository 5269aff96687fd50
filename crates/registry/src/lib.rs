//! Lazy, concurrency-safe registry of downstream MCP connections (C2)
//! and the transport-polymorphic client adapter it manages (C4).

mod client;
mod error;
mod registry;

pub use client::DownstreamClient;
pub use error::RegistryError;
pub use registry::ServerRegistry;

pub use tokio_util::sync::CancellationToken;

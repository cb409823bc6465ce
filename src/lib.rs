//! FastDFS Rust Client Runtime
//!
//! Async client for FastDFS tracker and storage servers. It pools TCP
//! connections per server, speaks the FastDFS binary protocol, and retries the
//! tracker-then-storage sequence of uploads, downloads and deletes.
//!
//! # Features
//!
//! - File upload (normal and appender, optionally pinned to a group)
//! - File download (full and partial)
//! - File deletion
//! - Metadata operations (set, get) and file info queries
//! - Connection pooling with idle eviction and liveness checks
//! - Bounded retry with linear backoff
//! - Structured logging through `tracing`
//!
//! # Example
//!
//! ```no_run
//! use fdfs::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(vec!["192.168.1.100:22122".to_string()]);
//!     let client = Client::new(config)?;
//!
//!     let file_id = client.upload_buffer(b"Hello, FastDFS!", "txt", None).await?;
//!     let data = client.download_file(&file_id).await?;
//!     client.delete_file(&file_id).await?;
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
pub mod connection;
mod errors;
mod local;
mod operations;
pub mod pool;
pub mod protocol;
pub mod types;

pub use client::Client;
pub use connection::{Connection, Connector, TcpConnector, Transport};
pub use errors::{map_status_to_error, FdfsError, Result};
pub use pool::{ConnectionPool, PooledConnection};
pub use types::{
    ClientConfig, FileInfo, Metadata, MetadataFlag, ProtocolHeader, ServerAddress, StorageCommand,
    StorageServer, TrackerCommand,
};

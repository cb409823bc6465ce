//! FastDFS Protocol Types and Constants
//!
//! This module defines protocol-level constants, command codes, and the data
//! structures exchanged with tracker and storage servers, plus the client
//! configuration.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use crate::errors::{FdfsError, Result};

/// Default network ports for FastDFS servers
pub const TRACKER_DEFAULT_PORT: u16 = 22122;
pub const STORAGE_DEFAULT_PORT: u16 = 23000;

/// Protocol header size
pub const FDFS_PROTO_HEADER_LEN: usize = 10;

/// Field size limits
pub const FDFS_GROUP_NAME_MAX_LEN: usize = 16;
pub const FDFS_FILE_EXT_NAME_MAX_LEN: usize = 6;
pub const FDFS_MAX_META_NAME_LEN: usize = 64;
pub const FDFS_MAX_META_VALUE_LEN: usize = 256;
pub const FDFS_PROTO_PKG_LEN_SIZE: usize = 8;
pub const IP_ADDRESS_SIZE: usize = 16;

/// Default cap on a response body; larger headers are treated as corrupt
pub const DEFAULT_MAX_RESPONSE_SIZE: u64 = 1 << 30;

/// Protocol separators
pub const FDFS_RECORD_SEPARATOR: u8 = 0x01;
pub const FDFS_FIELD_SEPARATOR: u8 = 0x02;

/// Tracker protocol commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackerCommand {
    ServiceQueryStoreWithoutGroupOne = 101,
    ServiceQueryFetchOne = 102,
    ServiceQueryStoreWithGroupOne = 104,
}

impl From<TrackerCommand> for u8 {
    fn from(cmd: TrackerCommand) -> u8 {
        cmd as u8
    }
}

/// Storage protocol commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageCommand {
    UploadFile = 11,
    DeleteFile = 12,
    SetMetadata = 13,
    DownloadFile = 14,
    GetMetadata = 15,
    QueryFileInfo = 22,
    UploadAppenderFile = 23,
}

impl From<StorageCommand> for u8 {
    fn from(cmd: StorageCommand) -> u8 {
        cmd as u8
    }
}

/// Metadata operation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataFlag {
    /// Replace all existing metadata with new values
    Overwrite = b'O',
    /// Merge new metadata with existing metadata
    Merge = b'M',
}

impl From<MetadataFlag> for u8 {
    fn from(flag: MetadataFlag) -> u8 {
        flag as u8
    }
}

/// Information about a file stored in FastDFS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Size of the file in bytes
    pub file_size: u64,
    /// Timestamp when the file was created
    pub create_time: SystemTime,
    /// CRC32 checksum of the file
    pub crc32: u32,
    /// IP address of the storage server that first stored the file
    pub source_ip_addr: String,
}

/// A storage server picked by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageServer {
    /// Group the server belongs to
    pub group_name: String,
    /// IP address of the storage server
    pub ip_addr: String,
    /// Port number of the storage server
    pub port: u16,
    /// Index of the storage path to use (0-based), meaningful for uploads only
    pub store_path_index: u8,
}

impl StorageServer {
    /// Address used to key the storage connection pool
    pub fn addr(&self) -> ServerAddress {
        ServerAddress::new(self.ip_addr.clone(), self.port)
    }
}

/// FastDFS protocol header (10 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Length of the message body (not including header)
    pub length: u64,
    /// Command code (request type or response type)
    pub cmd: u8,
    /// Status code (0 for success, error code otherwise)
    pub status: u8,
}

/// A `host:port` endpoint of a tracker or storage server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Creates an address from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or IP
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = FdfsError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FdfsError::InvalidArgument(format!("Invalid server address: {}", s));

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}

/// Client configuration options
///
/// All durations are in milliseconds.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// List of tracker server addresses in format "host:port"
    pub tracker_addrs: Vec<String>,
    /// Maximum number of idle connections kept per server
    pub max_conns: usize,
    /// Timeout for establishing connections
    pub connect_timeout: u64,
    /// Timeout for each network send or receive
    pub network_timeout: u64,
    /// How long a pooled connection may sit unused before it is discarded
    pub idle_timeout: u64,
    /// Number of attempts for upload, download and delete
    pub retry_count: usize,
    /// Linear backoff unit; attempt `n` (0-based) is followed by `(n + 1) * retry_backoff`
    pub retry_backoff: u64,
    /// Largest response body accepted from a server, in bytes
    pub max_response_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tracker_addrs: Vec::new(),
            max_conns: 10,
            connect_timeout: 5000,
            network_timeout: 30000,
            idle_timeout: 60000,
            retry_count: 3,
            retry_backoff: 1000,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Creates a new client configuration with tracker addresses
    pub fn new(tracker_addrs: Vec<String>) -> Self {
        Self {
            tracker_addrs,
            ..Default::default()
        }
    }

    /// Sets the maximum number of connections per server
    pub fn with_max_conns(mut self, max_conns: usize) -> Self {
        self.max_conns = max_conns;
        self
    }

    /// Sets the connection timeout in milliseconds
    pub fn with_connect_timeout(mut self, timeout: u64) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the network timeout in milliseconds
    pub fn with_network_timeout(mut self, timeout: u64) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Sets the idle timeout in milliseconds
    pub fn with_idle_timeout(mut self, timeout: u64) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the retry count
    pub fn with_retry_count(mut self, count: usize) -> Self {
        self.retry_count = count;
        self
    }

    /// Sets the backoff unit in milliseconds
    pub fn with_retry_backoff(mut self, backoff: u64) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Sets the largest response body accepted, in bytes
    pub fn with_max_response_size(mut self, size: u64) -> Self {
        self.max_response_size = size;
        self
    }

    /// Checks the configuration and returns the parsed tracker addresses
    pub fn validate(&self) -> Result<Vec<ServerAddress>> {
        if self.tracker_addrs.is_empty() {
            return Err(FdfsError::InvalidArgument(
                "Tracker addresses are required".to_string(),
            ));
        }
        if self.max_conns == 0 {
            return Err(FdfsError::InvalidArgument(
                "max_conns must be at least 1".to_string(),
            ));
        }
        if self.retry_count == 0 {
            return Err(FdfsError::InvalidArgument(
                "retry_count must be at least 1".to_string(),
            ));
        }
        if self.max_response_size == 0 {
            return Err(FdfsError::InvalidArgument(
                "max_response_size must be at least 1".to_string(),
            ));
        }

        self.tracker_addrs
            .iter()
            .map(|addr| addr.parse::<ServerAddress>())
            .collect()
    }
}

/// Metadata dictionary type
pub type Metadata = std::collections::HashMap<String, String>;

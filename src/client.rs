//! Public entry point
//!
//! [`Client`] validates its configuration, owns the two connection pools and
//! forwards each call to the operation layer.

use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connector, TcpConnector};
use crate::errors::{FdfsError, Result};
use crate::local::{read_file_content, write_file_content};
use crate::operations::Operations;
use crate::pool::ConnectionPool;
use crate::protocol::get_file_ext_name;
use crate::types::{ClientConfig, FileInfo, Metadata, MetadataFlag};

/// Pooled, retrying FastDFS client
///
/// The client owns one connection pool for the configured trackers and one for
/// the storage servers the trackers point it at. It is `Send + Sync`; share it
/// between tasks with an `Arc`.
///
/// # Example
///
/// ```no_run
/// use fdfs::{Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::new(vec!["192.168.1.100:22122".to_string()]);
///     let client = Client::new(config)?;
///
///     let file_id = client.upload_file("test.jpg", None).await?;
///     let data = client.download_file(&file_id).await?;
///     client.delete_file(&file_id).await?;
///
///     client.close();
///     Ok(())
/// }
/// ```
pub struct Client {
    config: ClientConfig,
    tracker_pool: Arc<ConnectionPool>,
    storage_pool: Arc<ConnectionPool>,
    ops: Operations,
    closed: AtomicBool,
}

impl Client {
    /// Builds a client that connects over plain TCP
    ///
    /// Fails with `InvalidArgument` if the configuration does not validate.
    /// No connection is opened until the first operation.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Creates a client whose pools open transports through `connector`
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let tracker_addrs = config.validate()?;

        let connect_timeout = Duration::from_millis(config.connect_timeout);
        let idle_timeout = Duration::from_millis(config.idle_timeout);

        let tracker_pool = Arc::new(ConnectionPool::new(
            "tracker",
            tracker_addrs,
            config.max_conns,
            connect_timeout,
            idle_timeout,
            connector.clone(),
        ));

        let storage_pool = Arc::new(ConnectionPool::new(
            "storage",
            Vec::new(), // Storage servers are discovered dynamically
            config.max_conns,
            connect_timeout,
            idle_timeout,
            connector,
        ));

        let ops = Operations::new(
            tracker_pool.clone(),
            storage_pool.clone(),
            config.network_timeout,
            config.retry_count,
            Duration::from_millis(config.retry_backoff),
            config.max_response_size,
        );

        tracing::info!(trackers = ?config.tracker_addrs, "FastDFS client created");

        Ok(Self {
            config,
            tracker_pool,
            storage_pool,
            ops,
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FdfsError::ClientClosed);
        }
        Ok(())
    }

    /// Reads a local file and uploads its contents
    ///
    /// The extension stored on the server is taken from the local file name.
    pub async fn upload_file(
        &self,
        local_filename: impl AsRef<Path>,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        self.check_closed()?;
        self.upload_local(local_filename.as_ref(), metadata, false).await
    }

    /// Uploads `data`, stored with extension `file_ext_name`; returns the file ID
    pub async fn upload_buffer(
        &self,
        data: &[u8],
        file_ext_name: &str,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        self.check_closed()?;
        self.ops
            .upload_buffer(None, data, file_ext_name, metadata, false)
            .await
    }

    /// Uploads data from a buffer to a storage server of a specific group
    pub async fn upload_buffer_to_group(
        &self,
        group_name: &str,
        data: &[u8],
        file_ext_name: &str,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        self.check_closed()?;
        self.ops
            .upload_buffer(Some(group_name), data, file_ext_name, metadata, false)
            .await
    }

    /// Uploads a local file as an appender file
    pub async fn upload_appender_file(
        &self,
        local_filename: impl AsRef<Path>,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        self.check_closed()?;
        self.upload_local(local_filename.as_ref(), metadata, true).await
    }

    /// Uploads `data` as an appender file
    pub async fn upload_appender_buffer(
        &self,
        data: &[u8],
        file_ext_name: &str,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        self.check_closed()?;
        self.ops
            .upload_buffer(None, data, file_ext_name, metadata, true)
            .await
    }

    async fn upload_local(
        &self,
        local_filename: &Path,
        metadata: Option<&Metadata>,
        is_appender: bool,
    ) -> Result<String> {
        let file_data = read_file_content(local_filename).await?;
        let ext_name = get_file_ext_name(&local_filename.to_string_lossy());
        self.ops
            .upload_buffer(None, &file_data, &ext_name, metadata, is_appender)
            .await
    }

    /// Fetches the whole file
    pub async fn download_file(&self, file_id: &str) -> Result<Bytes> {
        self.check_closed()?;
        self.ops.download_file(file_id, 0, 0).await
    }

    /// Fetches `length` bytes starting at `offset`
    ///
    /// A `length` of 0 reads from `offset` to the end of the file.
    pub async fn download_file_range(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        self.check_closed()?;
        self.ops.download_file(file_id, offset, length).await
    }

    /// Fetches the whole file into `local_filename`, replacing any existing file
    pub async fn download_to_file(&self, file_id: &str, local_filename: impl AsRef<Path>) -> Result<()> {
        self.check_closed()?;
        let data = self.ops.download_file(file_id, 0, 0).await?;
        write_file_content(local_filename, &data).await
    }

    /// Removes the file from its storage group
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.check_closed()?;
        self.ops.delete_file(file_id).await
    }

    /// Replaces or merges the file's metadata, depending on `flag`
    pub async fn set_metadata(
        &self,
        file_id: &str,
        metadata: &Metadata,
        flag: MetadataFlag,
    ) -> Result<()> {
        self.check_closed()?;
        self.ops.set_metadata(file_id, metadata, flag).await
    }

    /// Returns the file's metadata; empty when none was set
    pub async fn get_metadata(&self, file_id: &str) -> Result<Metadata> {
        self.check_closed()?;
        self.ops.get_metadata(file_id).await
    }

    /// Queries size, creation time, CRC32 and source IP
    pub async fn get_file_info(&self, file_id: &str) -> Result<FileInfo> {
        self.check_closed()?;
        self.ops.get_file_info(file_id).await
    }

    /// Probes for the file with a file-info query
    ///
    /// Any failure of the underlying file-info query counts as "does not exist";
    /// only a closed client is reported as an error.
    pub async fn file_exists(&self, file_id: &str) -> Result<bool> {
        self.check_closed()?;
        Ok(self.ops.get_file_info(file_id).await.is_ok())
    }

    /// True once [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes both pools; later calls fail with `ClientClosed`
    ///
    /// Idempotent. Connections still checked out are closed when they return.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.tracker_pool.close();
        self.storage_pool.close();
        tracing::info!("FastDFS client closed");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

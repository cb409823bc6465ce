//! FastDFS Operations
//!
//! Each file operation is a tracker lookup followed by one exchange with the
//! storage node the tracker picked. Upload, download and delete repeat the
//! whole sequence on failure; the metadata and file-info queries do not.

use bytes::{BufMut, Bytes, BytesMut};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::connection::Connection;
use crate::errors::{map_status_to_error, FdfsError, Result};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::protocol::*;
use crate::types::*;

/// Runs FastDFS file operations over the tracker and storage pools
///
/// This struct is used internally by the Client.
pub(crate) struct Operations {
    tracker_pool: Arc<ConnectionPool>,
    storage_pool: Arc<ConnectionPool>,
    network_timeout: u64,
    retry_count: usize,
    retry_backoff: Duration,
    max_response_size: u64,
}

impl Operations {
    /// Creates a new Operations handler
    pub fn new(
        tracker_pool: Arc<ConnectionPool>,
        storage_pool: Arc<ConnectionPool>,
        network_timeout: u64,
        retry_count: usize,
        retry_backoff: Duration,
        max_response_size: u64,
    ) -> Self {
        Self {
            tracker_pool,
            storage_pool,
            network_timeout,
            retry_count,
            retry_backoff,
            max_response_size,
        }
    }

    /// Runs `attempt` up to `retry_count` times with linear backoff
    ///
    /// After failed attempt `n` (0-based) the task sleeps `(n + 1) * retry_backoff`.
    /// The error of the final attempt is returned unchanged. `ClientClosed`
    /// ends the loop at once.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.retry_count.max(1);
        let mut index = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e @ FdfsError::ClientClosed) => return Err(e),
                Err(e) if index + 1 >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.retry_backoff * (index as u32 + 1);
                    tracing::warn!(
                        operation,
                        attempt = index + 1,
                        attempts,
                        ?delay,
                        error = %e,
                        "operation failed, retrying"
                    );
                    sleep(delay).await;
                    index += 1;
                }
            }
        }
    }

    /// Uploads data from a buffer
    ///
    /// With `group_name` set the tracker is asked for a node of that group.
    /// Metadata is applied after the upload on a best-effort basis: if that
    /// step fails the file stays stored without it.
    pub async fn upload_buffer(
        &self,
        group_name: Option<&str>,
        data: &[u8],
        file_ext_name: &str,
        metadata: Option<&Metadata>,
        is_appender: bool,
    ) -> Result<String> {
        let file_id = self
            .with_retry("upload", || {
                self.upload_buffer_internal(group_name, data, file_ext_name, is_appender)
            })
            .await?;

        if let Some(meta) = metadata.filter(|m| !m.is_empty()) {
            if let Err(e) = self.set_metadata(&file_id, meta, MetadataFlag::Overwrite).await {
                tracing::warn!(file_id = %file_id, error = %e, "file uploaded but setting metadata failed");
            }
        }

        Ok(file_id)
    }

    async fn upload_buffer_internal(
        &self,
        group_name: Option<&str>,
        data: &[u8],
        file_ext_name: &str,
        is_appender: bool,
    ) -> Result<String> {
        let storage_server = self.query_store(group_name).await?;

        let storage_addr = storage_server.addr();
        self.storage_pool.add_addr(&storage_addr);
        let mut conn = self.storage_pool.checkout(&storage_addr).await?;

        let cmd = if is_appender {
            StorageCommand::UploadAppenderFile
        } else {
            StorageCommand::UploadFile
        };

        let mut prefix = BytesMut::with_capacity(1 + FDFS_PROTO_PKG_LEN_SIZE + FDFS_FILE_EXT_NAME_MAX_LEN);
        prefix.put_u8(storage_server.store_path_index);
        prefix.put_u64(data.len() as u64);
        prefix.put(pad_string(file_ext_name, FDFS_FILE_EXT_NAME_MAX_LEN));

        let body = self.request(&mut conn, cmd.into(), &[&prefix[..], data]).await?;
        decode_upload_response(&body)
    }

    /// Asks the tracker for a storage server to upload to
    async fn query_store(&self, group_name: Option<&str>) -> Result<StorageServer> {
        let mut conn = self.tracker_pool.checkout_any().await?;

        let body = match group_name.filter(|g| !g.is_empty()) {
            Some(group) => {
                let group = pad_string(group, FDFS_GROUP_NAME_MAX_LEN);
                let cmd = TrackerCommand::ServiceQueryStoreWithGroupOne;
                self.request(&mut conn, cmd.into(), &[&group[..]]).await?
            }
            None => {
                let cmd = TrackerCommand::ServiceQueryStoreWithoutGroupOne;
                self.request(&mut conn, cmd.into(), &[]).await?
            }
        };

        if body.is_empty() {
            return Err(FdfsError::NoStorageServer);
        }
        decode_storage_server(&body, true)
    }

    /// Asks the tracker which storage server holds an existing file
    async fn query_fetch(&self, group_name: &str, remote_filename: &str) -> Result<StorageServer> {
        let mut conn = self.tracker_pool.checkout_any().await?;

        let group = pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN);
        let cmd = TrackerCommand::ServiceQueryFetchOne;
        let body = self
            .request(&mut conn, cmd.into(), &[&group[..], remote_filename.as_bytes()])
            .await?;

        if body.is_empty() {
            return Err(FdfsError::NoStorageServer);
        }
        decode_storage_server(&body, false)
    }

    /// Sends one request and reads the matching response body
    ///
    /// The body length in the header is the sum of `parts`. A non-zero status
    /// maps to its typed error; if the server attached a body to the error the
    /// connection stays broken rather than being drained. Bodies longer than
    /// `max_response_size` are refused the same way.
    async fn request(&self, conn: &mut Connection, cmd: u8, parts: &[&[u8]]) -> Result<Bytes> {
        let body_len: usize = parts.iter().map(|p| p.len()).sum();
        tracing::debug!(addr = %conn.addr(), cmd, body_len, "sending request");

        conn.begin_exchange();
        conn.send(&encode_header(body_len as u64, cmd, 0), self.network_timeout)
            .await?;
        for part in parts.iter().filter(|p| !p.is_empty()) {
            conn.send(part, self.network_timeout).await?;
        }

        let header_data = conn
            .receive_full(FDFS_PROTO_HEADER_LEN, self.network_timeout)
            .await?;
        let header = decode_header(&header_data)?;

        if let Some(err) = map_status_to_error(header.status) {
            if header.length == 0 {
                conn.end_exchange();
            }
            return Err(err);
        }

        let body = if header.length == 0 {
            Bytes::new()
        } else {
            let length = usize::try_from(header.length)
                .ok()
                .filter(|_| header.length <= self.max_response_size)
                .ok_or_else(|| {
                    FdfsError::InvalidResponse(format!(
                        "Body length {} exceeds limit {}",
                        header.length, self.max_response_size
                    ))
                })?;
            conn.receive_full(length, self.network_timeout).await?
        };

        conn.end_exchange();
        Ok(body)
    }

    /// Resolves the storage node for an existing file and checks out a connection to it
    async fn fetch_storage(
        &self,
        group_name: &str,
        remote_filename: &str,
    ) -> Result<PooledConnection<'_>> {
        let storage_server = self.query_fetch(group_name, remote_filename).await?;

        let storage_addr = storage_server.addr();
        self.storage_pool.add_addr(&storage_addr);
        self.storage_pool.checkout(&storage_addr).await
    }

    /// Downloads a file or a byte range of it; `length` 0 reads to the end
    pub async fn download_file(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        self.with_retry("download", || {
            self.download_file_internal(&group_name, &remote_filename, offset, length)
        })
        .await
    }

    async fn download_file_internal(
        &self,
        group_name: &str,
        remote_filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes> {
        let mut conn = self.fetch_storage(group_name, remote_filename).await?;

        let mut head = BytesMut::with_capacity(2 * FDFS_PROTO_PKG_LEN_SIZE + FDFS_GROUP_NAME_MAX_LEN);
        head.put_u64(offset);
        head.put_u64(length);
        head.put(pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN));

        let cmd = StorageCommand::DownloadFile;
        self.request(&mut conn, cmd.into(), &[&head[..], remote_filename.as_bytes()])
            .await
    }

    /// Deletes a file
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        self.with_retry("delete", || self.delete_file_internal(&group_name, &remote_filename))
            .await
    }

    async fn delete_file_internal(&self, group_name: &str, remote_filename: &str) -> Result<()> {
        let mut conn = self.fetch_storage(group_name, remote_filename).await?;

        let group = pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN);
        let cmd = StorageCommand::DeleteFile;
        self.request(&mut conn, cmd.into(), &[&group[..], remote_filename.as_bytes()])
            .await?;
        Ok(())
    }

    /// Sets metadata for a file (single attempt)
    pub async fn set_metadata(
        &self,
        file_id: &str,
        metadata: &Metadata,
        flag: MetadataFlag,
    ) -> Result<()> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        let mut conn = self.fetch_storage(&group_name, &remote_filename).await?;

        let metadata_bytes = encode_metadata(metadata);
        let remote_filename_bytes = remote_filename.as_bytes();

        let mut head = BytesMut::with_capacity(2 * FDFS_PROTO_PKG_LEN_SIZE + 1 + FDFS_GROUP_NAME_MAX_LEN);
        head.put_u64(remote_filename_bytes.len() as u64);
        head.put_u64(metadata_bytes.len() as u64);
        head.put_u8(flag.into());
        head.put(pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN));

        let cmd = StorageCommand::SetMetadata;
        self.request(&mut conn, cmd.into(), &[&head[..], remote_filename_bytes, &metadata_bytes[..]])
            .await?;
        Ok(())
    }

    /// Retrieves metadata for a file (single attempt)
    pub async fn get_metadata(&self, file_id: &str) -> Result<Metadata> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        let mut conn = self.fetch_storage(&group_name, &remote_filename).await?;

        let group = pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN);
        let cmd = StorageCommand::GetMetadata;
        let body = self
            .request(&mut conn, cmd.into(), &[&group[..], remote_filename.as_bytes()])
            .await?;

        Ok(decode_metadata(&body))
    }

    /// Retrieves size, creation time, CRC32 and source IP of a file (single attempt)
    pub async fn get_file_info(&self, file_id: &str) -> Result<FileInfo> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        let mut conn = self.fetch_storage(&group_name, &remote_filename).await?;

        let group = pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN);
        let cmd = StorageCommand::QueryFileInfo;
        let body = self
            .request(&mut conn, cmd.into(), &[&group[..], remote_filename.as_bytes()])
            .await?;

        decode_file_info(&body)
    }
}

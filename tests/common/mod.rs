//! In-process FastDFS cluster for integration tests
//!
//! Runs one tracker and one storage server on loopback TCP. The storage server
//! keeps files in memory and the cluster records every command it receives,
//! so tests can check exactly which exchanges the client performed. A few
//! switches inject failures (hang-ups, error statuses, slow replies).

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use fdfs::protocol::{decode_header, decode_int64, encode_header, encode_metadata, pad_string, unpad_string};
use fdfs::types::{FDFS_GROUP_NAME_MAX_LEN, FDFS_PROTO_HEADER_LEN, IP_ADDRESS_SIZE};
use fdfs::{ClientConfig, Metadata};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Group served by the mock storage node
pub const GROUP: &str = "group1";

const RESP_CMD: u8 = 100;

/// A file held by the mock storage node
#[derive(Debug, Clone, Default)]
pub struct StoredFile {
    pub data: Vec<u8>,
    pub metadata: Metadata,
    pub appender: bool,
}

/// Observable and tweakable cluster state
#[derive(Debug, Default)]
pub struct ClusterState {
    /// Files by remote filename
    pub files: HashMap<String, StoredFile>,
    /// Every command received, tracker and storage, in arrival order
    pub commands: Vec<u8>,
    /// Connections accepted by the tracker
    pub tracker_accepts: usize,
    /// Connections accepted by the storage node
    pub storage_accepts: usize,
    /// Upload requests to answer by hanging up
    pub hang_up_uploads: usize,
    /// File-info requests to answer by hanging up
    pub hang_up_file_info: usize,
    /// Status returned for set-metadata requests (0 = store them)
    pub set_metadata_status: u8,
    /// Download requests whose reply is held back by `download_delay`
    pub slow_downloads: usize,
    pub download_delay: Duration,
    next_id: u64,
}

impl ClusterState {
    /// Number of received requests with command `cmd`
    pub fn count(&self, cmd: u8) -> usize {
        self.commands.iter().filter(|&&c| c == cmd).count()
    }
}

/// Handle to a running mock cluster
pub struct MockCluster {
    pub tracker_addr: SocketAddr,
    pub storage_addr: SocketAddr,
    pub state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// Binds both servers on ephemeral loopback ports and starts serving
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(ClusterState::default()));

        let tracker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let storage = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tracker_addr = tracker.local_addr().unwrap();
        let storage_addr = storage.local_addr().unwrap();

        let tracker_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = tracker.accept().await {
                tracker_state.lock().tracker_accepts += 1;
                tokio::spawn(serve_tracker(stream, tracker_state.clone(), storage_addr));
            }
        });

        let storage_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = storage.accept().await {
                storage_state.lock().storage_accepts += 1;
                tokio::spawn(serve_storage(stream, storage_state.clone()));
            }
        });

        Self {
            tracker_addr,
            storage_addr,
            state,
        }
    }

    /// Client configuration pointing at the mock tracker, with a short backoff
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(vec![self.tracker_addr.to_string()])
            .with_connect_timeout(1000)
            .with_network_timeout(2000)
            .with_retry_backoff(200)
    }
}

/// Installs a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn read_request(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut header = [0u8; FDFS_PROTO_HEADER_LEN];
    stream.read_exact(&mut header).await.ok()?;
    let header = decode_header(&header).ok()?;

    let mut body = vec![0u8; header.length as usize];
    stream.read_exact(&mut body).await.ok()?;
    Some((header.cmd, body))
}

async fn respond(stream: &mut TcpStream, status: u8, body: &[u8]) -> bool {
    let header = encode_header(body.len() as u64, RESP_CMD, status);
    stream.write_all(&header).await.is_ok() && stream.write_all(body).await.is_ok()
}

fn storage_server_body(group: &str, storage_addr: SocketAddr, store_path: Option<u8>) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put(pad_string(group, FDFS_GROUP_NAME_MAX_LEN));
    body.put(pad_string(&storage_addr.ip().to_string(), IP_ADDRESS_SIZE));
    body.put_u64(u64::from(storage_addr.port()));
    if let Some(index) = store_path {
        body.put_u8(index);
    }
    body.to_vec()
}

async fn serve_tracker(mut stream: TcpStream, state: Arc<Mutex<ClusterState>>, storage_addr: SocketAddr) {
    while let Some((cmd, body)) = read_request(&mut stream).await {
        state.lock().commands.push(cmd);

        let (status, reply) = match cmd {
            101 => (0, storage_server_body(GROUP, storage_addr, Some(0))),
            104 => {
                let group = unpad_string(&body[..FDFS_GROUP_NAME_MAX_LEN.min(body.len())]);
                if group == GROUP {
                    (0, storage_server_body(GROUP, storage_addr, Some(0)))
                } else {
                    (2, Vec::new())
                }
            }
            102 => (0, storage_server_body(GROUP, storage_addr, None)),
            _ => (22, Vec::new()),
        };

        if !respond(&mut stream, status, &reply).await {
            return;
        }
    }
}

/// Splits a `group(16) + filename` request body
fn group_and_name(body: &[u8]) -> (String, String) {
    let split = FDFS_GROUP_NAME_MAX_LEN.min(body.len());
    (
        unpad_string(&body[..split]),
        String::from_utf8_lossy(&body[split..]).into_owned(),
    )
}

async fn serve_storage(mut stream: TcpStream, state: Arc<Mutex<ClusterState>>) {
    while let Some((cmd, body)) = read_request(&mut stream).await {
        let (reply, delay) = {
            let mut state = state.lock();
            state.commands.push(cmd);
            let delay = if cmd == 14 && state.slow_downloads > 0 {
                state.slow_downloads -= 1;
                Some(state.download_delay)
            } else {
                None
            };
            (handle_storage(&mut state, cmd, &body), delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some((status, reply)) => {
                if !respond(&mut stream, status, &reply).await {
                    return;
                }
            }
            // Hang up without answering
            None => return,
        }
    }
}

fn handle_storage(state: &mut ClusterState, cmd: u8, body: &[u8]) -> Option<(u8, Vec<u8>)> {
    match cmd {
        11 | 23 => {
            if state.hang_up_uploads > 0 {
                state.hang_up_uploads -= 1;
                return None;
            }
            if body.len() < 15 {
                return Some((22, Vec::new()));
            }
            let file_size = decode_int64(&body[1..9]) as usize;
            let ext = unpad_string(&body[9..15]);
            let data = body[15..].to_vec();
            if data.len() != file_size {
                return Some((22, Vec::new()));
            }

            state.next_id += 1;
            let remote = format!("M00/00/00/{:016x}.{}", state.next_id, ext);
            state.files.insert(
                remote.clone(),
                StoredFile {
                    data,
                    metadata: Metadata::new(),
                    appender: cmd == 23,
                },
            );

            let mut reply = pad_string(GROUP, FDFS_GROUP_NAME_MAX_LEN).to_vec();
            reply.extend_from_slice(remote.as_bytes());
            Some((0, reply))
        }
        12 => {
            let (_, name) = group_and_name(body);
            match state.files.remove(&name) {
                Some(_) => Some((0, Vec::new())),
                None => Some((2, Vec::new())),
            }
        }
        13 => {
            if state.set_metadata_status != 0 {
                return Some((state.set_metadata_status, Vec::new()));
            }
            let name_len = decode_int64(&body[0..8]) as usize;
            let meta_len = decode_int64(&body[8..16]) as usize;
            let flag = body[16];
            let name_start = 17 + FDFS_GROUP_NAME_MAX_LEN;
            let name = String::from_utf8_lossy(&body[name_start..name_start + name_len]).into_owned();
            let meta = fdfs::protocol::decode_metadata(
                &body[name_start + name_len..name_start + name_len + meta_len],
            );

            match state.files.get_mut(&name) {
                Some(file) => {
                    if flag == b'O' {
                        file.metadata = meta;
                    } else {
                        file.metadata.extend(meta);
                    }
                    Some((0, Vec::new()))
                }
                None => Some((2, Vec::new())),
            }
        }
        14 => {
            let offset = decode_int64(&body[0..8]) as usize;
            let length = decode_int64(&body[8..16]) as usize;
            let (_, name) = group_and_name(&body[16..]);
            let Some(file) = state.files.get(&name) else {
                return Some((2, Vec::new()));
            };
            let start = offset.min(file.data.len());
            let end = if length == 0 {
                file.data.len()
            } else {
                (start + length).min(file.data.len())
            };
            Some((0, file.data[start..end].to_vec()))
        }
        15 => {
            let (_, name) = group_and_name(body);
            match state.files.get(&name) {
                Some(file) => Some((0, encode_metadata(&file.metadata).to_vec())),
                None => Some((2, Vec::new())),
            }
        }
        22 => {
            if state.hang_up_file_info > 0 {
                state.hang_up_file_info -= 1;
                return None;
            }
            let (_, name) = group_and_name(body);
            match state.files.get(&name) {
                Some(file) => {
                    let mut reply = BytesMut::new();
                    reply.put_u64(file.data.len() as u64);
                    reply.put_u64(1_700_000_000);
                    reply.put_u64(checksum(&file.data) as u64);
                    reply.put(pad_string("127.0.0.1", IP_ADDRESS_SIZE));
                    Some((0, reply.to_vec()))
                }
                None => Some((2, Vec::new())),
            }
        }
        _ => Some((22, Vec::new())),
    }
}

/// Cheap stand-in for the server's CRC32
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &b| acc.rotate_left(5) ^ u32::from(b))
}

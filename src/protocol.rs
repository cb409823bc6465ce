//! FastDFS wire codec
//!
//! Pure transforms between Rust values and the FastDFS wire format. Nothing in
//! this module touches the network or the filesystem.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::errors::{FdfsError, Result};
use crate::types::*;

/// Builds the 10-byte frame header: body length (big-endian u64), command, status
///
/// Requests always carry status 0; the length never includes the header itself.
pub fn encode_header(length: u64, cmd: u8, status: u8) -> Bytes {
    let mut header = [0u8; FDFS_PROTO_HEADER_LEN];
    header[..FDFS_PROTO_PKG_LEN_SIZE].copy_from_slice(&length.to_be_bytes());
    header[FDFS_PROTO_PKG_LEN_SIZE] = cmd;
    header[FDFS_PROTO_PKG_LEN_SIZE + 1] = status;
    Bytes::copy_from_slice(&header)
}

/// Parses a frame header; bytes past the first ten are ignored
pub fn decode_header(data: &[u8]) -> Result<ProtocolHeader> {
    if data.len() < FDFS_PROTO_HEADER_LEN {
        return Err(FdfsError::InvalidResponse(format!(
            "Header needs {} bytes, got {}",
            FDFS_PROTO_HEADER_LEN,
            data.len()
        )));
    }

    let mut buf = &data[..FDFS_PROTO_HEADER_LEN];
    let length = buf.get_u64();
    let cmd = buf.get_u8();
    let status = buf.get_u8();

    Ok(ProtocolHeader { length, cmd, status })
}

/// Splits `group/remote` (e.g. `group1/M00/00/00/wKgBcFxyz.jpg`) at the first slash
///
/// The group must be 1 to 16 bytes and the remote part non-empty.
pub fn split_file_id(file_id: &str) -> Result<(String, String)> {
    let invalid = || FdfsError::InvalidFileId(file_id.to_string());

    let (group_name, remote_filename) = file_id.split_once('/').ok_or_else(invalid)?;

    let group_ok = (1..=FDFS_GROUP_NAME_MAX_LEN).contains(&group_name.len());
    if !group_ok || remote_filename.is_empty() {
        return Err(invalid());
    }

    Ok((group_name.to_owned(), remote_filename.to_owned()))
}

/// Inverse of [`split_file_id`]
pub fn join_file_id(group_name: &str, remote_filename: &str) -> String {
    [group_name, remote_filename].join("/")
}

/// Serializes metadata as `key 0x02 value 0x01` records
///
/// Keys are cut at 64 bytes and values at 256. Record order follows map
/// iteration order. An empty map encodes to nothing.
pub fn encode_metadata(metadata: &Metadata) -> Bytes {
    let mut buf = BytesMut::new();

    for (key, value) in metadata {
        buf.put_slice(clip(key.as_bytes(), FDFS_MAX_META_NAME_LEN));
        buf.put_u8(FDFS_FIELD_SEPARATOR);
        buf.put_slice(clip(value.as_bytes(), FDFS_MAX_META_VALUE_LEN));
        buf.put_u8(FDFS_RECORD_SEPARATOR);
    }

    buf.freeze()
}

fn clip(bytes: &[u8], max: usize) -> &[u8] {
    &bytes[..bytes.len().min(max)]
}

/// Decodes FastDFS wire format metadata into a map
///
/// Records that do not split into exactly a key and a value are skipped,
/// which also absorbs the empty record after the trailing separator.
pub fn decode_metadata(data: &[u8]) -> Metadata {
    let mut metadata = Metadata::new();

    for record in data.split(|&b| b == FDFS_RECORD_SEPARATOR) {
        let fields: Vec<&[u8]> = record.split(|&b| b == FDFS_FIELD_SEPARATOR).collect();
        if let [key, value] = fields.as_slice() {
            metadata.insert(
                String::from_utf8_lossy(key).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            );
        }
    }

    metadata
}

/// Extension of `filename` without the dot, cut to the 6-byte wire field
///
/// `archive.tar.gz` gives `gz`, `README` gives an empty string. The cut never
/// splits a UTF-8 character.
pub fn get_file_ext_name(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    let mut end = ext.len().min(FDFS_FILE_EXT_NAME_MAX_LEN);
    while !ext.is_char_boundary(end) {
        end -= 1;
    }
    ext[..end].to_string()
}

/// Fills a fixed-width field: `s` cut to `length` bytes, then zero padded
pub fn pad_string(s: &str, length: usize) -> Bytes {
    let mut field = BytesMut::zeroed(length);
    let src = clip(s.as_bytes(), length);
    field[..src.len()].copy_from_slice(src);
    field.freeze()
}

/// Removes trailing null bytes from a fixed-width field
///
/// Undecodable bytes are replaced instead of failing.
pub fn unpad_string(data: &[u8]) -> String {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Encodes a 64-bit integer to an 8-byte big-endian representation
pub fn encode_int64(n: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u64(n);
    buf.freeze()
}

/// Decodes an 8-byte big-endian integer; short input yields 0
pub fn decode_int64(data: &[u8]) -> u64 {
    if data.len() < 8 {
        return 0;
    }
    let mut buf = &data[..8];
    buf.get_u64()
}

/// Encodes a 32-bit integer to a 4-byte big-endian representation
pub fn encode_int32(n: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(n);
    buf.freeze()
}

/// Decodes a 4-byte big-endian integer; short input yields 0
pub fn decode_int32(data: &[u8]) -> u32 {
    if data.len() < 4 {
        return 0;
    }
    let mut buf = &data[..4];
    buf.get_u32()
}

/// Decodes a tracker answer naming a storage server
///
/// Layout: group(16) + ip(16) + port(8), followed by the store path
/// index(1) when `with_store_path` is set (store queries only).
pub fn decode_storage_server(body: &[u8], with_store_path: bool) -> Result<StorageServer> {
    let min_len = FDFS_GROUP_NAME_MAX_LEN
        + IP_ADDRESS_SIZE
        + FDFS_PROTO_PKG_LEN_SIZE
        + usize::from(with_store_path);
    if body.len() < min_len {
        return Err(FdfsError::InvalidResponse(format!(
            "Storage server response too short: {} bytes",
            body.len()
        )));
    }

    let group_name = unpad_string(&body[..FDFS_GROUP_NAME_MAX_LEN]);
    let mut offset = FDFS_GROUP_NAME_MAX_LEN;
    let ip_addr = unpad_string(&body[offset..offset + IP_ADDRESS_SIZE]);
    offset += IP_ADDRESS_SIZE;

    let port = decode_int64(&body[offset..offset + FDFS_PROTO_PKG_LEN_SIZE]);
    let port = u16::try_from(port)
        .map_err(|_| FdfsError::InvalidResponse(format!("Invalid storage port: {}", port)))?;
    offset += FDFS_PROTO_PKG_LEN_SIZE;

    let store_path_index = if with_store_path { body[offset] } else { 0 };

    Ok(StorageServer {
        group_name,
        ip_addr,
        port,
        store_path_index,
    })
}

/// Decodes an upload answer into a file ID
pub fn decode_upload_response(body: &[u8]) -> Result<String> {
    if body.len() <= FDFS_GROUP_NAME_MAX_LEN {
        return Err(FdfsError::InvalidResponse(format!(
            "Upload response too short: {} bytes",
            body.len()
        )));
    }

    let group_name = unpad_string(&body[..FDFS_GROUP_NAME_MAX_LEN]);
    let remote_filename = String::from_utf8_lossy(&body[FDFS_GROUP_NAME_MAX_LEN..]);

    Ok(join_file_id(&group_name, &remote_filename))
}

/// Decodes a query-file-info answer
///
/// Layout: file_size(8) + create_timestamp(8) + crc32(8) + source_ip(16).
pub fn decode_file_info(body: &[u8]) -> Result<FileInfo> {
    if body.len() < 3 * FDFS_PROTO_PKG_LEN_SIZE + IP_ADDRESS_SIZE {
        return Err(FdfsError::InvalidResponse(format!(
            "File info response too short: {} bytes",
            body.len()
        )));
    }

    let file_size = decode_int64(&body[0..8]);
    let create_timestamp = decode_int64(&body[8..16]);
    let crc32 = decode_int64(&body[16..24]) as u32;
    let source_ip_addr = unpad_string(&body[24..24 + IP_ADDRESS_SIZE]);

    Ok(FileInfo {
        file_size,
        create_time: SystemTime::UNIX_EPOCH + Duration::from_secs(create_timestamp),
        crc32,
        source_ip_addr,
    })
}

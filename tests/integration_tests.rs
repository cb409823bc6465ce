//! Integration tests against a live FastDFS cluster
//!
//! These tests require a running FastDFS cluster.
//! Set the environment variable FASTDFS_TRACKER_ADDR to run these tests.
//!
//! Example: FASTDFS_TRACKER_ADDR=192.168.1.100:22122 cargo test --test integration_tests

use fdfs::{Client, ClientConfig, FdfsError, Metadata, MetadataFlag};
use std::env;

/// Returns a client for the configured cluster, or `None` to skip the test
fn live_client() -> Option<Client> {
    let Ok(addr) = env::var("FASTDFS_TRACKER_ADDR") else {
        println!("Skipping integration test - set FASTDFS_TRACKER_ADDR to run");
        return None;
    };
    Some(Client::new(ClientConfig::new(vec![addr])).expect("valid tracker address"))
}

/// Test complete upload, download, and delete cycle
#[tokio::test]
async fn test_upload_download_delete_cycle() {
    let Some(client) = live_client() else { return };

    // Arrange
    let test_data = b"Hello, FastDFS! This is a test file.";

    // Act: Upload and download
    let file_id = client
        .upload_buffer(test_data, "txt", None)
        .await
        .expect("Upload should succeed");
    let downloaded = client
        .download_file(&file_id)
        .await
        .expect("Download should succeed");

    // Assert
    assert!(file_id.contains('/'), "File ID should contain group separator");
    assert_eq!(&downloaded[..], &test_data[..]);

    // Act: Delete, then look again
    client.delete_file(&file_id).await.expect("Delete should succeed");

    // Assert: The file is gone
    assert!(!client.file_exists(&file_id).await.unwrap());
    assert!(matches!(
        client.delete_file(&file_id).await,
        Err(FdfsError::FileNotFound)
    ));

    client.close();
}

/// Test uploading from and downloading to local files
#[tokio::test]
async fn test_local_file_roundtrip() {
    let Some(client) = live_client() else { return };
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("upload.txt");
    tokio::fs::write(&source, b"Content uploaded from disk").await.unwrap();

    let file_id = client.upload_file(&source, None).await.expect("Upload should succeed");
    assert!(file_id.ends_with(".txt"));

    let target = dir.path().join("downloaded/copy.txt");
    client
        .download_to_file(&file_id, &target)
        .await
        .expect("Download should succeed");
    assert_eq!(
        tokio::fs::read(&target).await.unwrap(),
        b"Content uploaded from disk"
    );

    client.delete_file(&file_id).await.ok();
    client.close();
}

/// Test metadata set, overwrite and merge
#[tokio::test]
async fn test_metadata_operations() {
    let Some(client) = live_client() else { return };

    let mut metadata = Metadata::new();
    metadata.insert("author".to_string(), "Test User".to_string());
    metadata.insert("version".to_string(), "1.0".to_string());

    let file_id = client
        .upload_buffer(b"File with metadata", "txt", Some(&metadata))
        .await
        .expect("Upload should succeed");
    assert_eq!(client.get_metadata(&file_id).await.unwrap(), metadata);

    let mut update = Metadata::new();
    update.insert("status".to_string(), "modified".to_string());

    client
        .set_metadata(&file_id, &update, MetadataFlag::Merge)
        .await
        .expect("Merge should succeed");
    let merged = client.get_metadata(&file_id).await.unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(merged.get("status").map(String::as_str), Some("modified"));

    client
        .set_metadata(&file_id, &update, MetadataFlag::Overwrite)
        .await
        .expect("Overwrite should succeed");
    assert_eq!(client.get_metadata(&file_id).await.unwrap(), update);

    client.delete_file(&file_id).await.ok();
    client.close();
}

/// Test file info and partial downloads
#[tokio::test]
async fn test_file_info_and_range() {
    let Some(client) = live_client() else { return };
    let test_data = b"0123456789ABCDEFGHIJ";

    let file_id = client
        .upload_buffer(test_data, "bin", None)
        .await
        .expect("Upload should succeed");

    let info = client.get_file_info(&file_id).await.expect("File info should succeed");
    assert_eq!(info.file_size, test_data.len() as u64);
    assert!(!info.source_ip_addr.is_empty());

    let range = client.download_file_range(&file_id, 10, 5).await.unwrap();
    assert_eq!(&range[..], b"ABCDE");

    client.delete_file(&file_id).await.ok();
    client.close();
}

/// Test appender upload
#[tokio::test]
async fn test_appender_upload() {
    let Some(client) = live_client() else { return };

    let file_id = client
        .upload_appender_buffer(b"first line\n", "log", None)
        .await
        .expect("Appender upload should succeed");
    assert_eq!(&client.download_file(&file_id).await.unwrap()[..], b"first line\n");

    client.delete_file(&file_id).await.ok();
    client.close();
}

//! Basic client usage against a running cluster
//!
//! Uploads a buffer with metadata, reads it back whole and in part, inspects
//! it, then deletes it.
//!
//! Run with:
//! ```bash
//! FASTDFS_TRACKER_ADDR=192.168.1.100:22122 RUST_LOG=fdfs=debug cargo run --example basic_usage
//! ```

use fdfs::{Client, ClientConfig, Metadata, MetadataFlag};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let tracker = std::env::var("FASTDFS_TRACKER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:22122".to_string());

    let config = ClientConfig::new(vec![tracker])
        .with_max_conns(10)
        .with_connect_timeout(5000)
        .with_network_timeout(30000)
        .with_retry_count(3)
        .with_retry_backoff(500);
    let client = Client::new(config)?;

    let mut metadata = Metadata::new();
    metadata.insert("author".to_string(), "demo".to_string());

    println!("1. Uploading buffer...");
    let file_id = client
        .upload_buffer(b"Hello, FastDFS! This is a test file.", "txt", Some(&metadata))
        .await?;
    println!("   File ID: {}", file_id);

    println!("2. Downloading...");
    let data = client.download_file(&file_id).await?;
    println!("   {} bytes: {}", data.len(), String::from_utf8_lossy(&data));

    let head = client.download_file_range(&file_id, 0, 5).await?;
    println!("   First 5 bytes: {}", String::from_utf8_lossy(&head));

    println!("3. File information...");
    let info = client.get_file_info(&file_id).await?;
    println!("   Size: {} bytes", info.file_size);
    println!("   Created: {:?}", info.create_time);
    println!("   CRC32: {:#010x}", info.crc32);
    println!("   Source IP: {}", info.source_ip_addr);

    println!("4. Metadata...");
    let mut extra = Metadata::new();
    extra.insert("reviewed".to_string(), "yes".to_string());
    client.set_metadata(&file_id, &extra, MetadataFlag::Merge).await?;
    for (key, value) in client.get_metadata(&file_id).await? {
        println!("   {} = {}", key, value);
    }

    println!("5. Deleting...");
    client.delete_file(&file_id).await?;
    println!("   Exists afterwards: {}", client.file_exists(&file_id).await?);

    client.close();
    Ok(())
}

//! Local file helpers used by the path-based client entry points.

use bytes::Bytes;
use std::path::Path;

use crate::errors::Result;

/// Reads the entire contents of a local file
pub async fn read_file_content(filename: impl AsRef<Path>) -> Result<Bytes> {
    let data = tokio::fs::read(filename).await?;
    Ok(Bytes::from(data))
}

/// Writes data to a file, creating parent directories if needed
///
/// If the file already exists, it will be truncated.
pub async fn write_file_content(filename: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = filename.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

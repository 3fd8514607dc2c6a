use anyhow::bail;
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, File};
use tokio::io::{AsyncReadExt, BufReader};

pub async fn prepare_io(dir: &Path) -> anyhow::Result<()> {
    create_dir_all(dir).await?;
    Ok(())
}

/// Creates a new file, refusing to clobber an existing one.
pub async fn create_io_file<P: Into<PathBuf>>(path: P) -> anyhow::Result<File> {
    let pathbuf = path.into();
    if let Some(parent) = pathbuf.parent() {
        create_dir_all(parent).await?;
    }
    if pathbuf.exists() {
        bail!("File {} already exists!", pathbuf.display())
    }
    File::create(pathbuf).await.map_err(anyhow::Error::from)
}

pub async fn read_io_file<P: Into<PathBuf>>(path: P) -> anyhow::Result<Vec<u8>> {
    let buf = path.into();
    if !buf.exists() {
        bail!("Tried to read nonexistent file {}!", buf.display())
    }
    let mut bytes = Vec::new();
    BufReader::new(File::open(buf).await?)
        .read_to_end(&mut bytes)
        .await?;
    Ok(bytes)
}

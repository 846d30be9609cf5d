//! File storage collaborator
//!
//! The engine only knows how to push bytes into a [`Sink`] and how to pull a
//! sized [`Source`]; [`FsStorage`] backs both with the local file system.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};

/// Write target for an incoming binary span
#[async_trait]
pub trait Sink: Send {
    /// Append bytes to the target
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flush and close the target
    async fn finalize(&mut self) -> io::Result<()>;
}

/// Readable file with its size, staged for an outgoing span
pub struct Source {
    /// Where the bytes come from
    pub path: PathBuf,
    /// Announced size in bytes
    pub size: u64,
    /// Byte stream
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Opens sinks and sources by path
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create (or truncate) a file, creating parent directories as needed
    async fn open_sink(&self, path: &Path) -> io::Result<Box<dyn Sink>>;

    /// Open a file for sending; `None` when the path is not a readable
    /// regular file
    async fn open_source(&self, path: &Path) -> io::Result<Option<Source>>;
}

/// Storage on the local file system
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

impl FsStorage {
    /// Create a new file system storage
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn open_sink(&self, path: &Path) -> io::Result<Box<dyn Sink>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        tracing::debug!("Opened sink {:?}", path);
        Ok(Box::new(FileSink {
            writer: BufWriter::new(file),
        }))
    }

    async fn open_source(&self, path: &Path) -> io::Result<Option<Source>> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            tracing::debug!("Source {:?} is not a regular file", path);
            return Ok(None);
        }

        Ok(Some(Source {
            path: path.to_path_buf(),
            size: metadata.len(),
            reader: Box::new(file),
        }))
    }
}

/// Sink writing to a local file
struct FileSink {
    writer: BufWriter<File>,
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await
    }

    async fn finalize(&mut self) -> io::Result<()> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await
    }
}

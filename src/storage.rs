use std::future::Future;
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// A byte sink for one downloaded file.
///
/// A sink is closed by consuming it through exactly one of `commit` or
/// `abort`, so it cannot be closed twice or used after closing.
pub trait WriteSink: AsyncWrite + Unpin + Send {
    /// Flush, close and publish the written bytes. Returns the stored location.
    fn commit(self) -> impl Future<Output = std::io::Result<String>> + Send;

    /// Close and discard whatever was written so far.
    fn abort(self) -> impl Future<Output = ()> + Send;
}

/// Where downloads end up.
pub trait Storage: Send + Sync {
    type Sink: WriteSink;

    fn open_sink(&self, name: &str) -> impl Future<Output = std::io::Result<Self::Sink>> + Send;
}

/// Reject names that would escape the storage root or be empty.
pub(crate) fn validate_destination_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(format!("invalid destination name '{name}'"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(format!("destination name '{name}' contains a path separator"));
    }
    Ok(())
}

static SINK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Files under a local directory. The directory is created if missing.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root).await?;
        let root = tokio::fs::canonicalize(root).await?;
        info!(root = ?root, "Using local download directory");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }
}

impl Storage for LocalStorage {
    type Sink = LocalSink;

    async fn open_sink(&self, name: &str) -> std::io::Result<LocalSink> {
        validate_destination_name(name).map_err(|msg| IoError::new(IoErrorKind::InvalidInput, msg))?;

        let seq = SINK_SEQ.fetch_add(1, Ordering::Relaxed);
        let temp_path = self
            .root
            .join(format!(".download-{}-{seq}.part", std::process::id()));
        let final_path = self.root.join(name);

        let file = File::create(&temp_path).await?;
        debug!(?temp_path, ?final_path, "Opened download sink");

        Ok(LocalSink {
            file: Some(BufWriter::new(file)),
            temp_path,
            final_path,
        })
    }
}

/// Writes into a hidden temporary file that replaces the destination on
/// commit. The destination is never observed half-written.
pub struct LocalSink {
    file: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl LocalSink {
    fn file(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| IoError::new(IoErrorKind::BrokenPipe, "sink already closed"))
    }
}

impl AsyncWrite for LocalSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.file() {
            Ok(file) => Pin::new(file).poll_write(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.file() {
            Ok(file) => Pin::new(file).poll_flush(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.file() {
            Ok(file) => Pin::new(file).poll_shutdown(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl WriteSink for LocalSink {
    async fn commit(mut self) -> std::io::Result<String> {
        let Some(mut file) = self.file.take() else {
            return Err(IoError::new(IoErrorKind::BrokenPipe, "sink already closed"));
        };

        let published = async {
            file.flush().await?;
            file.get_mut().sync_all().await?;
            drop(file);
            tokio::fs::rename(&self.temp_path, &self.final_path).await
        }
        .await;

        if let Err(error) = published {
            warn!(temp_path = ?self.temp_path, %error, "Failed to publish download");
            remove_temp(&self.temp_path).await;
            return Err(error);
        }

        let location = self.final_path.to_string_lossy().to_string();
        info!(%location, "Download stored");
        Ok(location)
    }

    async fn abort(mut self) {
        drop(self.file.take());
        remove_temp(&self.temp_path).await;
        debug!(temp_path = ?self.temp_path, "Download sink discarded");
    }
}

impl Drop for LocalSink {
    fn drop(&mut self) {
        // dropped without commit/abort, e.g. the owning future was dropped
        if self.file.take().is_some() {
            _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

async fn remove_temp(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await
        && error.kind() != IoErrorKind::NotFound
    {
        warn!(?path, %error, "Failed to remove partial download");
    }
}

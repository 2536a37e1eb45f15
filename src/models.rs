use serde::Deserialize;
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;
use url::Url;

pub const DEFAULT_MIME_TYPE: &str = "audio/mpeg";

pub type ByteSource = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;

/// One file to upload. Owned by exactly one `upload` call, which drops (and
/// thereby closes) `content` before returning.
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub content: ByteSource,
    /// Declared size of `content`, sent as the part length when known.
    pub content_length: Option<u64>,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, content: impl AsyncRead + Send + Sync + 'static) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            content: Box::pin(content),
            content_length: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Body of a successful upload, as sent by the server. Only ever decoded
/// from a JSON object.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponseBody {
    #[serde(default)]
    pub(crate) download_url: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadResponse {
    /// Absolute URL, already resolved against the configured base.
    pub download_url: Url,
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadResult {
    pub stored_location: String,
    pub bytes_written: u64,
}

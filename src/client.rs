use crate::error::TransferError;
use crate::models::{DownloadResult, UploadRequest, UploadResponse, UploadResponseBody};
use crate::resolve::{endpoint_url, resolve_download_url};
use crate::storage::{Storage, WriteSink, validate_destination_name};
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::io::Error as IoError;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_UPLOAD_PATH: &str = "/api/upload";

/// Chunks buffered between the upload source and the request body.
const SOURCE_CHANNEL_DEPTH: usize = 4;

/// Server messages longer than this are replaced by the status reason.
const MAX_ERROR_MESSAGE_LEN: usize = 512;

/// At most this much of an error response body is read.
const MAX_ERROR_BODY_LEN: usize = 4096;

/// Cancellation and deadline for a single call.
#[derive(Clone, Debug, Default)]
pub struct CallControl {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl CallControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn begin(&self) -> ActiveCall<'_> {
        // a deadline past the clock's range is no deadline at all
        let deadline = self
            .timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        ActiveCall {
            cancel: &self.cancel,
            timeout: self.timeout,
            deadline,
        }
    }
}

/// A call in flight: every step shares one deadline.
struct ActiveCall<'a> {
    cancel: &'a CancellationToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl ActiveCall<'_> {
    async fn run<T>(
        &self,
        step: impl Future<Output = Result<T, TransferError>>,
    ) -> Result<T, TransferError> {
        let bounded = async {
            match (self.deadline, self.timeout) {
                (Some(deadline), Some(timeout)) => tokio::time::timeout_at(deadline, step)
                    .await
                    .map_err(|_| TransferError::Connection(format!("timed out after {timeout:?}")))?,
                _ => step.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            result = bounded => result,
        }
    }
}

/// Uploads audio to the server and downloads the processed result.
#[derive(Clone, Debug)]
pub struct TransferClient {
    transport: Transport,
    base_url: Url,
    upload_url: Url,
}

impl TransferClient {
    pub fn new(transport: Transport, base_url: Url) -> Result<Self, TransferError> {
        Self::with_upload_path(transport, base_url, DEFAULT_UPLOAD_PATH)
    }

    pub fn with_upload_path(
        transport: Transport,
        base_url: Url,
        upload_path: &str,
    ) -> Result<Self, TransferError> {
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(TransferError::InvalidRequest(format!(
                "base URL must be http or https, got {base_url}"
            )));
        }
        let upload_url = endpoint_url(&base_url, upload_path)?;
        Ok(Self {
            transport,
            base_url,
            upload_url,
        })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, TransferError> {
        self.upload_with(request, &CallControl::default()).await
    }

    /// POST the file as a single multipart part named `file` and return the
    /// resolved download URL from the JSON reply.
    ///
    /// `request.content` is consumed by this call and is closed by the time it
    /// returns, whatever the outcome.
    pub async fn upload_with(
        &self,
        request: UploadRequest,
        control: &CallControl,
    ) -> Result<UploadResponse, TransferError> {
        let UploadRequest {
            file_name,
            mime_type,
            content,
            content_length,
        } = request;

        if file_name.trim().is_empty() {
            return Err(TransferError::InvalidRequest(
                "file name is empty".to_string(),
            ));
        }

        // The source stays owned by this call: it is pumped into the request
        // body through a small channel and dropped before we return.
        let (mut body_tx, body_rx) = mpsc::channel::<Result<Bytes, IoError>>(SOURCE_CHANNEL_DEPTH);
        let pump = async move {
            let mut chunks = ReaderStream::new(content);
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => {
                        if body_tx.send(Ok(bytes)).await.is_err() {
                            // request gave up on the body
                            return Ok(());
                        }
                    }
                    Err(error) => {
                        _ = body_tx
                            .send(Err(IoError::new(error.kind(), error.to_string())))
                            .await;
                        return Err(error);
                    }
                }
            }
            Ok(())
        };

        let body = reqwest::Body::wrap_stream(body_rx);
        let part = match content_length {
            Some(length) => Part::stream_with_length(body, length),
            None => Part::stream(body),
        }
        .file_name(file_name.clone())
        .mime_str(&mime_type)
        .map_err(|err| TransferError::InvalidRequest(format!("mime type '{mime_type}': {err}")))?;
        let form = Form::new().part("file", part);

        info!(url = %self.upload_url, %file_name, %mime_type, ?content_length, "Uploading file");

        let call = control.begin();
        call.run(async {
            let sent = {
                let send = self
                    .transport
                    .client()
                    .post(self.upload_url.clone())
                    .multipart(form)
                    .send();
                let mut pump = std::pin::pin!(pump);
                let mut send = std::pin::pin!(send);
                let mut pumped: Option<std::io::Result<()>> = None;
                loop {
                    tokio::select! {
                        biased;
                        result = &mut pump, if pumped.is_none() => {
                            debug!(ok = result.is_ok(), "Upload source finished");
                            pumped = Some(result);
                        }
                        sent = &mut send => {
                            break match (sent, pumped) {
                                (Err(_), Some(Err(error))) => Err(TransferError::Io(error)),
                                (Err(error), _) => Err(TransferError::from_transport(error)),
                                (Ok(response), _) => Ok(response),
                            };
                        }
                    }
                }
            };
            let response = sent?;

            let status = response.status();
            debug!(%status, "Upload response received");
            if !status.is_success() {
                return fail_with_status(response).await;
            }

            let body = response
                .bytes()
                .await
                .map_err(TransferError::from_transport)?;
            parse_upload_body(&self.base_url, &body)
        })
        .await
        .inspect(|uploaded| info!(%file_name, download_url = %uploaded.download_url, "Upload complete"))
        .inspect_err(|error| error!(%file_name, %error, "Upload failed"))
    }

    pub async fn download<S: Storage>(
        &self,
        url: &str,
        destination: &str,
        storage: &S,
    ) -> Result<DownloadResult, TransferError> {
        self.download_with(url, destination, storage, &CallControl::default())
            .await
    }

    /// GET `url` and stream the body into a sink named `destination`.
    ///
    /// The sink is committed only after the whole body was written; on any
    /// failure it is aborted, so nothing partial is reported as stored.
    pub async fn download_with<S: Storage>(
        &self,
        url: &str,
        destination: &str,
        storage: &S,
        control: &CallControl,
    ) -> Result<DownloadResult, TransferError> {
        let url = parse_absolute_url(url)?;
        validate_destination_name(destination).map_err(TransferError::InvalidRequest)?;

        info!(%url, %destination, "Downloading file");

        let call = control.begin();
        let result = async {
            let response = call
                .run(async {
                    self.transport
                        .client()
                        .get(url.clone())
                        .send()
                        .await
                        .map_err(TransferError::from_transport)
                })
                .await?;

            let status = response.status();
            debug!(%status, content_length = ?response.content_length(), "Download response received");
            if !status.is_success() {
                return call.run(fail_with_status(response)).await;
            }

            let mut sink = storage
                .open_sink(destination)
                .await
                .inspect_err(|error| error!(%destination, %error, "Failed to open download sink"))?;

            match call.run(copy_body(response, &mut sink)).await {
                Ok(bytes_written) => {
                    let stored_location = sink.commit().await?;
                    Ok(DownloadResult {
                        stored_location,
                        bytes_written,
                    })
                }
                Err(error) => {
                    sink.abort().await;
                    Err(error)
                }
            }
        }
        .await;

        result
            .inspect(|done| {
                info!(%url, bytes = done.bytes_written, location = %done.stored_location, "Download complete")
            })
            .inspect_err(|error| error!(%url, %error, "Download failed"))
    }
}

async fn copy_body<W>(response: Response, sink: &mut W) -> Result<u64, TransferError>
where
    W: AsyncWrite + Unpin,
{
    let mut body = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(TransferError::from_transport)?;
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    Ok(written)
}

fn parse_absolute_url(url: &str) -> Result<Url, TransferError> {
    let parsed = Url::parse(url)
        .map_err(|err| TransferError::InvalidRequest(format!("download URL '{url}': {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(TransferError::InvalidRequest(format!(
            "download URL '{url}' has unsupported scheme '{scheme}'"
        ))),
    }
}

pub(crate) fn parse_upload_body(base_url: &Url, body: &[u8]) -> Result<UploadResponse, TransferError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| TransferError::ResponseFormat(format!("invalid JSON body: {err}")))?;
    if !value.is_object() {
        return Err(TransferError::ResponseFormat(
            "expected a JSON object".to_string(),
        ));
    }
    let parsed: UploadResponseBody = serde_json::from_value(value)
        .map_err(|err| TransferError::ResponseFormat(format!("unexpected JSON body: {err}")))?;

    let Some(raw_url) = parsed.download_url.filter(|url| !url.trim().is_empty()) else {
        return Err(TransferError::ResponseFormat(
            "download_url missing from response".to_string(),
        ));
    };

    Ok(UploadResponse {
        download_url: resolve_download_url(base_url, &raw_url)?,
        message: parsed.message,
    })
}

/// Fail with `HttpStatus`, preferring the server's own explanation.
async fn fail_with_status<T>(response: Response) -> Result<T, TransferError> {
    let status = response.status();
    let body = read_error_body(response).await;
    Err(TransferError::HttpStatus {
        status,
        message: error_message(status, &body),
    })
}

/// Read at most `MAX_ERROR_BODY_LEN` bytes of an error response.
async fn read_error_body(mut response: Response) -> Bytes {
    let status = response.status();
    let mut body = BytesMut::new();
    while body.len() < MAX_ERROR_BODY_LEN {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(error) => {
                warn!(%status, %error, "Failed to read error body");
                return Bytes::new();
            }
        }
    }
    body.truncate(MAX_ERROR_BODY_LEN);
    body.freeze()
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    let from_json = serde_json::from_slice::<Value>(body).ok().and_then(|body| {
        ["error", "message"]
            .into_iter()
            .find_map(|key| body.get(key).and_then(Value::as_str).map(str::to_string))
    });
    let from_text = || {
        std::str::from_utf8(body)
            .ok()
            .map(str::trim)
            .filter(|text| !text.is_empty() && !text.starts_with('<'))
            .map(str::to_string)
    };

    from_json
        .or_else(from_text)
        .filter(|message| message.len() <= MAX_ERROR_MESSAGE_LEN)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown status").to_string())
}

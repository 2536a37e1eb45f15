pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod resolve;
pub mod source;
pub mod storage;
pub mod transfer;
pub mod transport;

use anyhow::Context;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

//
// Re-export
//
pub use client::{CallControl, DEFAULT_UPLOAD_PATH, TransferClient};
pub use config::Config;
pub use error::{TransferError, TransferErrorKind};
pub use models::{DEFAULT_MIME_TYPE, DownloadResult, UploadRequest, UploadResponse};
pub use resolve::resolve_download_url;
pub use storage::{LocalStorage, Storage, WriteSink};
pub use transfer::{Transfer, TransferState};
pub use transport::{Transport, TransportConfig};

/// Upload the configured file, then download the server's result into the
/// output directory. Ctrl-C cancels whichever call is in flight.
pub async fn run(config: Config) -> anyhow::Result<DownloadResult> {
    let file = config
        .file
        .clone()
        .context("No file to upload, pass --file or set `file` in the config file")?;

    let base_url = Url::parse(&config.base_url)
        .with_context(|| format!("Invalid base URL {}", config.base_url))?;
    let transport = Transport::new(&config.transport_config())?;
    let client = TransferClient::with_upload_path(transport, base_url, &config.upload_path)?;
    info!(upload_url = %client.upload_url(), output_dir = %config.output_dir, "Transfer client ready");
    let storage = LocalStorage::new(&config.output_dir)
        .await
        .with_context(|| format!("Failed to prepare output directory {}", config.output_dir))?;

    let cancel = CancellationToken::new();
    let mut control = CallControl::new().with_cancel(cancel.clone());
    if let Some(timeout) = config.request_timeout() {
        control = control.with_timeout(timeout);
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfer");
            cancel.cancel();
        }
    });

    let request = source::open_file(Path::new(&file), config.mime_type.as_deref())
        .await
        .with_context(|| format!("Failed to open {file}"))?;

    let mut transfer = Transfer::new(&client, &storage).with_control(control);
    let downloaded = transfer
        .run(request, config.output_name.as_deref())
        .await
        .with_context(|| format!("Transfer of {file} failed in state {:?}", transfer.state()))?;

    info!(
        %file,
        location = %downloaded.stored_location,
        bytes = downloaded.bytes_written,
        "Transfer finished"
    );
    Ok(downloaded)
}

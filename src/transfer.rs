use crate::client::{CallControl, TransferClient};
use crate::error::TransferError;
use crate::models::{DownloadResult, UploadRequest, UploadResponse};
use crate::storage::{Storage, validate_destination_name};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferState {
    Idle,
    Uploading,
    UploadFailed,
    Uploaded,
    Downloading,
    DownloadFailed,
    Downloaded,
}

impl TransferState {
    pub fn can_enter(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Idle, Uploading)
                | (Uploading, UploadFailed)
                | (Uploading, Uploaded)
                | (Uploaded, Downloading)
                | (Downloading, DownloadFailed)
                | (Downloading, Downloaded)
        )
    }
}

/// One upload and the download of its result.
///
/// Nothing is retried: a failed step leaves the transfer in a failed state
/// until the caller `reset`s it and starts over.
pub struct Transfer<'a, S: Storage> {
    client: &'a TransferClient,
    storage: &'a S,
    control: CallControl,
    state: TransferState,
    uploaded: Option<UploadResponse>,
    downloaded: Option<DownloadResult>,
}

impl<'a, S: Storage> Transfer<'a, S> {
    pub fn new(client: &'a TransferClient, storage: &'a S) -> Self {
        Self {
            client,
            storage,
            control: CallControl::default(),
            state: TransferState::Idle,
            uploaded: None,
            downloaded: None,
        }
    }

    /// Cancellation and timeout applied to each network call of this transfer.
    pub fn with_control(mut self, control: CallControl) -> Self {
        self.control = control;
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn uploaded(&self) -> Option<&UploadResponse> {
        self.uploaded.as_ref()
    }

    pub fn downloaded(&self) -> Option<&DownloadResult> {
        self.downloaded.as_ref()
    }

    pub fn reset(&mut self) {
        debug!(from = ?self.state, "Transfer reset");
        self.state = TransferState::Idle;
        self.uploaded = None;
        self.downloaded = None;
    }

    fn enter(&mut self, next: TransferState) -> Result<(), TransferError> {
        if !self.state.can_enter(next) {
            warn!(from = ?self.state, to = ?next, "Rejected transfer state change");
            return Err(TransferError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "Transfer state changed");
        self.state = next;
        Ok(())
    }

    pub async fn upload(&mut self, request: UploadRequest) -> Result<&UploadResponse, TransferError> {
        self.enter(TransferState::Uploading)?;
        let result = self.client.upload_with(request, &self.control).await;
        match result {
            Ok(uploaded) => {
                self.enter(TransferState::Uploaded)?;
                Ok(self.uploaded.insert(uploaded))
            }
            Err(error) => {
                self.enter(TransferState::UploadFailed)?;
                Err(error)
            }
        }
    }

    pub async fn download(&mut self, destination: &str) -> Result<&DownloadResult, TransferError> {
        let from = self.state;
        let Some(url) = self
            .uploaded
            .as_ref()
            .filter(|_| from == TransferState::Uploaded)
            .map(|uploaded| uploaded.download_url.to_string())
        else {
            return Err(TransferError::InvalidState {
                from,
                to: TransferState::Downloading,
            });
        };

        self.enter(TransferState::Downloading)?;
        let result = self
            .client
            .download_with(&url, destination, self.storage, &self.control)
            .await;
        match result {
            Ok(downloaded) => {
                self.enter(TransferState::Downloaded)?;
                Ok(self.downloaded.insert(downloaded))
            }
            Err(error) => {
                self.enter(TransferState::DownloadFailed)?;
                Err(error)
            }
        }
    }

    /// Upload, then download into `destination` (default: the uploaded file's
    /// name). The destination is checked before anything is sent.
    pub async fn run(
        &mut self,
        request: UploadRequest,
        destination: Option<&str>,
    ) -> Result<DownloadResult, TransferError> {
        let destination = destination.unwrap_or(&request.file_name).to_string();
        validate_destination_name(&destination).map_err(TransferError::InvalidRequest)?;

        self.upload(request).await?;
        self.download(&destination).await.cloned()
    }
}

use crate::error::TransferError;
use crate::models::{DEFAULT_MIME_TYPE, UploadRequest};
use std::path::Path;
use tracing::{debug, error};

/// Open a local file as an upload request.
///
/// The display name is the file's own name. Unless `mime_type` is given it is
/// guessed from the extension, falling back to `audio/mpeg`.
pub async fn open_file(path: &Path, mime_type: Option<&str>) -> Result<UploadRequest, TransferError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            TransferError::InvalidRequest(format!("{} has no usable file name", path.display()))
        })?
        .to_string();

    let file = tokio::fs::File::open(path)
        .await
        .inspect_err(|error| error!(?path, %error, "Failed to open upload source"))?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(TransferError::InvalidRequest(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let mime_type = match mime_type {
        Some(mime_type) => mime_type.to_string(),
        None => guess_mime_type(path),
    };
    debug!(?path, %file_name, %mime_type, size = metadata.len(), "Opened upload source");

    Ok(UploadRequest::new(file_name, file)
        .with_mime_type(mime_type)
        .with_content_length(metadata.len()))
}

fn guess_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

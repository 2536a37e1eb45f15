use url::Url;

use crate::error::TransferError;

/// Turn the server's `download_url` into the absolute URL to fetch.
///
/// An absolute http(s) URL is used unmodified. Anything else is a path under
/// `base_url` and is appended to it exactly once, keeping any path prefix the
/// base carries. Empty values and absolute URLs with other schemes are
/// rejected.
pub fn resolve_download_url(base_url: &Url, download_url: &str) -> Result<Url, TransferError> {
    let download_url = download_url.trim();
    if download_url.is_empty() {
        return Err(TransferError::ResponseFormat(
            "download_url is empty".to_string(),
        ));
    }

    if let Ok(absolute) = Url::parse(download_url) {
        return match absolute.scheme() {
            "http" | "https" => Ok(absolute),
            scheme => Err(TransferError::ResponseFormat(format!(
                "download_url has unsupported scheme '{scheme}'"
            ))),
        };
    }

    let joined = format!(
        "{}/{}",
        base_url.as_str().trim_end_matches('/'),
        download_url.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|err| TransferError::ResponseFormat(format!("download_url '{download_url}': {err}")))
}

/// Endpoint URL for `path` under `base_url`, same joining rule as above.
pub(crate) fn endpoint_url(base_url: &Url, path: &str) -> Result<Url, TransferError> {
    let joined = format!(
        "{}/{}",
        base_url.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|err| TransferError::InvalidRequest(format!("{joined}: {err}")))
}

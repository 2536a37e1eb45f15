use crate::error::TransferError;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Honour HTTP(S)_PROXY and friends from the environment.
    pub system_proxy: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            system_proxy: false,
        }
    }
}

/// The one HTTP client every transfer goes through. Cloning is cheap and
/// shares the connection pool; it holds no per-call state.
#[derive(Clone, Debug)]
pub struct Transport {
    client: reqwest::Client,
}

impl Transport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransferError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout);
        if !config.system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder.build().map_err(TransferError::from_transport)?;
        debug!(
            connect_timeout = ?config.connect_timeout,
            read_timeout = ?config.read_timeout,
            system_proxy = config.system_proxy,
            "HTTP transport ready"
        );
        Ok(Self { client })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

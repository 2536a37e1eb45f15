use crate::client::DEFAULT_UPLOAD_PATH;
use crate::transport::TransportConfig;
use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure that can be loaded from CLI, config file, or both
///
/// Example configuration file content
/// # MP3 transfer configuration
///
/// # Server
/// base_url = "http://192.168.1.214:5000"
/// upload_path = "/api/upload"
///
/// # Transport timeouts, seconds
/// connect_timeout_secs = 120
/// read_timeout_secs = 120
/// request_timeout_secs = 600   # Optional: whole-call deadline
///
/// # Local storage
/// output_dir = "./downloads"
/// output_name = "tagged.mp3"   # Optional
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Audio file to upload
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:5000")]
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upload endpoint path under the base URL
    #[arg(long, default_value = DEFAULT_UPLOAD_PATH)]
    #[serde(default = "default_upload_path")]
    pub upload_path: String,

    /// MIME type of the upload (guessed from the extension when omitted)
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Directory downloads are written to
    #[arg(short, long, default_value = "./downloads")]
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// File name of the download (defaults to the uploaded file's name)
    #[arg(short = 'n', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 120)]
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Read timeout in seconds
    #[arg(long, default_value_t = 120)]
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Overall deadline per network call in seconds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Use proxy settings from the environment
    #[arg(long)]
    pub system_proxy: bool,

    /// Configuration file path; its values fill in options left at their defaults
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file: None,
            base_url: default_base_url(),
            upload_path: default_upload_path(),
            mime_type: None,
            output_dir: default_output_dir(),
            output_name: None,
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            request_timeout_secs: None,
            system_proxy: false,
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.base_url == default_base_url() {
            self.base_url = file_config.base_url;
        }
        if self.upload_path == default_upload_path() {
            self.upload_path = file_config.upload_path;
        }
        if self.output_dir == default_output_dir() {
            self.output_dir = file_config.output_dir;
        }
        if self.connect_timeout_secs == default_timeout_secs() {
            self.connect_timeout_secs = file_config.connect_timeout_secs;
        }
        if self.read_timeout_secs == default_timeout_secs() {
            self.read_timeout_secs = file_config.read_timeout_secs;
        }
        self.system_proxy |= file_config.system_proxy;

        // For Option fields, CLI takes precedence if Some
        if self.file.is_none() {
            self.file = file_config.file;
        }
        if self.mime_type.is_none() {
            self.mime_type = file_config.mime_type;
        }
        if self.output_name.is_none() {
            self.output_name = file_config.output_name;
        }
        if self.request_timeout_secs.is_none() {
            self.request_timeout_secs = file_config.request_timeout_secs;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "Base URL must start with http:// or https://"
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|err| anyhow::anyhow!("Invalid base URL {}: {err}", self.base_url))?;

        if !self.upload_path.starts_with('/') {
            return Err(anyhow::anyhow!("Upload path must start with '/'"));
        }

        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Timeouts must be at least one second"));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(anyhow::anyhow!("Request timeout must be at least one second"));
        }

        if let Some(file) = &self.file
            && file.is_empty()
        {
            return Err(anyhow::anyhow!("Upload file path cannot be empty"));
        }

        if let Some(name) = &self.output_name
            && let Err(msg) = crate::storage::validate_destination_name(name)
        {
            return Err(anyhow::anyhow!(msg));
        }

        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            system_proxy: self.system_proxy,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

// Default value functions
fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_upload_path() -> String {
    DEFAULT_UPLOAD_PATH.to_string()
}

fn default_output_dir() -> String {
    "./downloads".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

//! Configuration management for filepush

use crate::error::{Error, Result};
use crate::validation::{MAX_EXPIRY_MINUTES, MAX_FILE_SIZE, MIN_EXPIRY_MINUTES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Default API root of a locally running server
pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";

/// Default base for share links
pub const DEFAULT_VIEW_URL: &str = "http://localhost:3000/view";

/// Default request timeout (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default share lifetime: 24 hours
pub const DEFAULT_EXPIRY_MINUTES: u32 = 24 * 60;

/// Server endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API root that upload/view/delete paths are appended to
    pub api_url: String,

    /// Base URL that share ids are appended to
    pub view_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Upload defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Lifetime requested when none is given, in minutes
    pub default_expiry_minutes: u32,

    /// Client-side size cap in bytes (never above the server's)
    pub max_file_size: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoints
    pub server: ServerConfig,

    /// Upload defaults
    #[serde(default)]
    pub upload: UploadConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            api_url: DEFAULT_API_URL.to_string(),
            view_url: DEFAULT_VIEW_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            default_expiry_minutes: DEFAULT_EXPIRY_MINUTES,
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default config file location: `~/.config/filepush/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("filepush")
            .join("config.json")
    }

    /// Load configuration from a file (YAML or JSON), with environment variable
    /// substitution and overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let content = Self::substitute_env_vars(&content);

        let mut config: ClientConfig = if is_yaml(path_ref) {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse YAML config: {}", e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse JSON config: {}", e))
            })?
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Substitute environment variables in config content
    /// Supports ${VAR_NAME} syntax
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
            Ok(re) => re,
            Err(_) => return result,
        };

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_name = &cap[1];

            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(full_match, &value);
            }
        }

        result
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FILEPUSH_API_URL") {
            let url = url.trim().to_string();
            if !url.is_empty() {
                self.server.api_url = url;
            }
        }

        if let Ok(url) = std::env::var("FILEPUSH_VIEW_URL") {
            let url = url.trim().to_string();
            if !url.is_empty() {
                self.server.view_url = url;
            }
        }

        if let Ok(expiry) = std::env::var("FILEPUSH_DEFAULT_EXPIRY") {
            if let Ok(minutes) = expiry.trim().parse::<u32>() {
                self.upload.default_expiry_minutes = minutes;
            }
        }

        if let Ok(size) = std::env::var("FILEPUSH_MAX_FILE_SIZE") {
            if let Ok(size) = size.trim().parse::<u64>() {
                self.upload.max_file_size = size;
            }
        }
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to YAML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to JSON: {}", e))
            })?
        };

        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path_ref, content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("api_url", &self.server.api_url),
            ("view_url", &self.server.view_url),
        ] {
            let url = Url::parse(value).map_err(|e| {
                Error::InvalidConfig(format!("{} is not a valid URL: {}", name, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::InvalidConfig(format!(
                    "{} must be http or https",
                    name
                )));
            }
            if url.query().is_some() || url.fragment().is_some() {
                return Err(Error::InvalidConfig(format!(
                    "{} must not carry a query or fragment",
                    name
                )));
            }
        }

        if self.server.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if self.upload.max_file_size == 0 || self.upload.max_file_size > MAX_FILE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_file_size must be between 1 and {} bytes",
                MAX_FILE_SIZE
            )));
        }

        if !(MIN_EXPIRY_MINUTES..=MAX_EXPIRY_MINUTES).contains(&self.upload.default_expiry_minutes) {
            return Err(Error::InvalidConfig(format!(
                "default_expiry_minutes must be between {} and {}",
                MIN_EXPIRY_MINUTES, MAX_EXPIRY_MINUTES
            )));
        }

        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

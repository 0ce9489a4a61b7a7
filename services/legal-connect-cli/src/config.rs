//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password is read from LEGAL_CONNECT_PASSWORD or password_file,
//! never from the TOML itself.

use api_client::ClientConfig;
use common::Secret;
use serde::Deserialize;
use session_auth::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when neither --config nor CONFIG_PATH is given
pub const DEFAULT_CONFIG_PATH: &str = "legal-connect.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub credentials: CredentialsConfig,
}

/// Remote API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// Where the session lives and how to log in
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// JSON file holding the access/refresh pair between runs
    pub path: PathBuf,
    /// Default account for `login` when no email is given
    pub email: Option<String>,
    /// Path to a file containing the password (alternative to LEGAL_CONNECT_PASSWORD)
    pub password_file: Option<PathBuf>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("legal-connect-credentials.json"),
            email: None,
            password_file: None,
            password: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.finish()
    }

    /// Defaults plus environment overrides, for running without a config file.
    pub fn from_env() -> common::Result<Self> {
        Config::default().finish()
    }

    /// Load `path` if it exists. A missing file is only an error when the
    /// path was chosen explicitly.
    pub fn load_or_default(path: &Path) -> common::Result<Self> {
        if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
            return Config::from_env();
        }
        Config::load(path)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// The login password, or which settings would have provided it.
    pub fn password(&self) -> common::Result<&Secret<String>> {
        self.credentials.password.as_ref().ok_or_else(|| {
            common::Error::MissingSecret(
                "set LEGAL_CONNECT_PASSWORD or credentials.password_file".into(),
            )
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
        }
    }

    /// Apply env overrides, resolve the password, validate.
    ///
    /// Password resolution order:
    /// 1. LEGAL_CONNECT_PASSWORD env var
    /// 2. password_file path from config
    fn finish(mut self) -> common::Result<Self> {
        if let Ok(url) = std::env::var("LEGAL_CONNECT_API_URL") {
            self.api.base_url = url;
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.credentials.path.as_os_str().is_empty() {
            return Err(common::Error::Config(
                "credentials.path must not be empty".into(),
            ));
        }

        if let Ok(password) = std::env::var("LEGAL_CONNECT_PASSWORD") {
            self.credentials.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = self.credentials.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim_end_matches(['\r', '\n']).to_owned();
            if !password.is_empty() {
                self.credentials.password = Some(Secret::new(password));
            }
        }

        Ok(self)
    }
}

//! Client configuration, optionally loaded from `TDBRIDGE_*` environment variables.

use std::{
    env,
    error::Error,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use sha2::{Digest, Sha256};
use tdbridge_core::ClientError;

use crate::proxy::{ProxyConfig, ProxyKind};

const DEFAULT_FILES_ROOT: &str = "/tmp/.tdlib_files";
const DEFAULT_DEVICE_MODEL: &str = "tdbridge";
const DEFAULT_SYSTEM_VERSION: &str = "unknown";
const DEFAULT_LANGUAGE_CODE: &str = "en";
const DEFAULT_WORKERS: usize = 1;
const DEFAULT_QUEUE_CAPACITY: usize = 1_000;
const DEFAULT_QUEUE_PUT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_AUTH_STEP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CLOSE_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_CLOSE_POLL_ATTEMPTS: u32 = 20;

/// Credential the engine logs in with.
#[derive(Clone, PartialEq, Eq)]
pub enum Identity {
    Phone(String),
    BotToken(String),
}

impl Identity {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Phone(_) => "phone",
            Self::BotToken(_) => "bot_token",
        }
    }

    fn secret(&self) -> &str {
        match self {
            Self::Phone(value) | Self::BotToken(value) => value,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity::{}(<redacted>)", self.kind())
    }
}

/// Everything a client needs besides its engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_id: i64,
    pub api_hash: String,
    pub database_encryption_key: String,
    pub phone: Option<String>,
    pub bot_token: Option<String>,
    /// Engine data root; derived from the identity when `None`.
    pub files_directory: Option<PathBuf>,
    pub use_test_dc: bool,
    pub use_message_database: bool,
    pub use_secret_chats: bool,
    pub device_model: String,
    pub application_version: String,
    pub system_version: String,
    pub system_language_code: String,
    pub proxy: Option<ProxyConfig>,
    /// Dispatch worker threads (at least one).
    pub workers: usize,
    pub queue_capacity: usize,
    /// How long the delivery thread may block on a full dispatch queue.
    pub queue_put_timeout: Duration,
    /// Poll interval handed to `Engine::receive`.
    pub receive_timeout: Duration,
    /// Deadline for each handshake step.
    pub auth_step_timeout: Duration,
    pub close_poll_interval: Duration,
    pub close_poll_attempts: u32,
}

impl ClientConfig {
    pub fn new(
        api_id: i64,
        api_hash: impl Into<String>,
        database_encryption_key: impl Into<String>,
    ) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
            database_encryption_key: database_encryption_key.into(),
            phone: None,
            bot_token: None,
            files_directory: None,
            use_test_dc: false,
            use_message_database: true,
            use_secret_chats: true,
            device_model: DEFAULT_DEVICE_MODEL.to_owned(),
            application_version: env!("CARGO_PKG_VERSION").to_owned(),
            system_version: DEFAULT_SYSTEM_VERSION.to_owned(),
            system_language_code: DEFAULT_LANGUAGE_CODE.to_owned(),
            proxy: None,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_put_timeout: Duration::from_millis(DEFAULT_QUEUE_PUT_TIMEOUT_MS),
            receive_timeout: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS),
            auth_step_timeout: Duration::from_millis(DEFAULT_AUTH_STEP_TIMEOUT_MS),
            close_poll_interval: Duration::from_millis(DEFAULT_CLOSE_POLL_INTERVAL_MS),
            close_poll_attempts: DEFAULT_CLOSE_POLL_ATTEMPTS,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_bot_token(mut self, token: impl Into<String>) -> Self {
        self.bot_token = Some(token.into());
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_id = parse_optional::<i64, _>("TDBRIDGE_API_ID", &mut lookup)?
            .ok_or(ConfigError::Missing {
                key: "TDBRIDGE_API_ID",
            })?;
        let api_hash = optional_trimmed_env("TDBRIDGE_API_HASH", &mut lookup).ok_or(
            ConfigError::Missing {
                key: "TDBRIDGE_API_HASH",
            },
        )?;
        let encryption_key = optional_trimmed_env("TDBRIDGE_ENCRYPTION_KEY", &mut lookup)
            .ok_or(ConfigError::Missing {
                key: "TDBRIDGE_ENCRYPTION_KEY",
            })?;

        let mut config = Self::new(api_id, api_hash, encryption_key);
        config.phone = optional_trimmed_env("TDBRIDGE_PHONE", &mut lookup);
        config.bot_token = optional_trimmed_env("TDBRIDGE_BOT_TOKEN", &mut lookup);
        config.files_directory =
            optional_trimmed_env("TDBRIDGE_FILES_DIR", &mut lookup).map(PathBuf::from);
        config.use_test_dc = parse_optional("TDBRIDGE_USE_TEST_DC", &mut lookup)?.unwrap_or(false);

        if let Some(model) = optional_trimmed_env("TDBRIDGE_DEVICE_MODEL", &mut lookup) {
            config.device_model = model;
        }
        if let Some(language) = optional_trimmed_env("TDBRIDGE_LANGUAGE_CODE", &mut lookup) {
            config.system_language_code = language;
        }

        config.workers =
            parse_optional("TDBRIDGE_WORKERS", &mut lookup)?.unwrap_or(DEFAULT_WORKERS);
        config.queue_capacity = parse_optional("TDBRIDGE_QUEUE_CAPACITY", &mut lookup)?
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        config.queue_put_timeout = parse_millis(
            "TDBRIDGE_QUEUE_PUT_TIMEOUT_MS",
            DEFAULT_QUEUE_PUT_TIMEOUT_MS,
            &mut lookup,
        )?;
        config.receive_timeout = parse_millis(
            "TDBRIDGE_RECEIVE_TIMEOUT_MS",
            DEFAULT_RECEIVE_TIMEOUT_MS,
            &mut lookup,
        )?;
        config.auth_step_timeout = parse_millis(
            "TDBRIDGE_AUTH_STEP_TIMEOUT_MS",
            DEFAULT_AUTH_STEP_TIMEOUT_MS,
            &mut lookup,
        )?;

        if config.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TDBRIDGE_WORKERS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if config.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TDBRIDGE_QUEUE_CAPACITY",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        config.proxy = proxy_from_lookup(&mut lookup)?;
        Ok(config)
    }

    /// Resolve the login credential; phone wins when both are present.
    pub fn identity(&self) -> Result<Identity, ClientError> {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };

        if let Some(phone) = non_empty(&self.phone) {
            return Ok(Identity::Phone(phone));
        }
        if let Some(token) = non_empty(&self.bot_token) {
            return Ok(Identity::BotToken(token));
        }
        Err(ClientError::config(
            "missing_identity",
            "either a phone number or a bot token must be configured",
        ))
    }

    /// Engine data root for `identity`.
    pub fn files_directory_for(&self, identity: &Identity) -> PathBuf {
        self.files_directory
            .clone()
            .unwrap_or_else(|| default_files_directory(Path::new(DEFAULT_FILES_ROOT), identity))
    }
}

/// Errors produced while parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is absent or blank.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "missing required {key}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::config("invalid_config", err.to_string())
    }
}

fn proxy_from_lookup<F>(lookup: &mut F) -> Result<Option<ProxyConfig>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(server) = optional_trimmed_env("TDBRIDGE_PROXY_SERVER", lookup) else {
        return Ok(None);
    };
    let port = parse_optional::<u16, _>("TDBRIDGE_PROXY_PORT", lookup)?.ok_or(
        ConfigError::Missing {
            key: "TDBRIDGE_PROXY_PORT",
        },
    )?;
    let kind_name = optional_trimmed_env("TDBRIDGE_PROXY_TYPE", lookup)
        .unwrap_or_else(|| "socks5".to_owned());
    let mut credential =
        |key: &'static str| optional_trimmed_env(key, lookup).unwrap_or_default();

    let kind = match kind_name.to_ascii_lowercase().as_str() {
        "mtproto" => ProxyKind::MtProto {
            secret: credential("TDBRIDGE_PROXY_SECRET"),
        },
        "socks5" => ProxyKind::Socks5 {
            username: credential("TDBRIDGE_PROXY_USERNAME"),
            password: credential("TDBRIDGE_PROXY_PASSWORD"),
        },
        "http" => ProxyKind::Http {
            username: credential("TDBRIDGE_PROXY_USERNAME"),
            password: credential("TDBRIDGE_PROXY_PASSWORD"),
        },
        _ => {
            return Err(ConfigError::InvalidValue {
                key: "TDBRIDGE_PROXY_TYPE",
                value: kind_name,
                reason: "expected one of mtproto, socks5, http".to_owned(),
            });
        }
    };

    Ok(Some(ProxyConfig::new(server, port, kind)))
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_millis<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<Duration, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    Ok(Duration::from_millis(
        parse_optional::<u64, _>(key, lookup)?.unwrap_or(default),
    ))
}

fn default_files_directory(root: &Path, identity: &Identity) -> PathBuf {
    let digest = Sha256::digest(identity.secret().as_bytes());
    let name: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    root.join(name)
}

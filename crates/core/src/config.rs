use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub crm: CrmConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub base_url: String,
    pub api_version: String,
    pub token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub http_timeout_secs: u64,
    pub token_refresh_buffer_secs: i64,
    pub sync_max_attempts: u32,
    pub sync_base_delay_ms: u64,
}

impl CrmConfig {
    /// OAuth refresh is configured only when both client credentials are
    /// present; otherwise the engine runs in private-token/stale-token
    /// mode.
    pub fn refresh_enabled(&self) -> bool {
        self.client_id.as_deref().is_some_and(|id| !id.trim().is_empty())
            && self
                .client_secret
                .as_ref()
                .is_some_and(|secret| !secret.expose_secret().trim().is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub crm_base_url: Option<String>,
    pub crm_token_url: Option<String>,
    pub crm_client_id: Option<String>,
    pub crm_client_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://onboardly.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            crm: CrmConfig {
                base_url: "https://services.leadconnectorhq.com".to_string(),
                api_version: "2021-07-28".to_string(),
                token_url: "https://services.leadconnectorhq.com/oauth/token".to_string(),
                client_id: None,
                client_secret: None,
                http_timeout_secs: 30,
                token_refresh_buffer_secs: 180,
                sync_max_attempts: 3,
                sync_base_delay_ms: 500,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("onboardly.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = base_url;
            }
            if let Some(api_version) = crm.api_version {
                self.crm.api_version = api_version;
            }
            if let Some(token_url) = crm.token_url {
                self.crm.token_url = token_url;
            }
            if let Some(client_id) = crm.client_id {
                self.crm.client_id = Some(client_id);
            }
            if let Some(client_secret_value) = crm.client_secret {
                self.crm.client_secret = Some(secret_value(client_secret_value));
            }
            if let Some(http_timeout_secs) = crm.http_timeout_secs {
                self.crm.http_timeout_secs = http_timeout_secs;
            }
            if let Some(buffer) = crm.token_refresh_buffer_secs {
                self.crm.token_refresh_buffer_secs = buffer;
            }
            if let Some(attempts) = crm.sync_max_attempts {
                self.crm.sync_max_attempts = attempts;
            }
            if let Some(delay) = crm.sync_base_delay_ms {
                self.crm.sync_base_delay_ms = delay;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ONBOARDLY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ONBOARDLY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("ONBOARDLY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ONBOARDLY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("ONBOARDLY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ONBOARDLY_CRM_BASE_URL") {
            self.crm.base_url = value;
        }
        if let Some(value) = read_env("ONBOARDLY_CRM_API_VERSION") {
            self.crm.api_version = value;
        }
        if let Some(value) = read_env("ONBOARDLY_CRM_TOKEN_URL") {
            self.crm.token_url = value;
        }
        if let Some(value) = read_env("ONBOARDLY_CRM_CLIENT_ID") {
            self.crm.client_id = Some(value);
        }
        if let Some(value) = read_env("ONBOARDLY_CRM_CLIENT_SECRET") {
            self.crm.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("ONBOARDLY_CRM_HTTP_TIMEOUT_SECS") {
            self.crm.http_timeout_secs = parse_u64("ONBOARDLY_CRM_HTTP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ONBOARDLY_CRM_TOKEN_REFRESH_BUFFER_SECS") {
            self.crm.token_refresh_buffer_secs =
                parse_i64("ONBOARDLY_CRM_TOKEN_REFRESH_BUFFER_SECS", &value)?;
        }
        if let Some(value) = read_env("ONBOARDLY_CRM_SYNC_MAX_ATTEMPTS") {
            self.crm.sync_max_attempts = parse_u32("ONBOARDLY_CRM_SYNC_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("ONBOARDLY_CRM_SYNC_BASE_DELAY_MS") {
            self.crm.sync_base_delay_ms = parse_u64("ONBOARDLY_CRM_SYNC_BASE_DELAY_MS", &value)?;
        }

        let log_level =
            read_env("ONBOARDLY_LOGGING_LEVEL").or_else(|| read_env("ONBOARDLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ONBOARDLY_LOGGING_FORMAT").or_else(|| read_env("ONBOARDLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = base_url;
        }
        if let Some(token_url) = overrides.crm_token_url {
            self.crm.token_url = token_url;
        }
        if let Some(client_id) = overrides.crm_client_id {
            self.crm.client_id = Some(client_id);
        }
        if let Some(client_secret) = overrides.crm_client_secret {
            self.crm.client_secret = Some(secret_value(client_secret));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_crm(&self.crm)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("onboardly.toml"), PathBuf::from("config/onboardly.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    for (key, url) in [("crm.base_url", &crm.base_url), ("crm.token_url", &crm.token_url)] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    if crm.api_version.trim().is_empty() {
        return Err(ConfigError::Validation("crm.api_version must not be empty".to_string()));
    }

    if crm.http_timeout_secs == 0 || crm.http_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "crm.http_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if crm.token_refresh_buffer_secs < 0 {
        return Err(ConfigError::Validation(
            "crm.token_refresh_buffer_secs must not be negative".to_string(),
        ));
    }

    if crm.sync_max_attempts == 0 {
        return Err(ConfigError::Validation(
            "crm.sync_max_attempts must be greater than zero".to_string(),
        ));
    }

    // Half-configured refresh credentials are a deployment mistake worth
    // failing loudly on; fully absent credentials just disable refresh.
    let has_id = crm.client_id.as_deref().is_some_and(|id| !id.trim().is_empty());
    let has_secret = crm
        .client_secret
        .as_ref()
        .is_some_and(|secret| !secret.expose_secret().trim().is_empty());
    if has_id != has_secret {
        return Err(ConfigError::Validation(
            "crm.client_id and crm.client_secret must be configured together".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    crm: Option<CrmPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    base_url: Option<String>,
    api_version: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    http_timeout_secs: Option<u64>,
    token_refresh_buffer_secs: Option<i64>,
    sync_max_attempts: Option<u32>,
    sync_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

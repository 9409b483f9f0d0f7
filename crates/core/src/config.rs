use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::{DeliveryPolicy, DEFAULT_SUBSCRIPTION};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub callback: CallbackConfig,
    pub bus: BusConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub signing_secret: SecretString,
    /// Honour `X-Test-Mode: true` and skip signature verification.
    pub allow_test_mode: bool,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CallbackConfig {
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BusConfig {
    pub backend: BusBackend,
    pub subscriptions: Vec<String>,
    pub max_attempts: u32,
    pub ack_deadline_secs: u64,
    pub retry_base_delay_secs: u64,
    pub retry_backoff_multiplier: u32,
    pub retry_max_delay_secs: u64,
    pub max_in_flight: usize,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub command_path: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    Sqlite,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub bus_backend: Option<BusBackend>,
    pub server_port: Option<u16>,
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
                url: "sqlite://oi.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig { signing_secret: String::new().into(), allow_test_mode: false },
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-3.5-turbo".to_string(),
                timeout_secs: 60,
            },
            callback: CallbackConfig { timeout_secs: 60 },
            bus: BusConfig {
                backend: BusBackend::Sqlite,
                subscriptions: vec![DEFAULT_SUBSCRIPTION.to_string()],
                max_attempts: 5,
                ack_deadline_secs: 300,
                retry_base_delay_secs: 5,
                retry_backoff_multiplier: 2,
                retry_max_delay_secs: 600,
                max_in_flight: 16,
                poll_interval_ms: 500,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                command_path: "/oi".to_string(),
                health_check_port: 8081,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for BusBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported bus backend `{other}` (expected sqlite|memory)"
            ))),
        }
    }
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

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

impl BusConfig {
    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts: self.max_attempts,
            ack_deadline_seconds: to_seconds(self.ack_deadline_secs),
            retry_base_delay_seconds: to_seconds(self.retry_base_delay_secs),
            retry_backoff_multiplier: self.retry_backoff_multiplier,
            retry_max_delay_seconds: to_seconds(self.retry_max_delay_secs),
        }
    }
}

fn to_seconds(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("oi.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            merge(&mut self.database.url, database.url);
            merge(&mut self.database.max_connections, database.max_connections);
            merge(&mut self.database.timeout_secs, database.timeout_secs);
        }

        if let Some(slack) = patch.slack {
            merge(&mut self.slack.signing_secret, slack.signing_secret.map(secret_value));
            merge(&mut self.slack.allow_test_mode, slack.allow_test_mode);
        }

        if let Some(llm) = patch.llm {
            merge(&mut self.llm.provider, llm.provider);
            merge(&mut self.llm.api_key, llm.api_key.map(|key| Some(secret_value(key))));
            merge(&mut self.llm.base_url, llm.base_url.map(Some));
            merge(&mut self.llm.model, llm.model);
            merge(&mut self.llm.timeout_secs, llm.timeout_secs);
        }

        if let Some(callback) = patch.callback {
            merge(&mut self.callback.timeout_secs, callback.timeout_secs);
        }

        if let Some(bus) = patch.bus {
            merge(&mut self.bus.backend, bus.backend);
            merge(&mut self.bus.subscriptions, bus.subscriptions);
            merge(&mut self.bus.max_attempts, bus.max_attempts);
            merge(&mut self.bus.ack_deadline_secs, bus.ack_deadline_secs);
            merge(&mut self.bus.retry_base_delay_secs, bus.retry_base_delay_secs);
            merge(&mut self.bus.retry_backoff_multiplier, bus.retry_backoff_multiplier);
            merge(&mut self.bus.retry_max_delay_secs, bus.retry_max_delay_secs);
            merge(&mut self.bus.max_in_flight, bus.max_in_flight);
            merge(&mut self.bus.poll_interval_ms, bus.poll_interval_ms);
        }

        if let Some(server) = patch.server {
            merge(&mut self.server.bind_address, server.bind_address);
            merge(&mut self.server.port, server.port);
            merge(&mut self.server.command_path, server.command_path);
            merge(&mut self.server.health_check_port, server.health_check_port);
            merge(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }

        if let Some(logging) = patch.logging {
            merge(&mut self.logging.level, logging.level);
            merge(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        merge(&mut self.database.url, read_env("OI_DATABASE_URL"));
        merge(&mut self.database.max_connections, env_parsed("OI_DATABASE_MAX_CONNECTIONS")?);
        merge(&mut self.database.timeout_secs, env_parsed("OI_DATABASE_TIMEOUT_SECS")?);

        merge(&mut self.slack.signing_secret, read_env("OI_SLACK_SIGNING_SECRET").map(secret_value));
        merge(&mut self.slack.allow_test_mode, env_flag("OI_SLACK_ALLOW_TEST_MODE")?);

        if let Some(value) = read_env("OI_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        merge(&mut self.llm.api_key, read_env("OI_LLM_API_KEY").map(|key| Some(secret_value(key))));
        merge(&mut self.llm.base_url, read_env("OI_LLM_BASE_URL").map(Some));
        merge(&mut self.llm.model, read_env("OI_LLM_MODEL"));
        merge(&mut self.llm.timeout_secs, env_parsed("OI_LLM_TIMEOUT_SECS")?);

        merge(&mut self.callback.timeout_secs, env_parsed("OI_CALLBACK_TIMEOUT_SECS")?);

        if let Some(value) = read_env("OI_BUS_BACKEND") {
            self.bus.backend = value.parse()?;
        }
        merge(
            &mut self.bus.subscriptions,
            read_env("OI_BUS_SUBSCRIPTIONS").map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
        );
        merge(&mut self.bus.max_attempts, env_parsed("OI_BUS_MAX_ATTEMPTS")?);
        merge(&mut self.bus.ack_deadline_secs, env_parsed("OI_BUS_ACK_DEADLINE_SECS")?);
        merge(&mut self.bus.retry_base_delay_secs, env_parsed("OI_BUS_RETRY_BASE_DELAY_SECS")?);
        merge(
            &mut self.bus.retry_backoff_multiplier,
            env_parsed("OI_BUS_RETRY_BACKOFF_MULTIPLIER")?,
        );
        merge(&mut self.bus.retry_max_delay_secs, env_parsed("OI_BUS_RETRY_MAX_DELAY_SECS")?);
        merge(&mut self.bus.max_in_flight, env_parsed("OI_BUS_MAX_IN_FLIGHT")?);
        merge(&mut self.bus.poll_interval_ms, env_parsed("OI_BUS_POLL_INTERVAL_MS")?);

        merge(&mut self.server.bind_address, read_env("OI_SERVER_BIND_ADDRESS"));
        merge(&mut self.server.port, env_parsed("OI_SERVER_PORT")?);
        merge(&mut self.server.command_path, read_env("OI_SERVER_COMMAND_PATH"));
        merge(&mut self.server.health_check_port, env_parsed("OI_SERVER_HEALTH_CHECK_PORT")?);
        merge(
            &mut self.server.graceful_shutdown_secs,
            env_parsed("OI_SERVER_GRACEFUL_SHUTDOWN_SECS")?,
        );

        merge(
            &mut self.logging.level,
            read_env("OI_LOGGING_LEVEL").or_else(|| read_env("OI_LOG_LEVEL")),
        );
        if let Some(value) = read_env("OI_LOGGING_FORMAT").or_else(|| read_env("OI_LOG_FORMAT")) {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        merge(&mut self.database.url, overrides.database_url);
        merge(&mut self.logging.level, overrides.log_level);
        merge(&mut self.llm.provider, overrides.llm_provider);
        merge(&mut self.llm.model, overrides.llm_model);
        merge(&mut self.slack.signing_secret, overrides.slack_signing_secret.map(secret_value));
        merge(&mut self.bus.backend, overrides.bus_backend);
        merge(&mut self.server.port, overrides.server_port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_llm(&self.llm)?;
        validate_callback(&self.callback)?;
        validate_bus(&self.bus)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("oi.toml"), PathBuf::from("config/oi.toml")]
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

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    if slack.allow_test_mode {
        return Ok(());
    }

    if slack.signing_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.signing_secret is required unless slack.allow_test_mode is enabled. Get it from https://api.slack.com/apps > Your App > Basic Information > Signing Secret".to_string()
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    let base_url = llm.effective_base_url();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_callback(callback: &CallbackConfig) -> Result<(), ConfigError> {
    if callback.timeout_secs == 0 || callback.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "callback.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

/// Upper bound for bus deadlines and retry delays (one day).
const MAX_BUS_DELAY_SECS: u64 = 86_400;

fn validate_bus(bus: &BusConfig) -> Result<(), ConfigError> {
    if bus.subscriptions.is_empty()
        || bus.subscriptions.iter().any(|name| name.trim().is_empty())
    {
        return Err(ConfigError::Validation(
            "bus.subscriptions must name at least one non-empty subscription".to_string(),
        ));
    }

    if bus.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "bus.max_attempts must be greater than zero".to_string(),
        ));
    }

    if bus.ack_deadline_secs == 0 || bus.ack_deadline_secs > MAX_BUS_DELAY_SECS {
        return Err(ConfigError::Validation(format!(
            "bus.ack_deadline_secs must be in range 1..={MAX_BUS_DELAY_SECS}"
        )));
    }

    for (key, value) in [
        ("bus.retry_base_delay_secs", bus.retry_base_delay_secs),
        ("bus.retry_max_delay_secs", bus.retry_max_delay_secs),
    ] {
        if value > MAX_BUS_DELAY_SECS {
            return Err(ConfigError::Validation(format!(
                "{key} must be at most {MAX_BUS_DELAY_SECS}"
            )));
        }
    }

    if bus.retry_backoff_multiplier == 0 {
        return Err(ConfigError::Validation(
            "bus.retry_backoff_multiplier must be greater than zero".to_string(),
        ));
    }

    if bus.retry_max_delay_secs < bus.retry_base_delay_secs {
        return Err(ConfigError::Validation(
            "bus.retry_max_delay_secs must be at least bus.retry_base_delay_secs".to_string(),
        ));
    }

    if bus.max_in_flight == 0 {
        return Err(ConfigError::Validation(
            "bus.max_in_flight must be greater than zero".to_string(),
        ));
    }

    if bus.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "bus.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.health_check_port == server.port {
        return Err(ConfigError::Validation(
            "server.health_check_port must differ from server.port".to_string(),
        ));
    }

    if !server.command_path.starts_with('/') || server.command_path.len() < 2 {
        return Err(ConfigError::Validation(
            "server.command_path must be an absolute path such as `/oi`".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

/// Environment value parsed as `T`; a value that does not parse is an error
/// rather than being ignored.
fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    read_env(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value })
        })
        .transpose()
}

fn env_flag(key: &str) -> Result<Option<bool>, ConfigError> {
    read_env(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value }),
        })
        .transpose()
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    llm: Option<LlmPatch>,
    callback: Option<CallbackPatch>,
    bus: Option<BusPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    signing_secret: Option<String>,
    allow_test_mode: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CallbackPatch {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BusPatch {
    backend: Option<BusBackend>,
    subscriptions: Option<Vec<String>>,
    max_attempts: Option<u32>,
    ack_deadline_secs: Option<u64>,
    retry_base_delay_secs: Option<u64>,
    retry_backoff_multiplier: Option<u32>,
    retry_max_delay_secs: Option<u64>,
    max_in_flight: Option<usize>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    command_path: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

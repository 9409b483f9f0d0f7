use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use oi_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// One effective setting and the environment variables that can supply it.
struct Entry {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Entry {
    fn new(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.to_string(), env_keys }
    }
}

pub fn run() -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("config", error_class, message, exit_code);
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", entry.key, entry.value));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    vec![
        Entry::new("database.url", &config.database.url, &["OI_DATABASE_URL"]),
        Entry::new(
            "database.max_connections",
            config.database.max_connections,
            &["OI_DATABASE_MAX_CONNECTIONS"],
        ),
        Entry::new("database.timeout_secs", config.database.timeout_secs, &["OI_DATABASE_TIMEOUT_SECS"]),
        Entry::new(
            "slack.signing_secret",
            redact_secret(Some(&config.slack.signing_secret)),
            &["OI_SLACK_SIGNING_SECRET"],
        ),
        Entry::new(
            "slack.allow_test_mode",
            config.slack.allow_test_mode,
            &["OI_SLACK_ALLOW_TEST_MODE"],
        ),
        Entry::new("llm.provider", config.llm.provider.as_str(), &["OI_LLM_PROVIDER"]),
        Entry::new("llm.model", &config.llm.model, &["OI_LLM_MODEL"]),
        Entry::new("llm.base_url", config.llm.effective_base_url(), &["OI_LLM_BASE_URL"]),
        Entry::new("llm.api_key", redact_secret(config.llm.api_key.as_ref()), &["OI_LLM_API_KEY"]),
        Entry::new("llm.timeout_secs", config.llm.timeout_secs, &["OI_LLM_TIMEOUT_SECS"]),
        Entry::new("callback.timeout_secs", config.callback.timeout_secs, &["OI_CALLBACK_TIMEOUT_SECS"]),
        Entry::new("bus.backend", format!("{:?}", config.bus.backend).to_lowercase(), &["OI_BUS_BACKEND"]),
        Entry::new("bus.subscriptions", config.bus.subscriptions.join(","), &["OI_BUS_SUBSCRIPTIONS"]),
        Entry::new("bus.max_attempts", config.bus.max_attempts, &["OI_BUS_MAX_ATTEMPTS"]),
        Entry::new("bus.ack_deadline_secs", config.bus.ack_deadline_secs, &["OI_BUS_ACK_DEADLINE_SECS"]),
        Entry::new(
            "bus.retry_base_delay_secs",
            config.bus.retry_base_delay_secs,
            &["OI_BUS_RETRY_BASE_DELAY_SECS"],
        ),
        Entry::new(
            "bus.retry_backoff_multiplier",
            config.bus.retry_backoff_multiplier,
            &["OI_BUS_RETRY_BACKOFF_MULTIPLIER"],
        ),
        Entry::new(
            "bus.retry_max_delay_secs",
            config.bus.retry_max_delay_secs,
            &["OI_BUS_RETRY_MAX_DELAY_SECS"],
        ),
        Entry::new("bus.max_in_flight", config.bus.max_in_flight, &["OI_BUS_MAX_IN_FLIGHT"]),
        Entry::new("bus.poll_interval_ms", config.bus.poll_interval_ms, &["OI_BUS_POLL_INTERVAL_MS"]),
        Entry::new("server.bind_address", &config.server.bind_address, &["OI_SERVER_BIND_ADDRESS"]),
        Entry::new("server.port", config.server.port, &["OI_SERVER_PORT"]),
        Entry::new("server.command_path", &config.server.command_path, &["OI_SERVER_COMMAND_PATH"]),
        Entry::new(
            "server.health_check_port",
            config.server.health_check_port,
            &["OI_SERVER_HEALTH_CHECK_PORT"],
        ),
        Entry::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["OI_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Entry::new("logging.level", &config.logging.level, &["OI_LOGGING_LEVEL", "OI_LOG_LEVEL"]),
        Entry::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["OI_LOGGING_FORMAT", "OI_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("oi.toml"), PathBuf::from("config/oi.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        None => "<unset>",
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>",
        Some(_) => "<redacted>",
    }
}

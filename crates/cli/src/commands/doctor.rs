use oi_core::bus::BusAdmin;
use oi_core::config::{AppConfig, BusBackend, LlmProvider};
use oi_db::{ping, SqlEventBus};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{load_config, open_pool, runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const SIGNING_SECRET: &str = "slack_signing_secret";
const LLM_CREDENTIALS: &str = "llm_credentials";
const DATABASE: &str = "database_connectivity";
const BUS_STORAGE: &str = "bus_storage";

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        return CommandResult::report(exit_code, &report);
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match load_config() {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_signing_secret(&config));
            checks.push(check_llm_credentials(&config));
            checks.extend(check_storage(&config));
        }
        Err((_, message, _)) => {
            checks.push(DoctorCheck::fail("config_validation", message));
            for name in [SIGNING_SECRET, LLM_CREDENTIALS, DATABASE, BUS_STORAGE] {
                checks.push(DoctorCheck::skipped(name));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let (overall_status, summary) = if failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_signing_secret(config: &AppConfig) -> DoctorCheck {
    let configured = !config.slack.signing_secret.expose_secret().trim().is_empty();
    match (configured, config.slack.allow_test_mode) {
        (true, false) => DoctorCheck::pass(SIGNING_SECRET, "signing secret configured"),
        (true, true) => DoctorCheck::pass(
            SIGNING_SECRET,
            "signing secret configured; X-Test-Mode requests bypass verification",
        ),
        (false, true) => DoctorCheck::pass(
            SIGNING_SECRET,
            "no signing secret; only X-Test-Mode requests will be accepted",
        ),
        (false, false) => DoctorCheck::fail(SIGNING_SECRET, "slack.signing_secret is empty"),
    }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    let has_key = config
        .llm
        .api_key
        .as_ref()
        .is_some_and(|key| !key.expose_secret().trim().is_empty());
    let target = format!(
        "{} model `{}` at {}",
        config.llm.provider.as_str(),
        config.llm.model,
        config.llm.effective_base_url()
    );

    match (config.llm.provider, has_key) {
        (LlmProvider::Ollama, _) | (_, true) => DoctorCheck::pass(LLM_CREDENTIALS, target),
        (_, false) => DoctorCheck::fail(LLM_CREDENTIALS, format!("{target} requires llm.api_key")),
    }
}

fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err((_, message, _)) => {
            return vec![DoctorCheck::fail(DATABASE, message.clone()), DoctorCheck::fail(BUS_STORAGE, message)];
        }
    };

    runtime.block_on(async {
        let pool = match open_pool(config).await {
            Ok(pool) => pool,
            Err((_, message, _)) => {
                return vec![
                    DoctorCheck::fail(DATABASE, message),
                    DoctorCheck::fail(BUS_STORAGE, "database unavailable"),
                ];
            }
        };

        let database = match ping(&pool).await {
            Ok(()) => DoctorCheck::pass(DATABASE, format!("connected using `{}`", config.database.url)),
            Err(error) => DoctorCheck::fail(DATABASE, format!("database query failed: {error}")),
        };

        let bus = match config.bus.backend {
            BusBackend::Memory => DoctorCheck::pass(
                BUS_STORAGE,
                "memory backend; deliveries do not survive restarts",
            ),
            BusBackend::Sqlite => {
                let bus = SqlEventBus::new(
                    pool.clone(),
                    config.bus.delivery_policy(),
                    config.bus.subscriptions.clone(),
                );
                let mut backlogs = Vec::new();
                let mut failure = None;
                for subscription in &config.bus.subscriptions {
                    match bus.backlog(subscription).await {
                        Ok(backlog) => backlogs.push(format!("{subscription}={backlog}")),
                        Err(error) => {
                            failure = Some(format!(
                                "backlog query failed for `{subscription}` (run `oi migrate`?): {error}"
                            ));
                            break;
                        }
                    }
                }
                match failure {
                    Some(details) => DoctorCheck::fail(BUS_STORAGE, details),
                    None => DoctorCheck::pass(BUS_STORAGE, format!("backlog {}", backlogs.join(", "))),
                }
            }
        };

        pool.close().await;
        vec![database, bus]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

use callflow_core::config::{AppConfig, LlmProvider, LoadOptions};
use callflow_db::{connect_with_settings, ping};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::commands::{runtime, CommandResult};

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

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let mut checks = vec![DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            }];
            checks.extend(credential_checks(&config));
            checks.push(check_database_connectivity(&config));
            checks
        }
        Err(error) => {
            let mut checks = vec![DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            }];
            for name in [
                "transcription_credentials",
                "llm_credentials",
                "notification_readiness",
                "database_connectivity",
            ] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
            checks
        }
    };

    summarize(checks)
}

fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let healthy = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn credential_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    vec![
        check_transcription(config),
        check_llm(config),
        check_notification(config),
    ]
}

fn has_secret(secret: Option<&SecretString>) -> bool {
    secret.is_some_and(|secret| !secret.expose_secret().trim().is_empty())
}

fn check_transcription(config: &AppConfig) -> DoctorCheck {
    if has_secret(config.transcription.api_key.as_ref()) {
        DoctorCheck {
            name: "transcription_credentials",
            status: CheckStatus::Pass,
            details: format!("api key present for `{}`", config.transcription.base_url),
        }
    } else {
        DoctorCheck {
            name: "transcription_credentials",
            status: CheckStatus::Fail,
            details: "transcription.api_key is not set; the server will refuse to start"
                .to_string(),
        }
    }
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    match config.llm.provider {
        LlmProvider::Ollama => DoctorCheck {
            name: "llm_credentials",
            status: CheckStatus::Pass,
            details: format!("local provider, model `{}` needs no api key", config.llm.model),
        },
        LlmProvider::OpenAi if has_secret(config.llm.api_key.as_ref()) => DoctorCheck {
            name: "llm_credentials",
            status: CheckStatus::Pass,
            details: format!("api key present for model `{}`", config.llm.model),
        },
        LlmProvider::OpenAi => DoctorCheck {
            name: "llm_credentials",
            status: CheckStatus::Fail,
            details: "llm.api_key is required for the openai provider".to_string(),
        },
    }
}

fn check_notification(config: &AppConfig) -> DoctorCheck {
    let notification = &config.notification;
    if !notification.enabled {
        return DoctorCheck {
            name: "notification_readiness",
            status: CheckStatus::Skipped,
            details: "notifications disabled; lead summaries are logged only".to_string(),
        };
    }
    if notification.account_sid.is_none() || !has_secret(notification.auth_token.as_ref()) {
        return DoctorCheck {
            name: "notification_readiness",
            status: CheckStatus::Fail,
            details: "notification.account_sid and notification.auth_token are required"
                .to_string(),
        };
    }
    if !notification.number_map_path.exists() {
        return DoctorCheck {
            name: "notification_readiness",
            status: CheckStatus::Fail,
            details: format!(
                "number map `{}` does not exist",
                notification.number_map_path.display()
            ),
        };
    }
    DoctorCheck {
        name: "notification_readiness",
        status: CheckStatus::Pass,
        details: format!("number map `{}` found", notification.number_map_path.display()),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match runtime("doctor") {
        Ok(runtime) => runtime,
        Err(failure) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: failure.output,
            };
        }
    };

    runtime.block_on(database_check(config))
}

async fn database_check(config: &AppConfig) -> DoctorCheck {
    let result = async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let latency = ping(&pool).await.map_err(|error| format!("ping failed: {error}"));
        pool.close().await;
        latency
    }
    .await;

    match result {
        Ok(latency) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!(
                "connected using `{}` ({} ms)",
                config.database.url,
                latency.as_millis()
            ),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

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

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

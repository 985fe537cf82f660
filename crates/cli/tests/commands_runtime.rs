use std::env;
use std::sync::{Mutex, OnceLock};

use callflow_cli::commands::{dead_letters, doctor, migrate};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("CALLFLOW_DATABASE_URL", url.as_str())], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected migrations to apply: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("CALLFLOW_DATABASE_URL", "postgres://localhost/callflow")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn dead_letters_lists_an_empty_store_after_migration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("CALLFLOW_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let result = dead_letters::run(10);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "dead-letters");
        assert_eq!(payload["count"], 0);
        assert_eq!(payload["entries"], Value::Array(Vec::new()));
    });
}

#[test]
fn doctor_fails_without_transcription_credentials() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("CALLFLOW_DATABASE_URL", url.as_str())], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks array");
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("transcription_credentials"), "fail");
        assert_eq!(status_of("database_connectivity"), "pass");
    });
}

#[test]
fn doctor_passes_with_credentials_and_reachable_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(
        &[("CALLFLOW_DATABASE_URL", url.as_str()), ("CALLFLOW_TRANSCRIPTION_API_KEY", "dg-test")],
        || {
            let result = doctor::run(false);
            assert_eq!(result.exit_code, 0, "{}", result.output);
            assert!(result.output.starts_with("doctor: all readiness checks passed"));
            assert!(result.output.contains("- [skip] notification_readiness"));
        },
    );
}

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("callflow.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");
    let keys = [
        "CALLFLOW_DATABASE_URL",
        "CALLFLOW_DATABASE_MAX_CONNECTIONS",
        "CALLFLOW_DATABASE_TIMEOUT_SECS",
        "CALLFLOW_TRANSCRIPTION_API_KEY",
        "CALLFLOW_LLM_PROVIDER",
        "CALLFLOW_LLM_API_KEY",
        "CALLFLOW_LLM_BASE_URL",
        "CALLFLOW_NOTIFICATION_ENABLED",
        "CALLFLOW_TELEPHONY_PROVIDER",
        "CALLFLOW_LOGGING_LEVEL",
        "CALLFLOW_LOG_LEVEL",
    ];
    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();
    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }
    test_fn();
    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

use crate::commands::{runtime, CommandResult};
use callflow_core::config::{AppConfig, LoadOptions};
use callflow_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(apply(&config))
}

pub(crate) async fn apply(config: &AppConfig) -> CommandResult {
    let result = async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    }
    .await;

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use callflow_core::config::AppConfig;

    use super::apply;

    #[tokio::test]
    async fn apply_creates_schema_and_is_repeatable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.database.url =
            format!("sqlite://{}?mode=rwc", dir.path().join("callflow.db").display());

        let first = apply(&config).await;
        let second = apply(&config).await;

        assert_eq!(first.exit_code, 0, "{}", first.output);
        assert_eq!(second.exit_code, 0, "{}", second.output);
    }

    #[tokio::test]
    async fn unreachable_database_is_reported_as_connectivity_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.database.url =
            format!("sqlite://{}?mode=ro", dir.path().join("missing").join("callflow.db").display());
        config.database.timeout_secs = 1;

        let result = apply(&config).await;

        assert_eq!(result.exit_code, 4);
        assert!(result.output.contains("db_connectivity"));
    }
}

use callflow_core::config::{AppConfig, LoadOptions};
use callflow_core::DeadLetterEntry;
use callflow_db::{
    connect_with_settings, DeadLetterRepository, RepositoryError, SqlDeadLetterRepository,
};
use serde::Serialize;

use crate::commands::{runtime, CommandResult};

#[derive(Debug, Serialize)]
struct DeadLetterListing {
    command: &'static str,
    status: &'static str,
    count: usize,
    entries: Vec<DeadLetterEntry>,
}

pub fn run(limit: u32) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "dead-letters",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match runtime("dead-letters") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(list(&config, limit))
}

pub(crate) async fn list(config: &AppConfig, limit: u32) -> CommandResult {
    let pool = match connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    {
        Ok(pool) => pool,
        Err(error) => {
            return CommandResult::failure("dead-letters", "db_connectivity", error.to_string(), 4)
        }
    };

    let entries = SqlDeadLetterRepository::new(pool.clone()).list(limit).await;
    pool.close().await;

    match entries {
        Ok(entries) => {
            let listing = DeadLetterListing {
                command: "dead-letters",
                status: "ok",
                count: entries.len(),
                entries,
            };
            match serde_json::to_string_pretty(&listing) {
                Ok(output) => CommandResult { exit_code: 0, output },
                Err(error) => {
                    CommandResult::failure("dead-letters", "serialization", error.to_string(), 6)
                }
            }
        }
        Err(error @ RepositoryError::Unavailable(_)) => {
            CommandResult::failure("dead-letters", "db_connectivity", error.to_string(), 4)
        }
        Err(error) => CommandResult::failure("dead-letters", "query", error.to_string(), 5),
    }
}

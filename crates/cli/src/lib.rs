pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "callflow",
    about = "Callflow operator CLI",
    long_about = "Apply migrations, check runtime readiness, and inspect failed recording events.",
    after_help = "Examples:\n  callflow migrate\n  callflow doctor --json\n  callflow dead-letters --limit 20"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, collaborator credentials, and session store connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List the most recent dead-lettered recording events, newest first")]
    DeadLetters {
        #[arg(long, default_value_t = 50, help = "Maximum entries to return (capped at 500)")]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::DeadLetters { limit } => commands::dead_letters::run(limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn dead_letters_limit_defaults_to_one_page() {
        let cli = Cli::try_parse_from(["callflow", "dead-letters"]).expect("parse");
        assert!(matches!(cli.command, Command::DeadLetters { limit: 50 }));

        let cli = Cli::try_parse_from(["callflow", "dead-letters", "--limit", "7"]).expect("parse");
        assert!(matches!(cli.command, Command::DeadLetters { limit: 7 }));
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(Cli::try_parse_from(["callflow", "seed"]).is_err());
    }
}

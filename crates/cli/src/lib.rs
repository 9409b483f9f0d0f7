pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "oi",
    about = "Oi operator CLI",
    long_about = "Apply migrations, inspect configuration, check readiness and manage dead-lettered command deliveries.",
    after_help = "Examples:\n  oi doctor --json\n  oi config\n  oi dead-letters --requeue <delivery-id>"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, secret readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List dead-lettered deliveries or requeue one of them")]
    DeadLetters {
        #[arg(long, help = "Subscription to inspect (defaults to the first configured one)")]
        subscription: Option<String>,
        #[arg(long, default_value_t = 50, help = "Maximum number of deliveries to list")]
        limit: u32,
        #[arg(long, value_name = "DELIVERY_ID", help = "Move a dead-lettered delivery back to pending")]
        requeue: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::DeadLetters { subscription, limit, requeue } => match requeue {
            Some(id) => commands::dead_letters::requeue(&id),
            None => commands::dead_letters::list(subscription.as_deref(), limit),
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

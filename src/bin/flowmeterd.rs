//! Thin CLI surface over [`flowmeter_core::control::SessionController`]
//! (spec §6: "a thin CLI surfaces session start/stop/export but is not
//! specified in detail"). Grounded on the teacher pack's `clap::Parser`
//! derive-subcommand idiom (`ox-bin/src/main.rs`).

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use flowmeter_core::config::{Config, EnvSecrets};
use flowmeter_core::control::SessionController;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "flowmeterd", version, about = "Activity capture and interval-summarization daemon")]
struct Cli {
    /// Path to a TOML config file. Defaults to the platform data directory.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Starts a tracked session in the foreground and runs until stopped.
    Start {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        daily_goal: Option<String>,
        #[arg(long)]
        session_id: Option<Uuid>,
        /// Stops automatically after this many seconds (0 = run until killed).
        #[arg(long, default_value_t = 0)]
        run_secs: u64,
    },
    /// Prints the permissions probe result (spec §6 `check_permissions`).
    Permissions,
    /// Exports a session's raw events, AI events, interval summaries, and
    /// optimization summaries as JSON.
    Export {
        #[arg(long)]
        session_id: Uuid,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    flowmeter_core::logging::init(flowmeter_core::logging::LoggingOptions::default());
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let secrets = EnvSecrets::from_env();

    match cli.command {
        Command::Start { user_id, daily_goal, session_id, run_secs } => {
            run_start(config, secrets, user_id, daily_goal, session_id, run_secs)
        }
        Command::Permissions => run_permissions(),
        Command::Export { session_id, config: export_config } => {
            let config = Config::load(export_config.as_deref())?;
            run_export(config, secrets, session_id)
        }
    }
}

fn run_start(
    config: Config,
    secrets: EnvSecrets,
    user_id: String,
    daily_goal: Option<String>,
    session_id: Option<Uuid>,
    run_secs: u64,
) -> anyhow::Result<()> {
    let controller = SessionController::with_default_persistence(config, secrets)?;
    let started = controller.start_session(user_id, daily_goal, session_id)?;
    println!("session {} started at {}", started.session_id, started.started_at);

    if run_secs == 0 {
        println!("running until interrupted (stop with a signal to this process)");
        loop {
            thread::sleep(Duration::from_secs(60));
            if let Some(status) = controller.get_status() {
                println!("{:?}", status);
            } else {
                break;
            }
        }
    } else {
        thread::sleep(Duration::from_secs(run_secs));
    }

    let stopped = controller.stop_session()?;
    println!("session {} stopped at {}", stopped.session_id, stopped.ended_at);
    if let Some(summary) = stopped.final_summary {
        println!("final summary: {} (score {})", summary.summary_text, summary.productivity_score);
    }
    Ok(())
}

fn run_permissions() -> anyhow::Result<()> {
    let status = flowmeter_core::permissions::check_permissions();
    for entry in &status.0 {
        println!("{:<18} granted={:<5} {}", entry.name, entry.granted, entry.description);
    }
    if !status.all_granted() {
        println!("\nsome permissions are missing; run with an elevated grant flow in System Settings.");
    }
    Ok(())
}

fn run_export(config: Config, secrets: EnvSecrets, session_id: Uuid) -> anyhow::Result<()> {
    let controller = SessionController::with_default_persistence(config, secrets)?;
    let bundle = controller.export_session(session_id)?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}

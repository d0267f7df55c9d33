use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::commands::touch::TouchOptions;
use crate::commands::watch::WatchOptions;

#[derive(Parser)]
#[command(name = "timefold")]
#[command(about = "Durable request spool and batch collector for time tracking data", long_about = None)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append an operation request (JSON with a `type` field) to the spool.
    Enqueue {
        request: String,
    },
    /// Record a file-touch event in the raw queue.
    Touch {
        #[arg(long)]
        directory: String,
        #[arg(long)]
        file: String,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Run one processor tick against the spool.
    Drain,
    /// Merge transient batch files into per-day archives.
    Collect,
    /// Run one tick and one collection pass, or loop forever with --daemon.
    Watch {
        #[arg(long, default_value_t = false)]
        once: bool,
        #[arg(long, default_value_t = false)]
        daemon: bool,
    },
    /// Show spool, lock and state information.
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}: {}", report.command, if report.ok { "ok" } else { "issues" });
    for line in &report.details {
        println!("  {line}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Enqueue { request } => commands::enqueue::run(&request)?,
        Command::Touch {
            directory,
            file,
            branch,
        } => commands::touch::run(&TouchOptions {
            directory,
            file,
            branch,
        })?,
        Command::Drain => commands::drain::run()?,
        Command::Collect => commands::collect::run()?,
        Command::Watch { once, daemon } => commands::watch::run(&WatchOptions { once, daemon })?,
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}

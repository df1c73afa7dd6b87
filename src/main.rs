use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;

use railbot::analysis::{textlog, SessionAggregator, SummaryReport};

#[derive(Parser)]
#[command(name = "railbot")]
#[command(version)]
#[command(about = "Session log analysis for the travel-portal login bot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate a JSONL event log into per-group session statistics
    Summary {
        /// Path to the session event log (one JSON record per line)
        log_file: PathBuf,
        /// Emit the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Summarize a plain-text session log (started/ended blocks)
    Sessions {
        /// Path to the plain-text session log
        log_file: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // The only fatal case is an unopenable source; everything inside
            // a readable file degrades to partial statistics.
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Summary { log_file, json } => {
            let aggregator = SessionAggregator::scan_file(&log_file)?;
            if aggregator.skipped_lines() > 0 {
                log::warn!("skipped {} malformed line(s)", aggregator.skipped_lines());
            }
            let report = SummaryReport::from_aggregator(&aggregator);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
        }
        Command::Sessions { log_file } => {
            let sessions = textlog::parse_file(&log_file)?;
            print!("{}", textlog::render_report(&sessions));
        }
    }
    Ok(())
}

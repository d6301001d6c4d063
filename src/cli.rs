//! Command-line consumer of the engine.
//!
//! Each subcommand wires up the same pieces a GUI shell would: load the
//! config, open the history log, run the worker or the undo engine, and
//! print whatever comes out of the event channel.

use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};

use crate::config;
use crate::events::WorkerEvent;
use crate::history::HistoryLog;
use crate::undo::UndoEngine;
use crate::worker::MonitoringWorker;

#[derive(Parser)]
#[command(
    name = "autotidy",
    version,
    about = "Periodic folder monitor that ages out files by rule, with history and undo"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a single scan cycle and exit
    Scan {
        /// Compute and log actions without touching the filesystem
        #[arg(long)]
        dry_run: bool,
    },
    /// Scan on the configured interval until interrupted
    Watch,
    /// List scan runs recorded in the history
    Runs,
    /// Show the most recent history entries
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Undo every reversible action of a run
    Undo { run_id: String },
    /// Delete history entries older than the retention window
    Prune {
        /// Override the configured retention in days
        #[arg(long)]
        days: Option<u32>,
    },
}

pub fn run_cli(command: Command) -> Result<(), String> {
    let data_dir = config::app_data_dir();
    let history = HistoryLog::new(&data_dir);

    match command {
        Command::Scan { dry_run } => {
            let mut app_config = config::load_config();
            if dry_run {
                app_config.settings.dry_run_mode = true;
            }
            let (tx, rx) = channel();
            let worker =
                MonitoringWorker::new(Arc::new(Mutex::new(app_config)), history, tx);
            let processed = worker.run_cycle();
            print_buffered(&rx);
            println!("{processed} file(s) processed");
            Ok(())
        }
        Command::Watch => {
            let app_config = config::load_config();
            let (tx, rx) = channel();
            let worker =
                MonitoringWorker::new(Arc::new(Mutex::new(app_config)), history, tx);
            let handle = std::thread::spawn(move || worker.run());
            for event in rx.iter() {
                print_event(&event);
            }
            handle.join().map_err(|_| "worker thread panicked".to_string())?;
            Ok(())
        }
        Command::Runs => {
            let engine = UndoEngine::new(&history);
            let runs = engine.list_runs().map_err(|e| e.to_string())?;
            if runs.is_empty() {
                println!("No runs recorded.");
            }
            for run in runs {
                println!(
                    "{}  {}  {} action(s)",
                    run.run_id,
                    run.start_time.to_rfc3339(),
                    run.action_count
                );
            }
            Ok(())
        }
        Command::History { limit } => {
            let entries = history.read_entries().map_err(|e| e.to_string())?;
            for entry in entries.iter().rev().take(limit) {
                println!(
                    "{} [{}] {}: {} -> {}",
                    entry.timestamp.to_rfc3339(),
                    entry.effective_severity(),
                    entry.action_taken,
                    entry.original_path,
                    entry.destination_path.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Command::Undo { run_id } => {
            let engine = UndoEngine::new(&history);
            let report = engine.undo_batch(&run_id);
            for message in &report.messages {
                println!("{message}");
            }
            println!(
                "Undo finished: {} succeeded, {} failed",
                report.success_count, report.failure_count
            );
            Ok(())
        }
        Command::Prune { days } => {
            let app_config = config::load_config();
            let days = days.unwrap_or(app_config.settings.log_retention_days);
            let removed = history.prune(days).map_err(|e| e.to_string())?;
            println!("Removed {removed} entries older than {days} days");
            Ok(())
        }
    }
}

fn print_buffered(rx: &Receiver<WorkerEvent>) {
    for event in rx.try_iter() {
        print_event(&event);
    }
}

fn print_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::Log { severity, message } => println!("{severity}: {message}"),
        WorkerEvent::Status(status) => println!("STATUS: {status:?}"),
        WorkerEvent::Notification { title, message, .. } => {
            println!("NOTIFY: {title}: {message}")
        }
    }
}

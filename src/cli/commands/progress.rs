//! Progress command - inspect or reset saved run progress

use crate::cli::args::{OutputFormat, ProgressArgs};
use crate::config::{Config, ConfigManager};
use crate::error::EnrichResult;
use crate::progress::{ProgressState, ProgressTracker};
use crate::ui::{self, UiContext};
use console::style;
use std::path::Path;

/// Execute the progress command
pub async fn execute(args: ProgressArgs, config: &Config) -> EnrichResult<()> {
    let path = ConfigManager::progress_path(config);

    if args.reset {
        let tracker = ProgressTracker::new(
            &path,
            config.progress.flush_every,
            config.enrichment.parallelism,
            config.enrichment.throttle_rate,
        );
        tracker.reset().await?;
        ui::step_ok_detail(&UiContext::detect(), "Progress reset", &path.display().to_string());
        return Ok(());
    }

    let state = ProgressTracker::read_persisted(&path).await?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        OutputFormat::Table => match state {
            Some(state) => print_progress(&state, &path),
            None => println!("No saved progress at {}", path.display()),
        },
    }

    Ok(())
}

fn print_progress(state: &ProgressState, path: &Path) {
    let status = if state.completed {
        style("completed").green().to_string()
    } else {
        style("in progress").yellow().to_string()
    };

    let percent = if state.total_records == 0 {
        100.0
    } else {
        state.processed_records() as f64 * 100.0 / state.total_records as f64
    };

    println!("{:<14} {}", "Run:", state.run_id);
    println!("{:<14} {}", "Status:", status);
    println!(
        "{:<14} {}/{} ({:.1}%)",
        "Processed:",
        state.processed_records(),
        state.total_records,
        percent
    );
    println!(
        "{:<14} {}",
        "Started:",
        state.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "{:<14} {}",
        "Updated:",
        state.last_updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "{:<14} {} workers, {} lookups/s",
        "Settings:", state.worker_count, state.throttle_rate
    );
    println!("{:<14} {}", "File:", path.display());
}

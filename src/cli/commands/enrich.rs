//! Enrich command - run the pipeline over an input file

use crate::cache::CacheStore;
use crate::cli::args::EnrichArgs;
use crate::config::schema::EnrichmentConfig;
use crate::config::{Config, ConfigManager};
use crate::error::{EnrichError, EnrichResult};
use crate::pipeline::{CancelToken, Coordinator, RunOptions, RunOutcome};
use crate::progress::ProgressTracker;
use crate::record::{read_records, write_records};
use crate::registry::create_client;
use crate::ui::{self, EnrichProgress, UiContext};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Execute the enrich command
pub async fn execute(args: EnrichArgs, config: &Config) -> EnrichResult<()> {
    let ctx = UiContext::detect();

    let enrichment = apply_overrides(&args, &config.enrichment)?;

    let records = read_records(&args.input).await?;
    info!(records = records.len(), input = %args.input.display(), "Loaded input");

    let ttl = chrono::Duration::hours(i64::from(enrichment.cache_ttl_hours));
    let cache = Arc::new(
        CacheStore::open(ConfigManager::cache_path(config), ttl, config.cache.flush_every).await,
    );
    let tracker = Arc::new(ProgressTracker::new(
        ConfigManager::progress_path(config),
        config.progress.flush_every,
        enrichment.parallelism,
        enrichment.throttle_rate,
    ));
    if args.fresh {
        tracker.reset().await?;
    }

    let client = create_client(config)?;
    debug!(client = client.client_name(), "Registry client ready");

    let coordinator = Coordinator::new(
        cache,
        tracker.clone(),
        client,
        RunOptions::from_config(&enrichment),
    );

    let cancel = CancelToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; finishing in-flight lookups and saving progress");
                cancel.cancel();
            }
        })
    };

    let mut progress = EnrichProgress::start(&ctx, tracker);
    let result = coordinator.run(records, &cancel).await;
    progress.finish();
    interrupt.abort();
    let outcome = result?;

    match &args.output {
        Some(path) => {
            write_records(path, &outcome.records).await?;
            ui::step_ok_detail(&ctx, "Wrote enriched records", &path.display().to_string());
        }
        None => println!("{}", serde_json::to_string_pretty(&outcome.records)?),
    }

    print_summary(&ctx, &outcome);
    Ok(())
}

fn print_summary(ctx: &UiContext, outcome: &RunOutcome) {
    let summary = &outcome.summary;
    let progress = &outcome.progress;

    ui::section(ctx, "Run summary");
    ui::key_value(ctx, "Run", &progress.run_id.to_string());
    ui::key_value(
        ctx,
        "Records",
        &format!("{} ({} distinct ranges)", summary.records, summary.keys),
    );
    ui::key_value(
        ctx,
        "Processed",
        &format!("{}/{}", progress.processed_records(), progress.total_records),
    );
    ui::key_value(ctx, "Looked up", &summary.queued.to_string());
    ui::key_value(ctx, "Cache hits", &summary.cache_hits.to_string());
    if summary.resumed > 0 {
        ui::key_value(ctx, "Resumed", &summary.resumed.to_string());
    }
    ui::key_value(
        ctx,
        "Registry calls",
        &format!("{} ({} retries)", summary.lookups, summary.retries),
    );
    ui::key_value_status(
        ctx,
        "Soft failures",
        &summary.soft_failures.to_string(),
        summary.soft_failures == 0,
    );
    if summary.malformed > 0 {
        ui::step_warn(ctx, &format!("{} malformed range(s) skipped", summary.malformed));
    }

    if summary.cancelled {
        ui::outro_warn(ctx, "Run interrupted; rerun the same command to resume");
    } else {
        ui::outro_success(ctx, "Enrichment complete");
    }
}

/// Layer command-line overrides over the configured enrichment settings
fn apply_overrides(args: &EnrichArgs, config: &EnrichmentConfig) -> EnrichResult<EnrichmentConfig> {
    let mut enrichment = config.clone();
    if let Some(parallelism) = args.parallelism {
        enrichment.parallelism = parallelism;
    }
    if let Some(throttle) = args.throttle {
        enrichment.throttle_rate = throttle;
    }
    if let Some(ttl) = args.ttl_hours {
        enrichment.cache_ttl_hours = ttl;
    }

    if enrichment.parallelism == 0 {
        return Err(EnrichError::User("--parallelism must be at least 1".to_string()));
    }
    if enrichment.throttle_rate == 0 {
        return Err(EnrichError::User("--throttle must be at least 1".to_string()));
    }
    if enrichment.cache_ttl_hours == 0 {
        return Err(EnrichError::User("--ttl-hours must be at least 1".to_string()));
    }
    Ok(enrichment)
}

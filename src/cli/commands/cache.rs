//! Cache command - inspect or clear the lookup cache

use crate::cache::{CacheLookup, CacheStats, CacheStore};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::EnrichResult;
use crate::key::normalize;
use crate::ui::{self, UiContext};
use console::style;
use std::path::Path;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> EnrichResult<()> {
    let ttl = chrono::Duration::hours(i64::from(config.enrichment.cache_ttl_hours));
    let store = CacheStore::open(
        ConfigManager::cache_path(config),
        ttl,
        config.cache.flush_every,
    )
    .await;

    match args.action {
        CacheAction::Stats { format } => show_stats(&store, format),
        CacheAction::Show { range } => show_entry(&store, &range),
        CacheAction::Clear { yes } => clear_cache(&store, yes).await,
    }
}

fn show_stats(store: &CacheStore, format: OutputFormat) -> EnrichResult<()> {
    let stats = store.stats();

    match format {
        OutputFormat::Json => {
            #[derive(serde::Serialize)]
            struct StatsJson<'a> {
                path: &'a Path,
                ttl_hours: i64,
                #[serde(flatten)]
                stats: CacheStats,
            }

            let json = StatsJson {
                path: store.path(),
                ttl_hours: store.ttl().num_hours(),
                stats,
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            println!("{:<10} {}", "File:", store.path().display());
            println!("{:<10} {}h", "TTL:", store.ttl().num_hours());
            println!("{:<10} {}", "Entries:", stats.total);
            println!("{:<10} {}", "Fresh:", style(stats.fresh).green());
            println!("{:<10} {}", "Stale:", style(stats.stale).dim());
        }
    }

    Ok(())
}

fn show_entry(store: &CacheStore, range: &str) -> EnrichResult<()> {
    let key = normalize(range)?;

    match store.get(&key) {
        CacheLookup::Missing => {
            ui::step_warn(&UiContext::detect(), &format!("No cache entry for {}", key));
        }
        lookup => {
            let fresh = lookup.is_hit();
            if let Some(entry) = lookup.entry() {
                println!("{}", serde_json::to_string_pretty(entry)?);
            }
            if !fresh {
                ui::remark(&UiContext::detect(), "Entry is stale and will be looked up again");
            }
        }
    }

    Ok(())
}

async fn clear_cache(store: &CacheStore, yes: bool) -> EnrichResult<()> {
    let ctx = UiContext::detect();
    let count = store.len();

    if count == 0 {
        ui::step_info(&ctx, "Cache is already empty");
        return Ok(());
    }

    if !yes {
        ui::step_warn_hint(
            &ctx,
            &format!("This removes {} cached entries", count),
            "Use --yes to confirm",
        );
        return Ok(());
    }

    store.clear();
    store.flush().await?;
    ui::step_ok(&ctx, &format!("Removed {} cached entries", count));
    Ok(())
}

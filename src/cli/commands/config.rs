//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{EnrichError, EnrichResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> EnrichResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> EnrichResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> EnrichResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> EnrichResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    if let Err(e) = apply(&mut config, key, value) {
        ui::step_error_detail(&ctx, "Cannot set config value", &e.to_string());
        ui::remark(&ctx, "Valid keys:");
        for key in VALID_KEYS {
            ui::remark(&ctx, &format!("  {}", key));
        }
        return Err(e);
    }

    config.validate(manager.path())?;
    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));
    Ok(())
}

const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "enrichment.parallelism",
    "enrichment.throttle_rate",
    "enrichment.cache_ttl_hours",
    "enrichment.registries",
    "enrichment.max_attempts",
    "enrichment.initial_backoff_ms",
    "enrichment.max_backoff_ms",
    "cache.path",
    "cache.flush_every",
    "progress.path",
    "progress.flush_every",
    "registry.timeout_secs",
    "registry.user_agent",
    "registry.base_urls.<name>",
];

/// Apply a dot-separated `key = value` to `config`
fn apply(config: &mut Config, key: &str, value: &str) -> EnrichResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => config.general.log_format = value.to_string(),

        ["enrichment", "parallelism"] => config.enrichment.parallelism = parse_num(value)?,
        ["enrichment", "throttle_rate"] => config.enrichment.throttle_rate = parse_num(value)?,
        ["enrichment", "cache_ttl_hours"] => config.enrichment.cache_ttl_hours = parse_num(value)?,
        ["enrichment", "registries"] => {
            config.enrichment.registries = value
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        ["enrichment", "max_attempts"] => config.enrichment.max_attempts = parse_num(value)?,
        ["enrichment", "initial_backoff_ms"] => {
            config.enrichment.initial_backoff_ms = parse_num(value)?
        }
        ["enrichment", "max_backoff_ms"] => config.enrichment.max_backoff_ms = parse_num(value)?,

        ["cache", "path"] => config.cache.path = Some(PathBuf::from(value)),
        ["cache", "flush_every"] => config.cache.flush_every = parse_num(value)?,

        ["progress", "path"] => config.progress.path = Some(PathBuf::from(value)),
        ["progress", "flush_every"] => config.progress.flush_every = parse_num(value)?,

        ["registry", "timeout_secs"] => config.registry.timeout_secs = parse_num(value)?,
        ["registry", "user_agent"] => config.registry.user_agent = value.to_string(),
        ["registry", "base_urls", name] => {
            config
                .registry
                .base_urls
                .insert(name.to_lowercase(), value.trim_end_matches('/').to_string());
        }

        _ => return Err(EnrichError::User(format!("Unknown config key: {}", key))),
    }

    Ok(())
}

fn parse_num<T: std::str::FromStr>(value: &str) -> EnrichResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EnrichError::User(format!("Invalid number: {}", value)))
}

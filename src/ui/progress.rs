//! Run progress bar with CI fallback

use super::context::UiContext;
use crate::progress::ProgressTracker;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const REFRESH: Duration = Duration::from_millis(200);

/// Progress bar fed from the tracker's processed-key count.
///
/// Draws nothing in non-interactive mode; logs cover progress there.
pub struct EnrichProgress {
    bar: Option<ProgressBar>,
    ticker: Option<JoinHandle<()>>,
}

impl EnrichProgress {
    pub fn start(ctx: &UiContext, tracker: Arc<ProgressTracker>) -> Self {
        if !ctx.use_fancy_output() {
            return Self {
                bar: None,
                ticker: None,
            };
        }

        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "  {spinner:.cyan} Enriching  {bar:30.cyan/dim} {pos}/{len} keys  {per_sec:.dim}  eta {eta:.dim}",
        ) {
            bar.set_style(
                style
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .progress_chars("━╸─"),
            );
        }
        bar.enable_steady_tick(Duration::from_millis(120));

        let ticker = {
            let bar = bar.clone();
            tokio::spawn(async move {
                loop {
                    let (processed, total) = tracker.counts();
                    bar.set_length(total as u64);
                    bar.set_position(processed as u64);
                    tokio::time::sleep(REFRESH).await;
                }
            })
        };

        Self {
            bar: Some(bar),
            ticker: Some(ticker),
        }
    }

    /// Stop polling and clear the bar
    pub fn finish(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(bar) = self.bar.take() {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

impl Drop for EnrichProgress {
    fn drop(&mut self) {
        self.finish();
    }
}

//! Terminal output helpers
//!
//! Styled glyphs and an indicatif progress bar on a TTY, plain bracketed
//! prefixes in CI or when output is piped. Status lines go to stderr so
//! enriched records can be piped from stdout.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    key_value, key_value_status, outro_success, outro_warn, remark, section, step_error_detail,
    step_info, step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::EnrichProgress;

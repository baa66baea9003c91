//! Output functions for consistent CLI formatting

use super::context::UiContext;
use console::{style, Style};

/// Display a success outro
pub fn outro_success(ctx: &UiContext, message: &str) {
    eprintln!();
    if ctx.use_fancy_output() {
        eprintln!("{} {}", style("✓").green().bold(), style(message).green().bold());
    } else {
        eprintln!("{} {}", style("[OK]").green(), message);
    }
}

/// Display a warning outro
pub fn outro_warn(ctx: &UiContext, message: &str) {
    eprintln!();
    if ctx.use_fancy_output() {
        eprintln!("{} {}", style("!").yellow().bold(), style(message).yellow().bold());
    } else {
        eprintln!("{} {}", style("[WARN]").yellow(), message);
    }
}

/// Display a section header
pub fn section(_ctx: &UiContext, title: &str) {
    eprintln!();
    eprintln!("{}", style(title).bold());
}

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {}", style("✓").green(), message);
    } else {
        eprintln!("  {} {}", style("[OK]").green(), message);
    }
}

/// Display a success step with detail
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {} ({})", style("✓").green(), message, style(detail).dim());
    } else {
        eprintln!("  {} {} ({})", style("[OK]").green(), message, detail);
    }
}

/// Display a warning step
pub fn step_warn(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {}", style("!").yellow(), message);
    } else {
        eprintln!("  {} {}", style("[WARN]").yellow(), message);
    }
}

/// Display a warning step with hint
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {} - {}", style("!").yellow(), message, style(hint).dim());
    } else {
        eprintln!("  {} {} - {}", style("[WARN]").yellow(), message, hint);
    }
}

/// Display an error step with detail
pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {}: {}", style("✗").red(), message, style(detail).red());
    } else {
        eprintln!("  {} {}: {}", style("[FAIL]").red(), message, detail);
    }
}

/// Display an info step
pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {}", style("•").cyan(), message);
    } else {
        eprintln!("  {} {}", style("[INFO]").cyan(), message);
    }
}

/// Display a remark/hint
pub fn remark(_ctx: &UiContext, message: &str) {
    eprintln!("  {}", style(message).dim());
}

/// Print styled key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {}: {}", style(key).dim(), value);
    } else {
        eprintln!("  {}: {}", key, value);
    }
}

/// Print styled key-value with status color
pub fn key_value_status(ctx: &UiContext, key: &str, value: &str, ok: bool) {
    if ctx.use_fancy_output() {
        let value_style = if ok {
            Style::new().green()
        } else {
            Style::new().yellow()
        };
        eprintln!("  {}: {}", style(key).dim(), value_style.apply_to(value));
    } else {
        let prefix = if ok { "[OK]" } else { "[WARN]" };
        eprintln!("  {} {}: {}", prefix, key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_non_interactive() {
        let ctx = UiContext::non_interactive();
        // These should not panic
        section(&ctx, "Run");
        step_ok(&ctx, "Step completed");
        step_warn_hint(&ctx, "Warning", "do something");
        step_error_detail(&ctx, "Error", "detail");
        key_value_status(&ctx, "completed", "yes", true);
        outro_success(&ctx, "Done");
    }
}

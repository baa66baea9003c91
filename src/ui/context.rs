//! Decides whether status output may draw progress bars and glyphs

use std::io::IsTerminal;

/// Environment variables set by common CI runners
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "JENKINS_URL",
    "BUILDKITE",
    "TF_BUILD",
];

/// How status output is rendered on stderr
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    fancy: bool,
}

impl UiContext {
    /// Fancy output only on a terminal stderr outside CI and with a capable `TERM`
    pub fn detect() -> Self {
        Self::from_env(std::io::stderr().is_terminal(), |var| std::env::var(var).ok())
    }

    /// Plain output regardless of the environment
    pub fn non_interactive() -> Self {
        Self { fancy: false }
    }

    fn from_env(stderr_tty: bool, var: impl Fn(&str) -> Option<String>) -> Self {
        let in_ci = CI_VARS.iter().any(|name| var(name).is_some());
        let dumb = var("TERM").is_some_and(|term| term == "dumb");
        Self {
            fancy: stderr_tty && !in_ci && !dumb,
        }
    }

    /// Whether to draw progress bars and glyphs
    pub fn use_fancy_output(&self) -> bool {
        self.fancy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn terminal_outside_ci_is_fancy() {
        assert!(UiContext::from_env(true, env(&[("TERM", "xterm-256color")])).use_fancy_output());
    }

    #[test]
    fn redirected_stderr_is_plain() {
        assert!(!UiContext::from_env(false, env(&[])).use_fancy_output());
    }

    #[test]
    fn ci_runner_is_plain() {
        assert!(!UiContext::from_env(true, env(&[("GITHUB_ACTIONS", "true")])).use_fancy_output());
        assert!(!UiContext::from_env(true, env(&[("CI", "1")])).use_fancy_output());
    }

    #[test]
    fn dumb_terminal_is_plain() {
        assert!(!UiContext::from_env(true, env(&[("TERM", "dumb")])).use_fancy_output());
    }

    #[test]
    fn non_interactive_is_plain() {
        assert!(!UiContext::non_interactive().use_fancy_output());
    }
}

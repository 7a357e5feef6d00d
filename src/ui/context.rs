//! Interactive vs. plain output detection

use std::io::IsTerminal;

/// CI systems that set their own marker variable
const CI_MARKERS: [&str; 6] = [
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
];

/// Decides whether output may use colors and cliclack framing
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    fancy: bool,
}

impl UiContext {
    /// Fancy output only on a terminal outside CI
    pub fn detect() -> Self {
        let fancy = std::io::stdout().is_terminal()
            && !CI_MARKERS.iter().any(|var| std::env::var_os(var).is_some());
        Self { fancy }
    }

    /// Plain output regardless of the environment
    pub fn plain() -> Self {
        Self { fancy: false }
    }

    pub fn use_fancy_output(&self) -> bool {
        self.fancy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_context_is_never_fancy() {
        assert!(!UiContext::plain().use_fancy_output());
    }
}

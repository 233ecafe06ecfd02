// ABOUTME: Version string, REPL banner and default interpreter limits

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const WELCOME_MESSAGE: &str = "PyRaf";
pub const WELCOME_SUBTITLE: &str = "A small dynamically-typed scripting language";

/// Recursion depth at which the evaluator/VM fail with `StackOverflow`,
/// overridable per-run via `--max-depth`.
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

pub const HISTORY_FILE: &str = ".pyraf_history";

pub const HELP_TEXT: &str = r#"
Available commands:
  :quit, :exit   - Exit the REPL
  :clear         - Clear the screen
  :help          - Show this help message

Type any PyRaf statement to evaluate it. Use Ctrl-D or :quit to exit.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_cargo_package_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn default_recursion_limit_matches_spec() {
        assert_eq!(DEFAULT_RECURSION_LIMIT, 1000);
    }
}

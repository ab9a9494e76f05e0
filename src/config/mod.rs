pub mod generate;
pub mod parse;
pub mod types;

use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{load_config, ConfigError};
pub use types::{Config, DedupKey, ReadDirection, WebConfig};

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    })
}

/// Expands `$env{VAR_NAME}` references. Unset variables are left untouched so
/// the parser can report them.
pub fn expand_env_vars(text: &str) -> String {
    env_var_pattern()
        .replace_all(text, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

/// Names of `$env{...}` references still present in `text`, sorted and deduplicated.
/// Full-line YAML comments are ignored.
pub fn unexpanded_env_vars(text: &str) -> Vec<String> {
    let pattern = env_var_pattern();
    let mut names: Vec<String> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| pattern.captures_iter(line))
        .map(|caps| caps[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path: the explicit argument, then
/// `~/.config/auditfeed/config.yml`, then `/etc/auditfeed/config.yml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/auditfeed/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/auditfeed/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_set_and_unset() {
        std::env::set_var("AUDITFEED_TEST_DIR", "/srv/exports");
        let result = expand_env_vars("$env{AUDITFEED_TEST_DIR}/$env{AUDITFEED_UNSET_VAR}");
        assert_eq!(result, "/srv/exports/$env{AUDITFEED_UNSET_VAR}");
        std::env::remove_var("AUDITFEED_TEST_DIR");
    }

    #[test]
    fn test_unexpanded_env_vars_dedup() {
        let names = unexpanded_env_vars("$env{B} $env{A} $env{B}");
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_unexpanded_env_vars_skips_comment_lines() {
        let text = "# Paths may use $env{VAR}\n  # $env{INDENTED}\npath: $env{DATA_DIR}/x\n";
        assert_eq!(unexpanded_env_vars(text), vec!["DATA_DIR".to_string()]);
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/logs.duckdb")), home.join("logs.duckdb"));
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
        assert_eq!(expand_tilde(Path::new("/var/lib/x")), Path::new("/var/lib/x"));
        assert_eq!(expand_tilde(Path::new("relative/~")), Path::new("relative/~"));
    }

    #[test]
    fn test_resolve_explicit_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/tmp/auditfeed.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/auditfeed.yml")));
    }
}

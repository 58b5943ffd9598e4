//! Path helpers for diagnostics
//!
//! Command lines and error messages mention absolute paths; these helpers
//! rewrite them relative to the working directory so output stays short.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn components(path: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = path.split('/').collect();
    while parts.last() == Some(&"") {
        parts.pop();
    }
    parts
}

/// Express `src` relative to the directory `base`.
///
/// Both arguments are `/`-separated absolute paths. When the two paths do
/// not share their first component, `src` is returned unchanged.
pub fn relative_path_from(src: &str, base: &str) -> String {
    let s = components(src);
    let b = components(base);

    if s.get(1) != b.get(1) {
        return src.to_string();
    }
    if s == b {
        return "./".to_string();
    }

    let common = s
        .iter()
        .zip(b.iter())
        .position(|(x, y)| x != y)
        .unwrap_or_else(|| s.len().min(b.len()));

    if common == 0 && s.len() == b.len() {
        return ".".to_string();
    }

    let mut parts: Vec<&str> = vec![".."; b.len().saturating_sub(common)];
    parts.extend_from_slice(&s[common..]);
    parts.join("/")
}

fn absolute_dir_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(/[^\s:]*/)").expect("static pattern"))
}

/// Rewrite every absolute directory inside `message` relative to `cwd`.
pub fn relativize(message: &str, cwd: &Path) -> String {
    let base = cwd.to_string_lossy();
    absolute_dir_pattern()
        .replace_all(message, |caps: &regex::Captures<'_>| {
            let rel = relative_path_from(&caps[1], &base);
            format!("{}/", rel.trim_end_matches('/'))
        })
        .into_owned()
}

// src/shellquote.rs

//! Shell-safe quoting for the `quote` builtin exposed to job modules.

use anyhow::{bail, Result};

/// Quote a string for the given shell dialect (`posix` or `fish`).
pub fn quote(s: &str, shell: &str) -> Result<String> {
    match shell {
        "fish" => Ok(fish(s)),
        "posix" => Ok(posix(s)),
        other => bail!("unsupported shell: {other}"),
    }
}

pub fn fish(s: &str) -> String {
    if shell_safe(s) {
        return s.to_string();
    }

    format!("'{}'", s.replace('\'', "\\'"))
}

pub fn posix(s: &str) -> String {
    if shell_safe(s) {
        return s.to_string();
    }

    // Close the single-quoted string, emit a double-quoted quote, reopen.
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

fn shell_safe(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '%' | '+' | ',' | '-' | '.' | '/' | ':' | '=' | '@' | '_')
        })
}

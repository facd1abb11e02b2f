// src/envfile.rs

//! Env-file parsing and environment merging.
//!
//! The format is one `KEY=VALUE` per line with `#` comments, an optional
//! `export ` prefix, single- or double-quoted values (which may span multiple
//! lines), and `${VAR}`/`$VAR` substitution against keys defined earlier in
//! the same file or an injected substitution map. Single-quoted values
//! disable substitution.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

/// A mapping of environment variable names to values.
///
/// `BTreeMap` keeps iteration order stable, which makes the subprocess
/// environment and `status` output deterministic.
pub type Env = BTreeMap<String, String>;

const WHITESPACE: &[char] = &[' ', '\t'];

/// The current process environment as an [`Env`].
pub fn os_env() -> Env {
    std::env::vars().collect()
}

/// Merge environments; later entries win.
pub fn merge(base: Env, over: Env) -> Env {
    let mut merged = base;
    merged.extend(over);
    merged
}

/// Read and parse an env file.
///
/// A missing file is not an error and loads as the empty mapping.
pub fn load(path: &Path, subst: bool, subst_env: &Env) -> Result<Env> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Env::new()),
        Err(err) => return Err(err).with_context(|| format!("reading env file {:?}", path)),
    };

    parse(&contents, subst, subst_env).with_context(|| format!("parsing env file {:?}", path))
}

/// Parse env-file text.
///
/// When `subst` is true, `${VAR}` and `$VAR` are replaced with values from
/// keys parsed so far, falling back to `subst_env`. An unknown variable is an
/// error.
pub fn parse(input: &str, subst: bool, subst_env: &Env) -> Result<Env> {
    let lines: Vec<&str> = input.lines().collect();
    let mut env = Env::new();
    let mut i = 0;

    while i < lines.len() {
        let line_num = i + 1;
        let line = lines[i].trim_start_matches(WHITESPACE);
        i += 1;

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);

        let pos = line
            .find('=')
            .ok_or_else(|| anyhow!("line {line_num}: no equals sign"))?;

        let key = line[..pos].trim_matches(WHITESPACE);
        if key.is_empty() {
            bail!("line {line_num}: empty variable name");
        }

        let raw_value = line[pos + 1..].trim_start_matches(WHITESPACE);
        let mut value = raw_value.to_string();

        // A quoted value may span multiple lines; consume until the closing
        // quote.
        if let Some(quote) = raw_value.chars().next().filter(|c| *c == '"' || *c == '\'') {
            if !has_unescaped_end_quote(&raw_value[1..], quote) {
                let mut saw_end_quote = false;

                while i < lines.len() {
                    let next_line = lines[i];
                    i += 1;

                    value.push('\n');
                    value.push_str(next_line);

                    if has_unescaped_end_quote(next_line, quote) {
                        saw_end_quote = true;
                        break;
                    }
                }

                if !saw_end_quote {
                    bail!("line {line_num}: reached end looking for closing quote");
                }
            }
        }

        if let Some(comment_start) = find_comment_start(&value) {
            value.truncate(comment_start);
        }
        let value = value.trim_matches(WHITESPACE);

        let parsed = parse_value(value, subst, &env, subst_env)
            .map_err(|err| anyhow!("line {line_num}: {err}"))?;

        env.insert(key.to_string(), parsed);
    }

    Ok(env)
}

fn has_unescaped_end_quote(s: &str, quote: char) -> bool {
    let mut escaped = false;

    for c in s.chars() {
        if c == '\\' && !escaped {
            escaped = true;
            continue;
        }

        if c == quote && !escaped {
            return true;
        }

        escaped = false;
    }

    false
}

/// Locate the first `#` that starts a trailing comment: unescaped, and
/// either at the start of the value or preceded by whitespace or a closing
/// double quote.
fn find_comment_start(value: &str) -> Option<usize> {
    let bytes = value.as_bytes();
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\\' && !escaped {
            escaped = true;
            continue;
        }

        if b == b'#' && !escaped {
            if i == 0 {
                return Some(i);
            }

            let prev = bytes[i - 1];
            if prev == b'"' || prev == b' ' || prev == b'\t' {
                return Some(i);
            }
        }

        escaped = false;
    }

    None
}

fn parse_value(value: &str, subst: bool, env: &Env, subst_env: &Env) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }

    if value.len() >= 2 {
        if value.starts_with('"') && value.ends_with('"') {
            let unquoted = &value[1..value.len() - 1];
            return expand_value(unquoted, subst, env, subst_env);
        }

        if value.starts_with('\'') && value.ends_with('\'') {
            let unquoted = &value[1..value.len() - 1];
            return Ok(expand_single_quoted(unquoted));
        }
    }

    expand_value(value, subst, env, subst_env)
}

/// Single-quoted values keep backslash sequences verbatim and never
/// substitute.
fn expand_single_quoted(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut escaped = false;

    for c in value.chars() {
        if c == '\\' && !escaped {
            escaped = true;
            continue;
        }

        if escaped {
            result.push('\\');
            escaped = false;
        }
        result.push(c);
    }

    if escaped {
        result.push('\\');
    }

    result
}

fn expand_value(value: &str, subst: bool, env: &Env, subst_env: &Env) -> Result<String> {
    let chars: Vec<char> = value.chars().collect();
    let mut result = String::with_capacity(value.len());
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' && !escaped {
            escaped = true;
            i += 1;
            continue;
        }

        if escaped {
            match c {
                'n' => result.push('\n'),
                'r' => result.push('\r'),
                't' => result.push('\t'),
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                other => {
                    result.push('\\');
                    result.push(other);
                }
            }

            escaped = false;
            i += 1;
            continue;
        }

        if subst && c == '$' && i + 1 < chars.len() {
            let rest: String = chars[i..].iter().collect();
            let (var_name, offset) = extract_var_name(&rest)?;

            let replacement = lookup(&var_name, env, subst_env)?;
            result.push_str(&replacement);

            i += offset + 1;
            continue;
        }

        result.push(c);
        i += 1;
    }

    Ok(result)
}

/// Parse a `${VAR}` or `$VAR` reference starting at a `$`. Returns the
/// variable name and the number of characters consumed after the `$`.
fn extract_var_name(value: &str) -> Result<(String, usize)> {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 2 || chars[0] != '$' {
        bail!("invalid variable substitution syntax");
    }

    if chars[1] == '{' {
        let end = chars
            .iter()
            .position(|c| *c == '}')
            .ok_or_else(|| anyhow!("unclosed variable substitution"))?;

        let name: String = chars[2..end].iter().collect();
        return Ok((name, end));
    }

    let mut end = 1;
    while end < chars.len() && is_var_name_char(chars[end]) {
        end += 1;
    }

    let name: String = chars[1..end].iter().collect();
    Ok((name, end - 1))
}

fn is_var_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lookup(var_name: &str, env: &Env, subst_env: &Env) -> Result<String> {
    if let Some(value) = env.get(var_name) {
        return Ok(value.clone());
    }

    if let Some(value) = subst_env.get(var_name) {
        return Ok(value.clone());
    }

    bail!("unknown variable: {var_name}")
}

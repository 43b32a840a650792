//! Line splitting for the script language and the IRC wire format.
//!
//! Both splitters share one rule: tokens are separated by runs of spaces,
//! and the first token after the initial position that starts with `:`
//! swallows the rest of the line (colon stripped). They differ in how a
//! leading `:` is interpreted: the script splitter rewrites `:<name> <rest>`
//! into a `SEND` command, while the IRC splitter treats it as the message
//! source prefix.

use crate::error::ScriptError;

/// The whitespace characters recognized on IRC lines: space plus the
/// ASCII controls 9..13 (HT, LF, VT, FF, CR).
pub const IRC_WHITESPACE: &[char] = &[' ', '\t', '\n', '\x0b', '\x0c', '\r'];

/// Trims leading spaces and tabs, and trailing CR/LF.
pub fn irc_trim(line: &str) -> &str {
    line.trim_start_matches([' ', '\t']).trim_end_matches(['\r', '\n'])
}

/// Splits `text` into whitespace-delimited fields.
pub fn irc_fields(text: &str) -> Vec<&str> {
    text.split(|c: char| IRC_WHITESPACE.contains(&c))
        .filter(|field| !field.is_empty())
        .collect()
}

/// Splits `line` in an IRC-like fashion, appending tokens to `parts`.
///
/// The first scanned token is appended as-is even if it starts with `:`;
/// any later token starting with `:` makes the remainder of the line a
/// single trailing token.
fn append_split(parts: &mut Vec<String>, line: &str) {
    let mut rest = line;
    let mut first = true;
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            return;
        }
        if !first {
            if let Some(trailing) = rest.strip_prefix(':') {
                parts.push(trailing.to_string());
                return;
            }
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        parts.push(rest[..end].to_string());
        rest = &rest[end..];
        first = false;
    }
}

/// Splits one line of script into command tokens.
///
/// Blank lines and `#` comments yield an empty token list. A line of the
/// form `:<name> <text>` is rewritten to `["SEND", name, text]`; a bare
/// `:<name>` with no text is a syntax error.
pub fn script_split_line(line: &str) -> Result<Vec<String>, ScriptError> {
    let line = irc_trim(line);
    if line.is_empty() || line.starts_with('#') {
        return Ok(Vec::new());
    }

    if let Some(rest) = line.strip_prefix(':') {
        let Some((name, text)) = rest.split_once(' ') else {
            return Err(ScriptError::Syntax(line.to_string()));
        };
        return Ok(vec!["SEND".to_string(), name.to_string(), text.to_string()]);
    }

    let mut parts = Vec::with_capacity(4);
    append_split(&mut parts, line);
    Ok(parts)
}

/// Splits `line` in an IRC-client-like fashion.
///
/// The returned tokens are the source prefix (empty string when the line
/// carries none), the command, then any arguments. Blank lines and a
/// prefix with nothing after it yield an empty token list.
pub fn irc_split_line(line: &str) -> Vec<String> {
    let line = irc_trim(line);
    if line.is_empty() {
        return Vec::new();
    }

    let mut parts = Vec::with_capacity(7);
    let rest = if let Some(tail) = line.strip_prefix(':') {
        match tail.split_once(' ') {
            Some((source, rest)) => {
                parts.push(source.to_string());
                rest
            }
            None => {
                tracing::debug!(%line, "bogus IRC line");
                return Vec::new();
            }
        }
    } else {
        parts.push(String::new());
        line
    };

    append_split(&mut parts, rest);
    parts
}

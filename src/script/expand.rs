//! `$NAME` / `${NAME}` template expansion.

use crate::error::ScriptError;

/// Expands `$NAME` and `${NAME}` placeholders in `text`.
///
/// `lookup` maps a placeholder name to its value; a name it does not know
/// fails the whole expansion. Bare names are runs of ASCII alphanumerics
/// and underscores. A `$` that does not introduce a placeholder (including
/// an unterminated `${`) is kept literally.
pub fn expand<F>(text: &str, lookup: F) -> Result<String, ScriptError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        if let Some(inner) = rest.strip_prefix('{') {
            match inner.find('}') {
                Some(end) => {
                    out.push_str(&resolve(&inner[..end], &lookup)?);
                    rest = &inner[end + 1..];
                }
                None => out.push('$'),
            }
            continue;
        }

        let end = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(rest.len());
        if end == 0 {
            out.push('$');
            continue;
        }
        out.push_str(&resolve(&rest[..end], &lookup)?);
        rest = &rest[end..];
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve<F>(name: &str, lookup: &F) -> Result<String, ScriptError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or_else(|| ScriptError::UnknownVariable(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(name: &str) -> Option<String> {
        match name {
            "me" => Some("alice".to_string()),
            "channel" => Some("#x".to_string()),
            "chan" => Some("#y".to_string()),
            _ => None,
        }
    }

    #[test]
    fn expands_bare_and_braced_names() {
        assert_eq!(expand("JOIN $channel", vars).unwrap(), "JOIN #x");
        assert_eq!(expand("PRIVMSG ${chan} :hi $me!", vars).unwrap(), "PRIVMSG #y :hi alice!");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = expand("MODE $nochan +i", vars).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownVariable(name) if name == "nochan"));
    }

    #[test]
    fn stray_dollar_is_literal() {
        assert_eq!(expand("PRIVMSG #x :costs 5$", vars).unwrap(), "PRIVMSG #x :costs 5$");
        assert_eq!(expand("a $ b", vars).unwrap(), "a $ b");
        assert_eq!(expand("${chan", vars).unwrap(), "${chan");
    }

    #[test]
    fn name_ends_at_non_word_character() {
        assert_eq!(expand("$me,$me", vars).unwrap(), "alice,alice");
    }
}

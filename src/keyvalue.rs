/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Parsing for `name=value` and `name value` style lines as found in
//! BLS snippets, boom profiles and os-release data.

use crate::error::{BoomError, Result};

/// Characters permitted in the name of a name/value pair.
const VALID_NAME_CHARS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-,.'\"";

/// Return `true` if `line` is empty after trimming, or is a whole-line
/// comment.
pub fn blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Parse one `name<sep>value` line into its component parts.
///
/// The separator is `Some('=')` for profile and INI style lines, or
/// `None` to split on whitespace (BLS notation). Outermost matching
/// quotes are removed from the value and an inline `#` comment is
/// discarded. With `allow_empty` a bare name with no separator yields
/// `(name, None)`.
pub fn parse_name_value(
    nvp: &str,
    separator: Option<char>,
    allow_empty: bool,
) -> Result<(String, Option<String>)> {
    let malformed = || BoomError::Parse(format!("malformed name/value pair: {nvp}"));
    let line = nvp.trim_end_matches('\n');

    let split = match separator {
        Some(sep) => line.split_once(sep),
        None => line.split_once(char::is_whitespace),
    };

    let (name, value) = match split {
        Some((name, value)) => (name, Some(value)),
        None => {
            if !allow_empty || line.is_empty() {
                return Err(malformed());
            }
            let name = match separator {
                Some(sep) => line.trim_matches(sep),
                None => line,
            };
            (name, None)
        }
    };

    let name = name.trim();
    let mut value = value.map(|v| v.trim_start());

    // A doubled separator ("==") is not a quoted empty value.
    if value.map_or(false, |v| v.starts_with('=')) {
        return Err(malformed());
    }

    // Strip inline comments from the value.
    if let Some(v) = value {
        if let Some((data, _comment)) = v.split_once('#') {
            value = Some(data);
        }
    }

    let bad_chars: Vec<char> = name
        .chars()
        .filter(|c| !VALID_NAME_CHARS.contains(*c))
        .collect();
    if !bad_chars.is_empty() {
        return Err(BoomError::Parse(format!(
            "invalid characters in name: {name} ({bad_chars:?})"
        )));
    }

    let value = value.map(|v| {
        let v = v.trim_end();
        for quote in ['"', '\''] {
            if let Some(inner) = v
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
            {
                return inner.to_string();
            }
        }
        v.to_string()
    });

    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_or_comment() {
        assert!(blank_or_comment(""));
        assert!(blank_or_comment("   "));
        assert!(blank_or_comment("# a comment"));
        assert!(blank_or_comment("   # indented comment"));
        assert!(!blank_or_comment("title Fedora"));
    }

    #[test]
    fn test_parse_equals() {
        let (name, value) = parse_name_value("BOOM_OS_NAME=\"Fedora\"", Some('='), false).unwrap();
        assert_eq!(name, "BOOM_OS_NAME");
        assert_eq!(value.as_deref(), Some("Fedora"));
    }

    #[test]
    fn test_parse_whitespace_separator() {
        let (name, value) =
            parse_name_value("options root=/dev/sda5 ro rhgb quiet", None, false).unwrap();
        assert_eq!(name, "options");
        assert_eq!(value.as_deref(), Some("root=/dev/sda5 ro rhgb quiet"));
    }

    #[test]
    fn test_embedded_whitespace_preserved() {
        let (_, value) = parse_name_value("title 'Fedora Linux 38'", None, false).unwrap();
        assert_eq!(value.as_deref(), Some("Fedora Linux 38"));
    }

    #[test]
    fn test_inline_comment_stripped() {
        let (_, value) = parse_name_value("enable = yes # legacy sync", Some('='), false).unwrap();
        assert_eq!(value.as_deref(), Some("yes"));
    }

    #[test]
    fn test_double_separator_fails() {
        assert!(parse_name_value("name==value", Some('='), false).is_err());
    }

    #[test]
    fn test_bad_joiner_fails() {
        // '+' is outside the permitted name character set.
        assert!(parse_name_value("name+=value", Some('='), false).is_err());
    }

    #[test]
    fn test_bad_name_chars_fail() {
        assert!(parse_name_value("na me=value", Some('='), false).is_err());
        assert!(parse_name_value("na!me=value", Some('='), false).is_err());
    }

    #[test]
    fn test_allow_empty() {
        let (name, value) = parse_name_value("devicetree", None, true).unwrap();
        assert_eq!(name, "devicetree");
        assert!(value.is_none());
        assert!(parse_name_value("devicetree", None, false).is_err());
    }

    #[test]
    fn test_mismatched_quotes_kept() {
        let (_, value) = parse_name_value("name=\"value'", Some('='), false).unwrap();
        assert_eq!(value.as_deref(), Some("\"value'"));
    }
}

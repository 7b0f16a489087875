//! Query-string splitting and quote/paren-aware list splitting.

use std::collections::BTreeMap;

use crate::error::ParseError;
use crate::settings::{ParserSettings, QueryOption};

/// Option values after splitting and percent-decoding, not yet parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawOptions {
    pub system: BTreeMap<QueryOption, String>,
    /// Custom and non-`$` options in query order, passed through untouched.
    pub custom: Vec<(String, String)>,
}

fn decode(option: &str, text: &str, position: usize) -> Result<String, ParseError> {
    urlencoding::decode(text)
        .map(std::borrow::Cow::into_owned)
        .map_err(|_| ParseError::new(option, "invalid percent-encoding", position, text))
}

/// Split `raw` (with or without a leading `?`) on `&` and percent-decode
/// names and values.
///
/// # Errors
/// Returns [`ParseError`] for duplicate system options, unknown `$` options
/// and malformed percent-encoding.
pub fn split_query(raw: &str, settings: &ParserSettings) -> Result<RawOptions, ParseError> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let mut out = RawOptions::default();
    let mut offset = 0;
    for pair in raw.split('&') {
        let at = offset;
        offset += pair.len() + 1;
        if pair.is_empty() {
            continue;
        }
        let (raw_name, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = decode("query", raw_name, at)?;
        let value = decode(&name, raw_value, at + raw_name.len() + 1)?;

        let option = if name.starts_with('$') {
            match QueryOption::from_name(&name) {
                Some(o) => Some(o),
                None if settings
                    .custom_options
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&name)) =>
                {
                    None
                }
                None => {
                    return Err(ParseError::new(
                        name.clone(),
                        "unknown system query option",
                        at,
                        name,
                    ));
                }
            }
        } else if settings.allow_no_dollar_prefix {
            QueryOption::from_name(&format!("${name}"))
        } else {
            None
        };

        match option {
            Some(o) => {
                if out.system.insert(o, value).is_some() {
                    return Err(ParseError::new(
                        o.name(),
                        "query option specified more than once",
                        at,
                        name,
                    ));
                }
            }
            None => out.custom.push((name, value)),
        }
    }
    Ok(out)
}

/// Split `text` on `sep` outside quotes and parentheses. Each part comes with
/// its byte offset in `text`.
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            c if c == sep && !quoted && depth == 0 => {
                parts.push((start, &text[start..i]));
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push((start, &text[start..]));
    parts
}

/// Byte offset of the `)` matching the `(` at `open`, honouring quotes.
pub(crate) fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quoted = false;
    for (i, c) in text[open..].char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Trimmed view of `part` with its offset shifted past leading whitespace.
pub(crate) fn trim_part(offset: usize, part: &str) -> (usize, &str) {
    let trimmed = part.trim_start();
    (offset + part.len() - trimmed.len(), trimmed.trim_end())
}

pub(crate) fn parse_usize(option: &str, text: &str, base: usize) -> Result<usize, ParseError> {
    let t = text.trim();
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::new(
            option,
            "expected a non-negative integer",
            base,
            text,
        ));
    }
    t.parse()
        .map_err(|_| ParseError::new(option, "integer is out of range", base, text))
}

pub(crate) fn parse_bool(option: &str, text: &str, base: usize) -> Result<bool, ParseError> {
    match text.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ParseError::new(option, "expected `true` or `false`", base, text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_decodes() {
        let raw = split_query(
            "?$filter=Name%20eq%20'a'&$TOP=5&foo=bar",
            &ParserSettings::default(),
        )
        .unwrap();
        assert_eq!(raw.system[&QueryOption::Filter], "Name eq 'a'");
        assert_eq!(raw.system[&QueryOption::Top], "5");
        assert_eq!(raw.custom, vec![("foo".to_owned(), "bar".to_owned())]);
    }

    #[test]
    fn rejects_duplicates_and_unknown() {
        let s = ParserSettings::default();
        assert!(split_query("$top=1&$top=2", &s).is_err());
        let err = split_query("$bogus=1", &s).unwrap_err();
        assert_eq!(err.token, "$bogus");

        let s = ParserSettings {
            custom_options: vec!["$bogus".to_owned()],
            ..ParserSettings::default()
        };
        assert_eq!(split_query("$bogus=1", &s).unwrap().custom.len(), 1);
    }

    #[test]
    fn optional_dollar_prefix() {
        let s = ParserSettings {
            allow_no_dollar_prefix: true,
            ..ParserSettings::default()
        };
        let raw = split_query("top=3&other=x", &s).unwrap();
        assert_eq!(raw.system[&QueryOption::Top], "3");
        assert_eq!(raw.custom.len(), 1);
    }

    #[test]
    fn top_level_split_respects_nesting() {
        let parts = split_top_level("A,B($filter=x eq 'a,b';$top=1),C", ',');
        let texts: Vec<_> = parts.iter().map(|(_, p)| *p).collect();
        assert_eq!(texts, ["A", "B($filter=x eq 'a,b';$top=1)", "C"]);
        assert_eq!(parts[2].0, 31);
    }

    #[test]
    fn integers() {
        assert_eq!(parse_usize("$top", "10", 0).unwrap(), 10);
        assert!(parse_usize("$top", "-1", 0).is_err());
        assert!(parse_usize("$top", "x", 0).is_err());
        assert!(parse_bool("$count", "yes", 0).is_err());
    }
}

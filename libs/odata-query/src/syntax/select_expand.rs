//! `$select` and `$expand` path lists, including nested expand options.

use super::ast::{ExpandItem, ExpandPath, Levels, NestedOptions, SelectItem};
use super::expr::{parse_expression, parse_orderby};
use super::split::{matching_paren, parse_bool, parse_usize, split_top_level, trim_part};
use crate::error::ParseError;

fn path_segments(option: &str, text: &str, base: usize) -> Result<Vec<String>, ParseError> {
    let mut segments = Vec::new();
    for (offset, seg) in split_top_level(text, '/') {
        let (offset, seg) = trim_part(offset, seg);
        let valid = seg.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid {
            let message = if seg.is_empty() {
                "empty path segment"
            } else {
                "invalid path segment"
            };
            return Err(ParseError::new(option, message, base + offset, seg));
        }
        segments.push(seg.to_owned());
    }
    Ok(segments)
}

/// Parse a `$select` list.
///
/// # Errors
/// Returns [`ParseError`] for empty items or malformed paths.
pub fn parse_select(option: &str, text: &str, base: usize) -> Result<Vec<SelectItem>, ParseError> {
    let mut items = Vec::new();
    for (offset, part) in split_top_level(text, ',') {
        let (offset, part) = trim_part(offset, part);
        if part == "*" {
            items.push(SelectItem::Wildcard);
        } else {
            items.push(SelectItem::Path(path_segments(option, part, base + offset)?));
        }
    }
    Ok(items)
}

/// Parse an `$expand` list with nested `(...)` options.
///
/// # Errors
/// Returns [`ParseError`] for unbalanced parentheses, unknown nested options
/// or malformed nested values.
pub fn parse_expand(option: &str, text: &str, base: usize) -> Result<Vec<ExpandItem>, ParseError> {
    let mut items = Vec::new();
    for (offset, part) in split_top_level(text, ',') {
        let (offset, part) = trim_part(offset, part);
        items.push(expand_item(option, part, base + offset)?);
    }
    Ok(items)
}

fn expand_item(option: &str, text: &str, base: usize) -> Result<ExpandItem, ParseError> {
    let (path_text, options) = match text.find('(') {
        None => (text, NestedOptions::default()),
        Some(open) => {
            let close = matching_paren(text, open)
                .ok_or_else(|| ParseError::new(option, "unbalanced parentheses", base + open, &text[open..]))?;
            if close + 1 != text.len() {
                return Err(ParseError::new(
                    option,
                    "unexpected text after nested options",
                    base + close + 1,
                    &text[close + 1..],
                ));
            }
            let inner = &text[open + 1..close];
            (&text[..open], nested_options(option, inner, base + open + 1)?)
        }
    };
    let path_text = path_text.trim_end();
    let path = if path_text == "*" {
        ExpandPath::All
    } else {
        ExpandPath::Path(path_segments(option, path_text, base)?)
    };
    Ok(ExpandItem { path, options })
}

fn nested_options(option: &str, text: &str, base: usize) -> Result<NestedOptions, ParseError> {
    let mut out = NestedOptions::default();
    let mut seen = Vec::new();
    for (offset, part) in split_top_level(text, ';') {
        let (offset, part) = trim_part(offset, part);
        let at = base + offset;
        let Some((name, value)) = part.split_once('=') else {
            return Err(ParseError::new(option, "expected `name=value`", at, part));
        };
        let name_lc = name.trim().to_ascii_lowercase();
        if seen.contains(&name_lc) {
            return Err(ParseError::new(option, "nested option specified more than once", at, name));
        }
        let vbase = at + name.len() + 1;
        match name_lc.as_str() {
            "$filter" => out.filter = Some(parse_expression(option, value, vbase)?),
            "$orderby" => out.orderby = parse_orderby(option, value, vbase)?,
            "$select" => out.select = Some(parse_select(option, value, vbase)?),
            "$expand" => out.expand = parse_expand(option, value, vbase)?,
            "$top" => out.top = Some(parse_usize(option, value, vbase)?),
            "$skip" => out.skip = Some(parse_usize(option, value, vbase)?),
            "$count" => out.count = Some(parse_bool(option, value, vbase)?),
            "$levels" => {
                out.levels = Some(if value.trim().eq_ignore_ascii_case("max") {
                    Levels::Max
                } else {
                    match parse_usize(option, value, vbase)? {
                        0 => return Err(ParseError::new(option, "$levels must be at least 1", vbase, value)),
                        n => Levels::Count(n),
                    }
                });
            }
            _ => {
                return Err(ParseError::new(option, "unsupported nested option", at, name));
            }
        }
        seen.push(name_lc);
    }
    Ok(out)
}

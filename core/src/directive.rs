//! Directive line grammar shared by the lint engine and the block splitter.
//!
//! A directive is either a block opener (`:::name{attrs}`) or a leaf
//! (`:name[label]{attrs}`). Both carry an optional `{...}` attribute block
//! parsed by the same tokenizer, so the validator and the splitter always
//! agree on attribute shape.

use once_cell::sync::Lazy;
use regex::Regex;

static BLOCK_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*:{3,}([A-Za-z0-9-]+)\s*(?:\{(.*)\})?").expect("static regex"));

static LEAF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*:([A-Za-z0-9-]+)\[[^\]]*\]\s*(?:\{(.*)\})?").expect("static regex")
});

static BLOCK_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:{3,}\s*$").expect("static regex"));

/// A directive recognized on a single line. `attrs` is the raw interior of
/// the `{...}` block, without the braces, if one was present.
#[derive(Debug, Clone)]
pub(crate) struct DirectiveMatch<'a> {
    pub name: &'a str,
    pub attrs: Option<&'a str>,
}

pub(crate) fn match_block_directive(line: &str) -> Option<DirectiveMatch<'_>> {
    let caps = BLOCK_OPEN_RE.captures(line)?;
    Some(DirectiveMatch {
        name: caps.get(1).map(|m| m.as_str()).unwrap_or(""),
        attrs: caps.get(2).map(|m| m.as_str()),
    })
}

pub(crate) fn match_leaf_directive(line: &str) -> Option<DirectiveMatch<'_>> {
    let caps = LEAF_RE.captures(line)?;
    Some(DirectiveMatch {
        name: caps.get(1).map(|m| m.as_str()).unwrap_or(""),
        attrs: caps.get(2).map(|m| m.as_str()),
    })
}

/// A block terminator is a line holding nothing but three-or-more colons.
pub(crate) fn is_block_close(line: &str) -> bool {
    BLOCK_CLOSE_RE.is_match(line)
}

/// One parsed `key=value` attribute. `raw` is the exact source slice for the
/// token (key, equals sign, and value including any quotes), so rewriters can
/// drop tokens and rejoin the rest without disturbing their spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttrToken {
    pub key: String,
    pub value: String,
    pub raw: String,
}

/// Tokenize the interior of a `{...}` attribute block.
///
/// Accepts double-quoted, single-quoted, or bare (whitespace-free) values and
/// strips matching quote pairs. Any malformed input (a token without `=`, an
/// unterminated quote) yields an empty token list rather than an error.
pub(crate) fn tokenize_attributes(input: &str) -> Vec<AttrToken> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let key_start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-' || chars[i] == '_') {
            i += 1;
        }
        if i == key_start || i >= chars.len() || chars[i] != '=' {
            return Vec::new();
        }
        let key: String = chars[key_start..i].iter().collect();
        i += 1;
        let value: String;
        if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
            let quote = chars[i];
            i += 1;
            let value_start = i;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            if i >= chars.len() {
                return Vec::new();
            }
            value = chars[value_start..i].iter().collect();
            i += 1;
        } else {
            let value_start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            value = chars[value_start..i].iter().collect();
        }
        let raw: String = chars[key_start..i].iter().collect();
        tokens.push(AttrToken { key, value, raw });
    }
    tokens
}

/// Tokenize and collapse into a key → value map. Later duplicates win.
pub(crate) fn parse_attributes(input: &str) -> std::collections::BTreeMap<String, String> {
    tokenize_attributes(input)
        .into_iter()
        .map(|token| (token.key, token.value))
        .collect()
}

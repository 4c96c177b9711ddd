//! Directive block splitter.
//!
//! Segments a document into an ordered sequence of prose and structured
//! directive blocks for a downstream renderer. A small two-state line scanner
//! rather than a Markdown parser: only the configured block kinds open a
//! directive, and everything else stays prose verbatim.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::directive::{is_block_close, match_block_directive, parse_attributes};
use crate::{split_lines, Config};

/// One segment of a split document. Built fresh per invocation and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentBlock {
    Prose {
        markdown: String,
    },
    Directive {
        kind: String,
        attributes: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        raw_source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_error: Option<String>,
    },
}

/// Splitter holds the set of directive kinds it turns into structured blocks.
pub struct Splitter {
    kinds: BTreeSet<String>,
}

struct OpenBlock<'a> {
    kind: String,
    attrs: String,
    open_line: &'a str,
    body: Vec<&'a str>,
}

impl<'a> OpenBlock<'a> {
    fn finish(self, close_line: Option<&str>) -> ContentBlock {
        let mut raw = Vec::with_capacity(self.body.len() + 2);
        raw.push(self.open_line);
        raw.extend(self.body.iter().copied());
        if let Some(close) = close_line {
            raw.push(close);
        }
        let raw_source = raw.join("\n");
        let attributes = parse_attributes(&self.attrs);
        let (payload, parse_error) = if close_line.is_none() {
            (None, Some("directive block was never closed".to_string()))
        } else {
            match extract_fenced_payload(&self.body) {
                Ok(value) => (Some(value), None),
                Err(reason) => (None, Some(reason)),
            }
        };
        ContentBlock::Directive {
            kind: self.kind,
            attributes,
            payload,
            raw_source,
            parse_error,
        }
    }
}

impl Splitter {
    pub fn new(config: &Config) -> Self {
        let kinds = config
            .split_kinds
            .iter()
            .map(|kind| kind.trim().to_lowercase())
            .filter(|kind| !kind.is_empty())
            .collect();
        Self { kinds }
    }

    /// Split one document into ordered content blocks. Never fails: payload
    /// problems surface as `parse_error` on the affected block.
    pub fn split(&self, text: &str) -> Vec<ContentBlock> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let lines = split_lines(text);
        let mut blocks = Vec::new();
        let mut prose: Vec<&str> = Vec::new();
        let mut open: Option<OpenBlock> = None;

        for line in lines.iter().copied() {
            if open.is_some() {
                if is_block_close(line) {
                    let finished = open.take().expect("open block present");
                    blocks.push(finished.finish(Some(line)));
                } else if let Some(block) = open.as_mut() {
                    block.body.push(line);
                }
                continue;
            }
            if let Some(found) = match_block_directive(line) {
                let kind = found.name.to_lowercase();
                if self.kinds.contains(&kind) {
                    flush_prose(&mut prose, &mut blocks);
                    open = Some(OpenBlock {
                        kind,
                        attrs: found.attrs.unwrap_or("").to_string(),
                        open_line: line,
                        body: Vec::new(),
                    });
                    continue;
                }
            }
            prose.push(line);
        }

        if let Some(block) = open.take() {
            blocks.push(block.finish(None));
        }
        flush_prose(&mut prose, &mut blocks);
        blocks
    }
}

fn flush_prose(prose: &mut Vec<&str>, blocks: &mut Vec<ContentBlock>) {
    if prose.is_empty() {
        return;
    }
    let markdown = prose.join("\n").trim_end().to_string();
    prose.clear();
    if markdown.is_empty() {
        return;
    }
    blocks.push(ContentBlock::Prose { markdown });
}

/// Pull the first fenced code span out of a block body and parse its interior
/// as JSON.
fn extract_fenced_payload(body: &[&str]) -> Result<serde_json::Value, String> {
    let Some(open) = body.iter().position(|l| l.trim_start().starts_with("```")) else {
        return Err("no fenced code block found in directive body".to_string());
    };
    let Some(close) = body[open + 1..]
        .iter()
        .position(|l| l.trim_start().starts_with("```"))
    else {
        return Err("fenced code block is not closed".to_string());
    };
    let interior = body[open + 1..open + 1 + close].join("\n");
    serde_json::from_str(&interior).map_err(|e| format!("payload is not valid JSON: {e}"))
}

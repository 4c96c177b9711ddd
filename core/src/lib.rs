//! MarkGuard core engine.
//! Directive-aware Markdown diagnostics and deterministic, line-local
//! autofixes driven by an explicit directive schema registry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

mod directive;
mod fix;
mod split;

pub use fix::{apply_fixes, FixOutcome, FixRecord};
pub use split::{ContentBlock, Splitter};

/// Diagnostic severity levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(name)
    }
}

/// Rule identifiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    EmptyHeading,
    HeadingOrder,
    DuplicateHeading,
    LongParagraph,
    UnknownDirective,
    DirectiveAttribute,
    DirectiveAttributeValue,
    InvisibleCharacter,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::EmptyHeading => "empty-heading",
            Rule::HeadingOrder => "heading-order",
            Rule::DuplicateHeading => "duplicate-heading",
            Rule::LongParagraph => "long-paragraph",
            Rule::UnknownDirective => "unknown-directive",
            Rule::DirectiveAttribute => "directive-attribute",
            Rule::DirectiveAttributeValue => "directive-attribute-value",
            Rule::InvisibleCharacter => "invisible-character",
        };
        f.write_str(name)
    }
}

/// A positioned diagnostic in 1-based line/column coordinates.
///
/// For attribute rules the offending key also travels in `attribute`, so the
/// autofix engine does not have to mine it back out of the message text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintIssue {
    pub rule: Rule,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

/// Allowed attribute surface for one directive name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectiveSchema {
    pub name: String,
    pub allowed_attributes: BTreeSet<String>,
    pub allowed_values: BTreeMap<String, BTreeSet<String>>,
}

/// Engine configuration. The registry is an explicit argument rather than a
/// module-level table, so test fixtures and alternate renderers can run with
/// their own directive sets side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: Vec<DirectiveSchema>,
    pub split_kinds: Vec<String>,
    pub invisible_severity: Severity,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: builtin_registry(),
            split_kinds: vec!["chart".into()],
            invisible_severity: Severity::Warning,
        }
    }
}

fn schema(name: &str, attributes: &[&str], values: &[(&str, &[&str])]) -> DirectiveSchema {
    DirectiveSchema {
        name: name.to_string(),
        allowed_attributes: attributes.iter().map(|a| a.to_string()).collect(),
        allowed_values: values
            .iter()
            .map(|(key, options)| {
                (
                    key.to_string(),
                    options.iter().map(|o| o.to_string()).collect(),
                )
            })
            .collect(),
    }
}

/// The built-in schema table. Must stay in lockstep with the directive kinds
/// the rendering side understands.
pub fn builtin_registry() -> Vec<DirectiveSchema> {
    vec![
        schema(
            "callout",
            &["tone", "title", "icon"],
            &[("tone", &["info", "warning", "success", "danger"])],
        ),
        schema(
            "data-table",
            &["caption", "source", "columns", "methodology", "notes"],
            &[],
        ),
        schema(
            "chart",
            &[
                "type",
                "variant",
                "caption",
                "question",
                "source",
                "sampleSize",
                "methodology",
                "highlight",
                "notes",
            ],
            &[
                (
                    "type",
                    &[
                        "bar", "line", "area", "donut", "stacked", "scatter", "bubble", "radar",
                        "treemap", "gauge", "heatmap", "pie", "histogram", "boxplot", "meter",
                        "combo", "lollipop", "wordcloud", "alluvial",
                    ],
                ),
                ("variant", &["default", "survey"]),
            ],
        ),
        schema("code-group", &[], &[]),
        schema("figure", &[], &[]),
        schema("quote", &[], &[]),
        schema(
            "timeline",
            &["layout", "start", "end"],
            &[("layout", &["horizontal", "vertical"])],
        ),
        schema(
            "accordion",
            &["variant"],
            &[("variant", &["default", "compact"])],
        ),
        schema("marginnote", &["align"], &[("align", &["left", "right"])]),
        schema(
            "pattern",
            &[
                "tone", "type", "title", "subtitle", "eyebrow", "kicker", "variant", "layout",
                "stat", "quote", "author", "source", "caption", "cta",
            ],
            &[("tone", &["info", "warning", "success", "danger", "neutral"])],
        ),
    ]
}

pub(crate) static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s*(.*)$").expect("static regex"));

const LONG_PARAGRAPH_WORDS: usize = 120;
const LONG_PARAGRAPH_CHARS: usize = 800;

/// Linter holds the validated registry for reuse across documents.
pub struct Linter {
    registry: BTreeMap<String, DirectiveSchema>,
    invisible_severity: Severity,
}

impl Linter {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let mut registry = BTreeMap::new();
        for entry in config.registry {
            let name = entry.name.trim().to_lowercase();
            if name.is_empty() {
                anyhow::bail!("directive schema entry has an empty name");
            }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                anyhow::bail!("invalid directive name `{}`", entry.name);
            }
            for key in entry.allowed_values.keys() {
                if !entry.allowed_attributes.contains(key) {
                    anyhow::bail!(
                        "directive `{name}` enumerates values for unlisted attribute `{key}`"
                    );
                }
            }
            registry.insert(name, entry);
        }
        Ok(Self {
            registry,
            invisible_severity: config.invisible_severity,
        })
    }

    /// Lint one document. Returns issues in discovery order: headings,
    /// paragraphs, directives, invisible characters.
    pub fn lint(&self, text: &str) -> Vec<LintIssue> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let lines = split_lines(text);
        let mut issues = Vec::new();
        self.detect_headings(&lines, &mut issues);
        self.detect_paragraphs(&lines, &mut issues);
        self.detect_directives(&lines, &mut issues);
        self.detect_invisible_characters(&lines, &mut issues);
        issues
    }

    fn detect_headings(&self, lines: &[&str], issues: &mut Vec<LintIssue>) {
        let mut last_level: Option<usize> = None;
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (idx, line) in lines.iter().enumerate() {
            let Some(caps) = HEADING_RE.captures(line) else {
                continue;
            };
            let line_no = idx + 1;
            let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
            let title = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();

            if title.is_empty() {
                issues.push(LintIssue {
                    rule: Rule::EmptyHeading,
                    severity: Severity::Warning,
                    message: "Heading has no title text.".into(),
                    line: line_no,
                    column: 1,
                    attribute: None,
                });
            }

            if let Some(last) = last_level {
                if level > last + 1 {
                    issues.push(LintIssue {
                        rule: Rule::HeadingOrder,
                        severity: Severity::Warning,
                        message: format!("Heading level jumps from {last} to {level}."),
                        line: line_no,
                        column: 1,
                        attribute: None,
                    });
                }
            }

            if !title.is_empty() {
                let normalized = normalize_title(title);
                if let Some(first) = seen.get(&normalized) {
                    issues.push(LintIssue {
                        rule: Rule::DuplicateHeading,
                        severity: Severity::Info,
                        message: format!("Heading `{title}` repeats the heading on line {first}."),
                        line: line_no,
                        column: 1,
                        attribute: None,
                    });
                } else {
                    seen.insert(normalized, line_no);
                }
            }

            // Empty headings still advance the tracker so skip detection
            // follows the document's actual structure.
            last_level = Some(level);
        }
    }

    fn detect_paragraphs(&self, lines: &[&str], issues: &mut Vec<LintIssue>) {
        let mut buffer: Vec<&str> = Vec::new();
        let mut start_line = 0usize;
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() || HEADING_RE.is_match(line) {
                flush_paragraph(&buffer, start_line, issues);
                buffer.clear();
                continue;
            }
            if buffer.is_empty() {
                start_line = idx + 1;
            }
            buffer.push(line);
        }
        flush_paragraph(&buffer, start_line, issues);
    }

    fn detect_directives(&self, lines: &[&str], issues: &mut Vec<LintIssue>) {
        for (idx, line) in lines.iter().enumerate() {
            let matched = directive::match_block_directive(line)
                .or_else(|| directive::match_leaf_directive(line));
            let Some(found) = matched else {
                continue;
            };
            let line_no = idx + 1;
            let Some(entry) = self.registry.get(&found.name.to_lowercase()) else {
                issues.push(LintIssue {
                    rule: Rule::UnknownDirective,
                    severity: Severity::Warning,
                    message: format!("Unknown directive `{}`.", found.name),
                    line: line_no,
                    column: 1,
                    attribute: None,
                });
                continue;
            };
            for token in directive::tokenize_attributes(found.attrs.unwrap_or("")) {
                let column = column_of(line, &token.raw);
                if !entry.allowed_attributes.contains(&token.key) {
                    issues.push(LintIssue {
                        rule: Rule::DirectiveAttribute,
                        severity: Severity::Info,
                        message: format!(
                            "Directive '{}' does not support attribute '{}'.",
                            entry.name, token.key
                        ),
                        line: line_no,
                        column,
                        attribute: Some(token.key.clone()),
                    });
                } else if let Some(allowed) = entry.allowed_values.get(&token.key) {
                    if !allowed.contains(&token.value) {
                        issues.push(LintIssue {
                            rule: Rule::DirectiveAttributeValue,
                            severity: Severity::Info,
                            message: format!(
                                "Directive '{}' does not allow {}={}.",
                                entry.name, token.key, token.value
                            ),
                            line: line_no,
                            column,
                            attribute: Some(token.key.clone()),
                        });
                    }
                }
            }
        }
    }

    fn detect_invisible_characters(&self, lines: &[&str], issues: &mut Vec<LintIssue>) {
        for (idx, line) in lines.iter().enumerate() {
            // One diagnostic per affected line, anchored at the first match.
            let Some((pos, ch)) = line.char_indices().find(|(_, c)| is_invisible_char(*c)) else {
                continue;
            };
            let column = line[..pos].chars().count() + 1;
            issues.push(LintIssue {
                rule: Rule::InvisibleCharacter,
                severity: self.invisible_severity,
                message: format!("Invisible character U+{:04X} found.", ch as u32),
                line: idx + 1,
                column,
                attribute: None,
            });
        }
    }
}

fn flush_paragraph(buffer: &[&str], start_line: usize, issues: &mut Vec<LintIssue>) {
    if buffer.is_empty() {
        return;
    }
    let joined = buffer.join(" ");
    let words = joined.split_whitespace().count();
    let chars = joined.chars().count();
    if words >= LONG_PARAGRAPH_WORDS || chars >= LONG_PARAGRAPH_CHARS {
        issues.push(LintIssue {
            rule: Rule::LongParagraph,
            severity: Severity::Info,
            message: format!(
                "Paragraph spans {words} words and {chars} characters; limits are {LONG_PARAGRAPH_WORDS} and {LONG_PARAGRAPH_CHARS}."
            ),
            line: start_line,
            column: 1,
            attribute: None,
        });
    }
}

/// Split on `\n` and strip one trailing `\r` per line. The trailing empty
/// element after a final newline is preserved so `join("\n")` round-trips
/// the normalized text.
pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

pub(crate) fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn column_of(line: &str, token: &str) -> usize {
    match line.find(token) {
        Some(pos) => line[..pos].chars().count() + 1,
        None => 1,
    }
}

fn is_invisible_char(ch: char) -> bool {
    match ch {
        '\u{00A0}' | '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{200E}'
        | '\u{200F}' | '\u{2060}' | '\u{FEFF}' => true,
        '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' => true,
        '\u{007F}'..='\u{009F}' => true,
        c if (c as u32) < 0x20 => c != '\t',
        _ => false,
    }
}

/// Unicode-aware word count for document statistics.
pub fn count_words(text: &str) -> usize {
    text.unicode_words().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linter() -> Linter {
        Linter::new(Config::default()).unwrap()
    }

    fn lint(text: &str) -> Vec<LintIssue> {
        linter().lint(text)
    }

    #[test]
    fn empty_and_blank_documents_are_clean() {
        assert!(lint("").is_empty());
        assert!(lint("   \n\t\n").is_empty());
    }

    #[test]
    fn flags_empty_heading() {
        let issues = lint("## \n\nContent here.");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].rule, Rule::EmptyHeading);
        assert_eq!(issues[0].line, 1);
    }

    #[test]
    fn first_heading_never_flags_order() {
        let issues = lint("#### Deep start\n\nText.");
        assert!(issues.iter().all(|i| i.rule != Rule::HeadingOrder));
    }

    #[test]
    fn flags_skipped_heading_level() {
        let issues = lint("# Top\n\n### Skipped\n\nText.");
        let issue = issues
            .iter()
            .find(|i| i.rule == Rule::HeadingOrder)
            .expect("heading-order issue");
        assert_eq!(issue.line, 3);
        assert_eq!(issue.severity, Severity::Warning);
    }

    #[test]
    fn empty_heading_still_advances_level_tracker() {
        // The level-4 empty heading makes the level-5 heading a single step.
        let issues = lint("# Top\n\n## Next\n\n### Third\n\n#### \n\n##### Fine");
        assert!(issues.iter().all(|i| i.rule != Rule::HeadingOrder));
    }

    #[test]
    fn duplicate_heading_flags_later_occurrence_only() {
        let issues = lint("## Summary\n\nText.\n\n##   summary  \n\nMore.");
        let dups: Vec<_> = issues
            .iter()
            .filter(|i| i.rule == Rule::DuplicateHeading)
            .collect();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].line, 5);
    }

    #[test]
    fn long_paragraph_by_word_count() {
        let long = vec!["word"; 130].join(" ");
        let text = format!("# Title\n\n{long}\n");
        let issues = linter().lint(&text);
        let issue = issues
            .iter()
            .find(|i| i.rule == Rule::LongParagraph)
            .expect("long-paragraph issue");
        assert_eq!(issue.line, 3);
    }

    #[test]
    fn short_paragraph_is_clean() {
        let issues = lint("Just a few words here, nothing more.");
        assert!(issues.iter().all(|i| i.rule != Rule::LongParagraph));
    }

    #[test]
    fn long_paragraph_by_char_count() {
        let long = "x".repeat(900);
        let issues = linter().lint(&long);
        assert!(issues.iter().any(|i| i.rule == Rule::LongParagraph));
    }

    #[test]
    fn paragraph_buffer_flushes_on_heading() {
        // 70 + 70 words split by a heading stays under the threshold.
        let half = vec!["word"; 70].join(" ");
        let text = format!("{half}\n## Break\n{half}");
        let issues = linter().lint(&text);
        assert!(issues.iter().all(|i| i.rule != Rule::LongParagraph));
    }

    #[test]
    fn flags_unknown_directive() {
        let issues = lint(":::mystery{a=\"b\"}\nbody\n:::");
        let issue = issues
            .iter()
            .find(|i| i.rule == Rule::UnknownDirective)
            .expect("unknown-directive issue");
        assert!(issue.message.contains("mystery"));
        // Unknown directives get no attribute checks.
        assert!(issues.iter().all(|i| i.rule != Rule::DirectiveAttribute));
    }

    #[test]
    fn flags_unsupported_attribute_with_structured_key() {
        let issues = lint(":::callout{tone=\"info\" foo=\"bar\"}\nText\n:::");
        let issue = issues
            .iter()
            .find(|i| i.rule == Rule::DirectiveAttribute)
            .expect("directive-attribute issue");
        assert_eq!(issue.attribute.as_deref(), Some("foo"));
        assert!(issue.message.contains("callout"));
        assert!(issue.message.contains("foo"));
    }

    #[test]
    fn flags_unsupported_attribute_value() {
        let issues = lint(":::chart{type=\"spiral\"}\n:::");
        let issue = issues
            .iter()
            .find(|i| i.rule == Rule::DirectiveAttributeValue)
            .expect("directive-attribute-value issue");
        assert_eq!(issue.attribute.as_deref(), Some("type"));
        assert!(issue.message.contains("type=spiral"));
    }

    #[test]
    fn leaf_directive_is_validated() {
        let issues = lint(":marginnote[aside]{align=\"center\"}");
        assert!(issues
            .iter()
            .any(|i| i.rule == Rule::DirectiveAttributeValue));
    }

    #[test]
    fn malformed_attribute_block_is_silently_empty() {
        let issues = lint(":::callout{tone=\"unclosed}\nText\n:::");
        assert!(issues.iter().all(
            |i| i.rule != Rule::DirectiveAttribute && i.rule != Rule::DirectiveAttributeValue
        ));
    }

    #[test]
    fn invisible_character_flagged_once_per_line() {
        let issues = lint("plain text\nbad\u{200B}text\u{200B}here\nmore");
        let invisible: Vec<_> = issues
            .iter()
            .filter(|i| i.rule == Rule::InvisibleCharacter)
            .collect();
        assert_eq!(invisible.len(), 1);
        assert_eq!(invisible[0].line, 2);
        assert_eq!(invisible[0].column, 4);
    }

    #[test]
    fn tab_is_not_invisible() {
        let issues = lint("col1\tcol2");
        assert!(issues.iter().all(|i| i.rule != Rule::InvisibleCharacter));
    }

    #[test]
    fn rejects_registry_entry_with_bad_name() {
        let mut cfg = Config::default();
        cfg.registry.push(DirectiveSchema {
            name: "no spaces".into(),
            ..DirectiveSchema::default()
        });
        assert!(Linter::new(cfg).is_err());
    }

    #[test]
    fn rejects_value_enum_for_unlisted_attribute() {
        let mut cfg = Config::default();
        let mut entry = DirectiveSchema {
            name: "custom".into(),
            ..DirectiveSchema::default()
        };
        entry.allowed_values.insert("ghost".into(), BTreeSet::new());
        cfg.registry.push(entry);
        assert!(Linter::new(cfg).is_err());
    }

    #[test]
    fn custom_registry_entry_is_honoured() {
        let mut cfg = Config::default();
        cfg.registry.push(schema("widget", &["size"], &[]));
        let linter = Linter::new(cfg).unwrap();
        let issues = linter.lint(":::widget{size=\"3\"}\n:::");
        assert!(issues.is_empty());
    }

    #[test]
    fn counts_unicode_words() {
        assert_eq!(count_words("iki kelime daha"), 3);
        assert_eq!(count_words(""), 0);
    }
}

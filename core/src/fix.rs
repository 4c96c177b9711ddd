//! Deterministic autofixes for a curated subset of diagnostics.
//!
//! Four rule classes are fixable: the two directive-attribute rules,
//! `heading-order`, `duplicate-heading`, and `empty-heading`. Everything else
//! needs human judgment and stays a diagnostic. Content rewrites run before
//! line deletions so issue line numbers stay valid within one batch; the
//! deletions themselves apply in descending line order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::directive::tokenize_attributes;
use crate::{normalize_title, split_lines, LintIssue, Rule, HEADING_RE};

/// One attempted fix. `details` describes what changed for applied records
/// and why nothing changed for skipped ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRecord {
    pub rule: Rule,
    pub line: usize,
    pub details: String,
}

/// The rewritten document plus a full account of every attempted fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    pub next_text: String,
    pub applied: Vec<FixRecord>,
    pub skipped: Vec<FixRecord>,
}

static MESSAGE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"attribute[:\s]+'?([A-Za-z0-9_][A-Za-z0-9_-]*)'?").expect("static regex"));

static MESSAGE_PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z0-9_][A-Za-z0-9_-]*)=").expect("static regex"));

static NUMBERED_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\d+\)$").expect("static regex"));

/// Apply every fixable diagnostic to `text` and return the rewritten
/// document. Fixes are never silently dropped: each attempt lands in either
/// `applied` or `skipped`. Running lint again on `next_text` yields no new
/// issues of the fixed classes.
pub fn apply_fixes(text: &str, issues: &[LintIssue]) -> FixOutcome {
    let mut lines: Vec<String> = split_lines(text).iter().map(|s| s.to_string()).collect();
    let mut applied = Vec::new();
    let mut skipped = Vec::new();
    fix_directive_attributes(&mut lines, issues, &mut applied, &mut skipped);
    fix_heading_order(&mut lines, issues, &mut applied, &mut skipped);
    fix_duplicate_headings(&mut lines, issues, &mut applied, &mut skipped);
    fix_empty_headings(&mut lines, issues, &mut applied, &mut skipped);
    FixOutcome {
        next_text: lines.join("\n"),
        applied,
        skipped,
    }
}

fn record(rule: Rule, line: usize, details: impl Into<String>) -> FixRecord {
    FixRecord {
        rule,
        line,
        details: details.into(),
    }
}

/// Recover the offending attribute key from an issue that carries it only in
/// prose. Kept as a fallback for issues produced by older tooling; fresh
/// issues carry the key in the `attribute` field.
fn key_from_message(message: &str) -> Option<String> {
    if let Some(caps) = MESSAGE_KEY_RE.captures(message) {
        return Some(caps[1].to_string());
    }
    MESSAGE_PAIR_RE
        .captures(message)
        .map(|caps| caps[1].to_string())
}

fn fix_directive_attributes(
    lines: &mut [String],
    issues: &[LintIssue],
    applied: &mut Vec<FixRecord>,
    skipped: &mut Vec<FixRecord>,
) {
    let mut grouped: BTreeMap<usize, Vec<(&LintIssue, Option<String>)>> = BTreeMap::new();
    for issue in issues.iter().filter(|i| {
        matches!(i.rule, Rule::DirectiveAttribute | Rule::DirectiveAttributeValue)
    }) {
        let key = issue
            .attribute
            .clone()
            .or_else(|| key_from_message(&issue.message));
        grouped.entry(issue.line).or_default().push((issue, key));
    }

    for (line_no, entries) in grouped {
        let line = line_no
            .checked_sub(1)
            .and_then(|idx| lines.get(idx))
            .cloned();
        let Some(line) = line else {
            for (issue, _) in entries {
                skipped.push(record(issue.rule, line_no, "line is out of range"));
            }
            continue;
        };

        let mut removal: BTreeSet<String> = BTreeSet::new();
        let mut resolved: Vec<(&LintIssue, String)> = Vec::new();
        for (issue, key) in entries {
            match key {
                Some(key) => {
                    removal.insert(key.clone());
                    resolved.push((issue, key));
                }
                None => skipped.push(record(
                    issue.rule,
                    line_no,
                    "could not recover the attribute key",
                )),
            }
        }
        if removal.is_empty() {
            continue;
        }

        let span = match (line.find('{'), line.rfind('}')) {
            (Some(open), Some(close)) if open < close => Some((open, close)),
            _ => None,
        };
        let Some((open, close)) = span else {
            for (issue, key) in resolved {
                skipped.push(record(
                    issue.rule,
                    line_no,
                    format!("no attribute block found for '{key}'"),
                ));
            }
            continue;
        };

        let inner = &line[open + 1..close];
        let tokens = tokenize_attributes(inner);
        if tokens.is_empty() && !inner.trim().is_empty() {
            for (issue, key) in resolved {
                skipped.push(record(
                    issue.rule,
                    line_no,
                    format!("attribute block is not parseable; left '{key}' alone"),
                ));
            }
            continue;
        }

        let removed: BTreeSet<&str> = tokens
            .iter()
            .filter(|t| removal.contains(&t.key))
            .map(|t| t.key.as_str())
            .collect();
        let kept: Vec<&str> = tokens
            .iter()
            .filter(|t| !removal.contains(&t.key))
            .map(|t| t.raw.as_str())
            .collect();
        lines[line_no - 1] = format!(
            "{}{{{}}}{}",
            &line[..open],
            kept.join(" "),
            &line[close + 1..]
        );

        for (issue, key) in resolved {
            if removed.contains(key.as_str()) {
                applied.push(record(
                    issue.rule,
                    line_no,
                    format!("removed attribute '{key}'"),
                ));
            } else {
                skipped.push(record(
                    issue.rule,
                    line_no,
                    format!("attribute '{key}' is no longer present"),
                ));
            }
        }
    }
}

fn fix_heading_order(
    lines: &mut [String],
    issues: &[LintIssue],
    applied: &mut Vec<FixRecord>,
    skipped: &mut Vec<FixRecord>,
) {
    for issue in issues.iter().filter(|i| i.rule == Rule::HeadingOrder) {
        let line_no = issue.line;
        let line = line_no
            .checked_sub(1)
            .and_then(|idx| lines.get(idx))
            .cloned();
        let Some(line) = line else {
            skipped.push(record(Rule::HeadingOrder, line_no, "line is out of range"));
            continue;
        };
        let Some(caps) = HEADING_RE.captures(&line) else {
            skipped.push(record(
                Rule::HeadingOrder,
                line_no,
                "line is no longer a heading",
            ));
            continue;
        };
        let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
        let hash_run = line.chars().take_while(|c| *c == '#').count();

        let mut prev_level = None;
        for prior in lines[..line_no - 1].iter().rev() {
            if let Some(prior_caps) = HEADING_RE.captures(prior) {
                prev_level = Some(prior_caps.get(1).map(|m| m.as_str().len()).unwrap_or(1));
                break;
            }
        }
        let Some(prev) = prev_level else {
            skipped.push(record(
                Rule::HeadingOrder,
                line_no,
                "no earlier heading to anchor the level",
            ));
            continue;
        };

        let desired = (prev + 1).min(6);
        if level <= desired {
            skipped.push(record(
                Rule::HeadingOrder,
                line_no,
                format!("level {level} is already within range"),
            ));
            continue;
        }
        lines[line_no - 1] = format!("{}{}", "#".repeat(desired), &line[hash_run..]);
        applied.push(record(
            Rule::HeadingOrder,
            line_no,
            format!("demoted heading from level {level} to {desired}"),
        ));
    }
}

fn fix_duplicate_headings(
    lines: &mut [String],
    issues: &[LintIssue],
    applied: &mut Vec<FixRecord>,
    skipped: &mut Vec<FixRecord>,
) {
    let flagged: BTreeMap<usize, &LintIssue> = issues
        .iter()
        .filter(|i| i.rule == Rule::DuplicateHeading)
        .map(|i| (i.line, i))
        .collect();
    if flagged.is_empty() {
        return;
    }

    // Occurrence counting walks every heading, not just the flagged ones, so
    // the appended numbers reflect true document order.
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut handled: BTreeSet<usize> = BTreeSet::new();
    for idx in 0..lines.len() {
        let line_no = idx + 1;
        let title = match HEADING_RE.captures(&lines[idx]) {
            Some(caps) => caps.get(2).map(|m| m.as_str()).unwrap_or("").trim().to_string(),
            None => continue,
        };
        if title.is_empty() {
            if flagged.contains_key(&line_no) {
                handled.insert(line_no);
                skipped.push(record(
                    Rule::DuplicateHeading,
                    line_no,
                    "heading no longer has a title",
                ));
            }
            continue;
        }
        let count = {
            let entry = counts.entry(normalize_title(&title)).or_insert(0);
            *entry += 1;
            *entry
        };
        if !flagged.contains_key(&line_no) {
            continue;
        }
        handled.insert(line_no);
        if count <= 1 {
            skipped.push(record(
                Rule::DuplicateHeading,
                line_no,
                "heading is now the first occurrence",
            ));
            continue;
        }
        if NUMBERED_TITLE_RE.is_match(&title) {
            skipped.push(record(
                Rule::DuplicateHeading,
                line_no,
                "heading already carries a numeric suffix",
            ));
            continue;
        }
        let rebuilt = format!("{} ({count})", lines[idx].trim_end());
        lines[idx] = rebuilt;
        applied.push(record(
            Rule::DuplicateHeading,
            line_no,
            format!("renamed to `{title} ({count})`"),
        ));
    }

    for line_no in flagged.keys().filter(|l| !handled.contains(l)) {
        skipped.push(record(
            Rule::DuplicateHeading,
            *line_no,
            "line is no longer a heading",
        ));
    }
}

fn fix_empty_headings(
    lines: &mut Vec<String>,
    issues: &[LintIssue],
    applied: &mut Vec<FixRecord>,
    skipped: &mut Vec<FixRecord>,
) {
    let mut flagged: Vec<usize> = issues
        .iter()
        .filter(|i| i.rule == Rule::EmptyHeading)
        .map(|i| i.line)
        .collect();
    // Descending order keeps the remaining indices valid while lines vanish.
    flagged.sort_unstable_by(|a, b| b.cmp(a));
    flagged.dedup();

    for line_no in flagged {
        let Some(line) = line_no.checked_sub(1).and_then(|idx| lines.get(idx)) else {
            skipped.push(record(Rule::EmptyHeading, line_no, "line is out of range"));
            continue;
        };
        let still_empty = HEADING_RE
            .captures(line)
            .map(|caps| caps.get(2).map(|m| m.as_str()).unwrap_or("").trim().is_empty())
            .unwrap_or(false);
        if !still_empty {
            skipped.push(record(
                Rule::EmptyHeading,
                line_no,
                "line is no longer an empty heading",
            ));
            continue;
        }
        lines.remove(line_no - 1);
        applied.push(record(Rule::EmptyHeading, line_no, "deleted empty heading"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, Linter};

    fn fix(text: &str) -> FixOutcome {
        let linter = Linter::new(Config::default()).unwrap();
        let issues = linter.lint(text);
        apply_fixes(text, &issues)
    }

    #[test]
    fn removes_flagged_attributes_and_keeps_the_rest() {
        let text = ":::callout {tone=\"invalid\" title=\"Note\" foo=\"bar\"}\nText\n:::";
        let outcome = fix(text);
        let first = outcome.next_text.lines().next().unwrap();
        assert_eq!(first, ":::callout {title=\"Note\"}");
        assert_eq!(outcome.applied.len(), 2);
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn attribute_fix_without_brace_span_is_skipped() {
        let issues = vec![LintIssue {
            rule: Rule::DirectiveAttribute,
            severity: crate::Severity::Info,
            message: "Directive 'callout' does not support attribute 'foo'.".into(),
            line: 1,
            column: 1,
            attribute: Some("foo".into()),
        }];
        let outcome = apply_fixes("plain text without braces", &issues);
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].details.contains("no attribute block"));
    }

    #[test]
    fn attribute_key_recovered_from_message_when_field_is_missing() {
        let issues = vec![LintIssue {
            rule: Rule::DirectiveAttribute,
            severity: crate::Severity::Info,
            message: "Directive 'callout' does not support attribute 'foo'.".into(),
            line: 1,
            column: 1,
            attribute: None,
        }];
        let outcome = apply_fixes(":::callout {tone=\"info\" foo=\"bar\"}", &issues);
        assert_eq!(
            outcome.next_text.lines().next().unwrap(),
            ":::callout {tone=\"info\"}"
        );
        assert_eq!(outcome.applied.len(), 1);
    }

    #[test]
    fn demotes_heading_that_skips_levels() {
        let outcome = fix("# Title\n\n#### Deep heading\n\nText.");
        assert!(outcome.next_text.contains("\n## Deep heading\n"));
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome.applied[0].details.contains("4 to 2"));
    }

    #[test]
    fn heading_fix_never_raises_a_level() {
        // Stale issue pointing at a heading that is already shallow enough.
        let issues = vec![LintIssue {
            rule: Rule::HeadingOrder,
            severity: crate::Severity::Warning,
            message: "Heading level jumps from 1 to 4.".into(),
            line: 3,
            column: 1,
            attribute: None,
        }];
        let text = "# Title\n\n## Shallow";
        let outcome = apply_fixes(text, &issues);
        assert_eq!(outcome.next_text, text);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].details.contains("already within range"));
    }

    #[test]
    fn heading_fix_without_previous_heading_is_skipped() {
        let issues = vec![LintIssue {
            rule: Rule::HeadingOrder,
            severity: crate::Severity::Warning,
            message: "Heading level jumps from 1 to 4.".into(),
            line: 1,
            column: 1,
            attribute: None,
        }];
        let outcome = apply_fixes("#### Only heading", &issues);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].details.contains("no earlier heading"));
    }

    #[test]
    fn renames_duplicate_headings_with_running_count() {
        let text = "## Intro\n\n## Intro\n\n## Intro";
        let outcome = fix(text);
        let headings: Vec<&str> = outcome.next_text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(headings, vec!["## Intro", "## Intro (2)", "## Intro (3)"]);
    }

    #[test]
    fn numbered_duplicate_is_left_alone() {
        let issues = vec![LintIssue {
            rule: Rule::DuplicateHeading,
            severity: crate::Severity::Info,
            message: "Heading `Intro (2)` repeats the heading on line 1.".into(),
            line: 3,
            column: 1,
            attribute: None,
        }];
        let text = "## Intro (2)\n\n## Intro (2)";
        let outcome = apply_fixes(text, &issues);
        assert_eq!(outcome.next_text, text);
        assert!(outcome.skipped[0].details.contains("numeric suffix"));
    }

    #[test]
    fn deletes_empty_headings_in_descending_order() {
        let text = "## \n\nSome text.\n\n### \n\nMore text.";
        let outcome = fix(text);
        assert_eq!(outcome.next_text, "\nSome text.\n\n\nMore text.");
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.applied[0].line, 5);
        assert_eq!(outcome.applied[1].line, 1);
    }

    #[test]
    fn empty_heading_fix_skips_changed_lines() {
        let issues = vec![LintIssue {
            rule: Rule::EmptyHeading,
            severity: crate::Severity::Warning,
            message: "Heading has no title text.".into(),
            line: 1,
            column: 1,
            attribute: None,
        }];
        let outcome = apply_fixes("## Not empty anymore", &issues);
        assert_eq!(outcome.next_text, "## Not empty anymore");
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[test]
    fn unfixable_rules_produce_no_records() {
        let text = format!("{}\n", vec!["word"; 130].join(" "));
        let outcome = fix(&text);
        assert!(outcome.applied.is_empty());
        assert!(outcome.skipped.is_empty());
    }
}

use std::{
    collections::BTreeMap,
    env,
    ffi::{OsStr, OsString},
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{ArgAction, Parser};
use console::style;
use globset::{Glob, GlobSet, GlobSetBuilder};
use mdg_core::{
    apply_fixes, count_words, Config, ContentBlock, FixRecord, LintIssue, Linter, Rule, Severity,
    Splitter,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

const DEFAULT_IGNORE_GLOBS: &[&str] = &[
    "**/node_modules/**",
    "**/target/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
];

/// MarkGuard CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "mdg",
    about = "Lint Markdown documents for directive and structure problems."
)]
struct Args {
    /// Path to config file (YAML). Defaults to markguard.yml if present.
    #[arg(long, default_value = "markguard.yml")]
    config: PathBuf,

    /// Emit JSON output for automation.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Strict mode: exit non-zero on warnings as well as errors.
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,

    /// Suppress per-file diagnostics output.
    #[arg(long, action = ArgAction::SetTrue)]
    quiet: bool,

    /// Files or directories to lint.
    #[arg(value_name = "PATH", default_value = ".", num_args = 0..)]
    paths: Vec<PathBuf>,

    /// Report only these rules (comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "RULE[,RULE]")]
    only: Vec<String>,

    /// Report additional rules (comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "RULE[,RULE]")]
    enable: Vec<String>,

    /// Suppress these rules (comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "RULE[,RULE]")]
    disable: Vec<String>,

    /// Extra ignore globs applied while collecting files (repeatable).
    #[arg(long = "ignore", value_name = "GLOB", num_args = 0..)]
    ignore: Vec<String>,
}

#[derive(Debug, Parser)]
#[command(name = "mdg fix", about = "Apply deterministic fixes for fixable diagnostics.")]
struct FixArgs {
    /// Path to config file (YAML).
    #[arg(long, default_value = "markguard.yml")]
    config: PathBuf,

    /// Rewrite files in place instead of printing the fixed text.
    #[arg(long, action = ArgAction::SetTrue)]
    write: bool,

    /// Emit JSON fix reports instead of text output.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Files or directories to fix.
    #[arg(value_name = "PATH", num_args = 1..)]
    paths: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "mdg split", about = "Split a document into prose and directive blocks.")]
struct SplitArgs {
    /// Path to config file (YAML).
    #[arg(long, default_value = "markguard.yml")]
    config: PathBuf,

    /// Emit the block list as JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Document to split.
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct FileResult {
    path: String,
    word_count: usize,
    cache_key: String,
    rule_counts: BTreeMap<Rule, usize>,
    issues: Vec<LintIssue>,
}

#[derive(Debug, Serialize)]
struct OutputReport {
    files: Vec<FileResult>,
    total_issues: usize,
    errors: usize,
    warnings: usize,
    infos: usize,
}

#[derive(Debug, Serialize)]
struct FixFileReport {
    path: String,
    changed: bool,
    remaining_issues: usize,
    applied: Vec<FixRecord>,
    skipped: Vec<FixRecord>,
}

fn main() -> anyhow::Result<()> {
    let argv: Vec<OsString> = env::args_os().collect();
    if argv.len() > 1 && argv[1].as_os_str() == OsStr::new("fix") {
        let forwarded = forward_args(&argv);
        return run_fix(FixArgs::parse_from(forwarded));
    }
    if argv.len() > 1 && argv[1].as_os_str() == OsStr::new("split") {
        let forwarded = forward_args(&argv);
        return run_split(SplitArgs::parse_from(forwarded));
    }
    run_lint(Args::parse())
}

fn forward_args(argv: &[OsString]) -> Vec<OsString> {
    let mut forwarded = Vec::with_capacity(argv.len() - 1);
    forwarded.push(argv[0].clone());
    forwarded.extend_from_slice(&argv[2..]);
    forwarded
}

fn run_lint(args: Args) -> anyhow::Result<()> {
    let (cfg, config_root) = load_config(&args.config)?;
    let linter = Linter::new(cfg)?;

    let ignore = build_ignore_set(&args.ignore)?;
    let mut files = collect_files(&args.paths, &ignore)?;
    files.sort();

    let mut file_results = Vec::new();
    let mut errors = 0usize;
    let mut warnings = 0usize;
    let mut infos = 0usize;

    for path in files {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut issues = linter.lint(&content);
        filter_issues(&mut issues, &args.only, &args.enable, &args.disable);

        for issue in &issues {
            match issue.severity {
                Severity::Error => errors += 1,
                Severity::Warning => warnings += 1,
                Severity::Info => infos += 1,
            }
        }

        let rel_path = pathdiff::diff_paths(&path, &config_root).unwrap_or_else(|| path.clone());
        let display_path = rel_path.to_string_lossy().replace('\\', "/");
        let word_count = count_words(&content);

        if !args.quiet && !args.json {
            print_human_report(&display_path, &issues, word_count);
        }

        file_results.push(FileResult {
            path: display_path,
            word_count,
            cache_key: cache_key(&content),
            rule_counts: rule_counts(&issues),
            issues,
        });
    }

    let total_issues = errors + warnings + infos;
    if args.json {
        let output = OutputReport {
            files: file_results,
            total_issues,
            errors,
            warnings,
            infos,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !args.quiet {
        println!(
            "\n{} issues ({} errors, {} warnings, {} infos)",
            total_issues, errors, warnings, infos
        );
    }

    if errors > 0 || (args.strict && warnings > 0) {
        std::process::exit(1);
    }
    Ok(())
}

fn run_fix(args: FixArgs) -> anyhow::Result<()> {
    let (cfg, _) = load_config(&args.config)?;
    let linter = Linter::new(cfg)?;

    let mut files = collect_files(&args.paths, &None)?;
    files.sort();

    let mut reports = Vec::new();
    for path in files {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let issues = linter.lint(&content);
        let outcome = apply_fixes(&content, &issues);
        let remaining = linter.lint(&outcome.next_text).len();
        let changed = outcome.next_text != content;

        if args.write {
            if changed {
                fs::write(&path, &outcome.next_text)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        } else if !args.json {
            print!("{}", outcome.next_text);
        }

        if !args.json {
            eprintln!(
                "{}: {} applied, {} skipped, {} issues remaining",
                style(path.display()).bold(),
                outcome.applied.len(),
                outcome.skipped.len(),
                remaining
            );
        }

        reports.push(FixFileReport {
            path: path.to_string_lossy().to_string(),
            changed,
            remaining_issues: remaining,
            applied: outcome.applied,
            skipped: outcome.skipped,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(())
}

fn run_split(args: SplitArgs) -> anyhow::Result<()> {
    let (cfg, _) = load_config(&args.config)?;
    let splitter = Splitter::new(&cfg);
    let content = fs::read_to_string(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    let blocks = splitter.split(&content);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&blocks)?);
        return Ok(());
    }

    for (idx, block) in blocks.iter().enumerate() {
        match block {
            ContentBlock::Prose { markdown } => {
                println!(
                    "{:>3} {} ({} lines)",
                    idx + 1,
                    style("prose").bold(),
                    markdown.lines().count()
                );
            }
            ContentBlock::Directive {
                kind,
                attributes,
                payload,
                parse_error,
                ..
            } => {
                let status = if payload.is_some() {
                    style("payload ok").green().to_string()
                } else if let Some(err) = parse_error {
                    style(format!("parse error: {err}")).red().to_string()
                } else {
                    "no payload".to_string()
                };
                println!(
                    "{:>3} {} directive ({} attributes, {})",
                    idx + 1,
                    style(kind).bold(),
                    attributes.len(),
                    status
                );
            }
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<(Config, PathBuf)> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&text)
            .with_context(|| format!("Invalid config structure in {}", path.display()))?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or(env::current_dir()?);
        Ok((cfg, dir))
    } else {
        Ok((Config::default(), env::current_dir()?))
    }
}

fn build_ignore_set(extra: &[String]) -> anyhow::Result<Option<GlobSet>> {
    let mut builder = GlobSetBuilder::new();
    for pattern in DEFAULT_IGNORE_GLOBS {
        builder.add(Glob::new(pattern)?);
    }
    for pattern in extra {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

fn collect_files(paths: &[PathBuf], ignore: &Option<GlobSet>) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let fp = entry.path();
                if let Some(set) = ignore {
                    if set.is_match(fp) {
                        continue;
                    }
                }
                if is_supported_file(fp) {
                    files.push(fp.to_path_buf());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn is_supported_file(path: &Path) -> bool {
    match path.extension().and_then(OsStr::to_str) {
        Some(ext) => matches!(ext.to_lowercase().as_str(), "md" | "markdown" | "mdx" | "txt"),
        None => false,
    }
}

fn parse_rule(name: &str) -> Option<Rule> {
    let n = name.trim().to_lowercase();
    match n.as_str() {
        "empty-heading" => Some(Rule::EmptyHeading),
        "heading-order" => Some(Rule::HeadingOrder),
        "duplicate-heading" => Some(Rule::DuplicateHeading),
        "long-paragraph" => Some(Rule::LongParagraph),
        "unknown-directive" => Some(Rule::UnknownDirective),
        "directive-attribute" => Some(Rule::DirectiveAttribute),
        "directive-attribute-value" => Some(Rule::DirectiveAttributeValue),
        "invisible-character" => Some(Rule::InvisibleCharacter),
        _ => None,
    }
}

fn filter_issues(issues: &mut Vec<LintIssue>, only: &[String], enable: &[String], disable: &[String]) {
    let only_set: Vec<Rule> = only.iter().filter_map(|s| parse_rule(s)).collect();
    let enable_set: Vec<Rule> = enable.iter().filter_map(|s| parse_rule(s)).collect();
    let disable_set: Vec<Rule> = disable.iter().filter_map(|s| parse_rule(s)).collect();
    issues.retain(|issue| {
        if !only_set.is_empty() {
            only_set.contains(&issue.rule)
        } else if !enable_set.is_empty() {
            !disable_set.contains(&issue.rule) || enable_set.contains(&issue.rule)
        } else {
            !disable_set.contains(&issue.rule)
        }
    });
}

fn rule_counts(issues: &[LintIssue]) -> BTreeMap<Rule, usize> {
    let mut counts = BTreeMap::new();
    for issue in issues {
        *counts.entry(issue.rule).or_default() += 1;
    }
    counts
}

/// Content-derived cache key (hash plus length) the caller can memoize
/// lint/fix/split results under.
fn cache_key(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}:{}", hasher.finalize(), content.len())
}

fn print_human_report(path: &str, issues: &[LintIssue], word_count: usize) {
    println!("{} ({} words)", style(path).bold(), word_count);
    if issues.is_empty() {
        println!("  {}", style("clean").green());
        return;
    }
    for issue in issues {
        let tag = match issue.severity {
            Severity::Error => style(issue.rule).red(),
            Severity::Warning => style(issue.rule).yellow(),
            Severity::Info => style(issue.rule).cyan(),
        };
        println!("  [{}] {}:{} {}", tag, issue.line, issue.column, issue.message);
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use markup_patcher::config::{
    apply_rules, check_rules, document_path, load_from_path, ApplicationError, ApplyMode,
};
use markup_patcher::engine::{Outcome, PatchError, RuleStatus};
use markup_patcher::verifier::{CaptureRequest, HeadlessBrowser, Verifier, VerifierError};
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "markup-patcher")]
#[command(about = "Idempotent rule-based patching of markup and script files", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply rule files to their documents
    Apply {
        /// Patch root (defaults to MARKUP_PATCHER_ROOT, then the current directory)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Specific rule file to apply (otherwise applies all in patches/)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Show per-rule status without writing
    Status {
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Succeed only if every rule is already applied
    Verify {
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// List rule files, their documents and rules
    List {
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Screenshot a page with a headless browser
    Capture {
        /// Page to render
        #[arg(long)]
        url: String,

        /// Where to write the PNG
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long, default_value_t = 375)]
        width: u32,

        #[arg(long, default_value_t = 812)]
        height: u32,

        #[arg(long)]
        user_agent: Option<String>,

        /// Milliseconds to let the page settle
        #[arg(long, default_value_t = 3000)]
        wait_ms: u64,

        /// Browser binary (auto-detected on PATH if not specified)
        #[arg(long)]
        browser: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Apply {
            root,
            rules,
            dry_run,
            diff,
        } => cmd_apply(root, rules, dry_run, diff),

        Commands::Status { root, json } => cmd_status(root, json),

        Commands::Verify { root } => cmd_verify(root),

        Commands::List { root } => cmd_list(root),

        Commands::Capture {
            url,
            out,
            width,
            height,
            user_agent,
            wait_ms,
            browser,
        } => {
            let mut request = CaptureRequest::new(url)
                .with_viewport(width, height)
                .with_wait_ms(wait_ms);
            if let Some(user_agent) = user_agent {
                request = request.with_user_agent(user_agent);
            }
            cmd_capture(request, &out, browser)
        }
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve the patch root.
///
/// Priority order:
/// 1. Explicit --root flag
/// 2. MARKUP_PATCHER_ROOT environment variable
/// 3. Current directory
fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_root {
        return Ok(path.canonicalize()?);
    }

    if let Ok(env_path) = env::var("MARKUP_PATCHER_ROOT") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: MARKUP_PATCHER_ROOT is set but path doesn't exist: {}",
                env_path
            )
            .yellow()
        );
    }

    Ok(env::current_dir()?)
}

/// Discover all .toml rule files directly inside `<root>/patches`.
fn discover_rule_files(root: &Path) -> Result<Vec<PathBuf>> {
    let patches_dir = root.join("patches");
    if !patches_dir.is_dir() {
        anyhow::bail!("No patches directory found at {}", patches_dir.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&patches_dir).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No .toml rule files found in {}", patches_dir.display());
    }
    Ok(files)
}

/// Show unified diff between original and modified content
fn display_diff(file: &str, original: &str, modified: &str) {
    println!("\n{}", format!("--- {} (original)", file).dimmed());
    println!("{}", format!("+++ {} (patched)", file).dimmed());

    let diff = TextDiff::from_lines(original, modified);
    let mut unified = diff.unified_diff();
    unified.context_radius(3);

    for hunk in unified.iter_hunks() {
        println!("{}", hunk.header().to_string().cyan());
        for change in hunk.iter_changes() {
            let line = match change.tag() {
                ChangeTag::Delete => format!("-{}", change).red(),
                ChangeTag::Insert => format!("+{}", change).green(),
                ChangeTag::Equal => format!(" {}", change).normal(),
            };
            print!("{}", line);
            if change.missing_newline() {
                println!();
            }
        }
    }
}

fn explain_failure(error: &ApplicationError) {
    match error {
        ApplicationError::Patch(PatchError::PatternNotFound { hint, .. }) => {
            eprintln!("  {}", "CONFLICT: Pattern matched no text".red());
            eprintln!("  Possible causes:");
            eprintln!("    - The document drifted since the rule was written");
            eprintln!("    - The rule was applied by hand without matching its replacement");
            if let Some(hint) = hint {
                eprintln!("  Closest text: {}", hint);
            }
        }
        ApplicationError::Patch(PatchError::NotIdempotent { .. }) => {
            eprintln!(
                "  {}",
                "Action: add a guard pattern that matches once the rule is applied".yellow()
            );
        }
        _ => {}
    }
}

fn cmd_apply(
    root: Option<PathBuf>,
    rules: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let root = resolve_root(root)?;
    let rule_files = match rules {
        Some(path) => vec![path],
        None => discover_rule_files(&root)?,
    };

    println!("Root: {}", root.display());
    println!();

    let mode = if dry_run {
        ApplyMode::DryRun
    } else {
        ApplyMode::Write
    };

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_failed = 0;

    for rule_file in rule_files {
        println!("Loading rules from {}...", rule_file.display());
        let config = load_from_path(&rule_file)?;

        if dry_run {
            println!("{}", "  [DRY RUN - showing what would be applied]".cyan());
        }

        for report in apply_rules(&config, &root, mode) {
            let run = match report.result {
                Ok(run) => run,
                Err(e) => {
                    eprintln!("{} {}: Error - {}", "✗".red(), report.document, e);
                    explain_failure(&e);
                    total_failed += 1;
                    continue;
                }
            };

            for outcome in &run.report.outcomes {
                match outcome.status {
                    RuleStatus::Applied => {
                        let verb = if dry_run { "Would apply" } else { "Applied" };
                        println!(
                            "{} {}: {} to {} ({} span{})",
                            "✓".green(),
                            outcome.rule,
                            verb,
                            report.document,
                            outcome.applied_count,
                            if outcome.applied_count == 1 { "" } else { "s" }
                        );
                        total_applied += 1;
                    }
                    RuleStatus::AlreadyApplied => {
                        println!(
                            "{} {}: Already applied to {}",
                            "⊙".yellow(),
                            outcome.rule,
                            report.document
                        );
                        total_already_applied += 1;
                    }
                    // Required misses fail the whole run before reaching here
                    RuleStatus::NotFound => {
                        println!("{} {}: Not found", "⊘".cyan(), outcome.rule);
                    }
                }
            }

            if show_diff && run.report.document.text() != run.original {
                display_diff(&report.document, &run.original, run.report.document.text());
            }
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

#[derive(serde::Serialize)]
struct StatusRecord {
    file: String,
    document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn cmd_status(root: Option<PathBuf>, json: bool) -> Result<()> {
    let root = resolve_root(root)?;
    let rule_files = discover_rule_files(&root)?;

    let mut applied = Vec::new();
    let mut pending = Vec::new();
    let mut failed = Vec::new();
    let mut records = Vec::new();

    for rule_file in &rule_files {
        let config = load_from_path(rule_file)?;
        let file = rule_file.display().to_string();

        for check in check_rules(&config, &root) {
            let rules = match check.result {
                Ok(rules) => rules,
                Err(e) => {
                    failed.push((check.document.clone(), e.to_string()));
                    records.push(StatusRecord {
                        file: file.clone(),
                        document: check.document,
                        rule: None,
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            for rule in rules {
                let label = format!("{} ({})", rule.rule, check.document);
                match &rule.result {
                    Ok(outcome) => match outcome.status {
                        RuleStatus::AlreadyApplied => applied.push(label),
                        RuleStatus::Applied => pending.push(label),
                        RuleStatus::NotFound => {
                            failed.push((label, "pattern not found".to_string()))
                        }
                    },
                    Err(e) => failed.push((label, e.to_string())),
                }

                let (outcome, error) = match rule.result {
                    Ok(outcome) => (Some(outcome), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                records.push(StatusRecord {
                    file: file.clone(),
                    document: check.document.clone(),
                    rule: Some(rule.rule),
                    outcome,
                    error,
                });
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("{}", "Rule Status Report".bold());
    println!("Root: {}", root.display());
    println!();

    if !applied.is_empty() {
        println!(
            "{} {} ({} rules)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for label in &applied {
            println!("  - {}", label);
        }
        println!();
    }

    if !pending.is_empty() {
        println!(
            "{} {} ({} rules)",
            "⊙".yellow(),
            "NOT APPLIED".yellow().bold(),
            pending.len()
        );
        for label in &pending {
            println!("  - {}", label);
        }
        println!();
    }

    if !failed.is_empty() {
        println!(
            "{} {} ({} rules)",
            "✗".red(),
            "FAILING".red().bold(),
            failed.len()
        );
        for (label, reason) in &failed {
            println!("  - {} ({})", label, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_verify(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let rule_files = discover_rule_files(&root)?;

    println!("{}", "Verifying rules...".bold());
    println!("Root: {}", root.display());
    println!();

    let mut verified = 0;
    let mut mismatch = 0;

    for rule_file in rule_files {
        let config = load_from_path(&rule_file)?;

        for check in check_rules(&config, &root) {
            let rules = match check.result {
                Ok(rules) => rules,
                Err(e) => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), check.document);
                    eprintln!("  Error: {}", e);
                    mismatch += 1;
                    continue;
                }
            };

            for rule in rules {
                match rule.result {
                    Ok(outcome) if outcome.status == RuleStatus::AlreadyApplied => {
                        println!("{} {}: Verified (already applied)", "✓".green(), rule.rule);
                        verified += 1;
                    }
                    Ok(outcome) => {
                        eprintln!("{} {}: MISMATCH", "✗".red(), rule.rule);
                        eprintln!("  Expected: rule already applied");
                        eprintln!("  Found: {}", outcome);
                        eprintln!("  Location: {}", check.document);
                        mismatch += 1;
                    }
                    Err(e) => {
                        eprintln!("{} {}: MISMATCH", "✗".red(), rule.rule);
                        eprintln!("  Error: {}", e);
                        mismatch += 1;
                    }
                }
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} verified", format!("{}", verified).green());
    println!("  {} mismatch", format!("{}", mismatch).red());

    if mismatch > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;

    for rule_file in discover_rule_files(&root)? {
        let config = load_from_path(&rule_file)?;
        let title = if config.meta.name.is_empty() {
            rule_file.display().to_string()
        } else {
            format!("{} ({})", config.meta.name, rule_file.display())
        };
        println!("{}", title.bold());
        if let Some(description) = &config.meta.description {
            println!("  {}", description.dimmed());
        }

        for group in config.rule_sets()? {
            let path = document_path(&root, &group.document);
            let marker = if path.exists() {
                "".normal()
            } else {
                " (missing)".red()
            };
            println!("  {}{}", group.document, marker);
            for rule in &group.rules {
                let policy = rule.policy();
                println!(
                    "    - {} [{}{}] {}",
                    rule.name(),
                    policy.mode,
                    if policy.required { ", required" } else { "" },
                    rule.pattern().to_string().dimmed()
                );
            }
        }
        println!();
    }

    Ok(())
}

fn cmd_capture(request: CaptureRequest, out: &Path, browser: Option<PathBuf>) -> Result<()> {
    let browser = match browser {
        Some(path) => HeadlessBrowser::new(path),
        None => HeadlessBrowser::detect()
            .ok_or_else(|| anyhow::anyhow!("No Chromium-family browser found on PATH"))?,
    };

    println!("Capturing {} with {}", request.url, browser.binary().display());

    match browser.capture(&request) {
        Ok(capture) => {
            fs::write(out, &capture.png)?;
            println!(
                "{} Screenshot written to {} ({} bytes)",
                "✓".green(),
                out.display(),
                capture.png.len()
            );
            if !capture.diagnostics.is_empty() {
                println!(
                    "{} {} page problem(s) logged",
                    "⊙".yellow(),
                    capture.diagnostics.len()
                );
            }
            Ok(())
        }
        Err(VerifierError::Render { message }) => {
            tracing::warn!(url = %request.url, "render failed: {message}");
            println!("{} No screenshot captured", "⊙".yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

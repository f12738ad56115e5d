//! Markup Patcher: idempotent rule-based patching of markup and script
//!
//! A small patch engine that locates text in a document by literal block or
//! regular expression and replaces it from a template, leaving every byte
//! outside the matched spans untouched.
//!
//! # Architecture
//!
//! - [`Pattern`] finds non-overlapping spans ([`pattern::find`])
//! - [`Rule`] pairs a pattern with a replacement template and a [`Policy`]
//! - [`Engine`] folds a [`RuleSet`] over a [`Document`], threading the
//!   output of each rule into the next and reporting an [`Outcome`] per rule
//! - [`config`] loads rule files and runs the load → transform → save
//!   pipeline
//!
//! # Idempotence
//!
//! A strict [`Engine`] (the default) only returns output that the same rule
//! set leaves unchanged. After each replacement it checks that the rule's
//! pattern no longer matches the inserted text (or that the rule's guard
//! now matches). After the whole set has run it evaluates every rule once
//! more on the final text, which catches a later rule recreating an earlier
//! rule's pattern. Either violation is [`PatchError::NotIdempotent`]; a
//! lenient engine logs a warning and keeps the output.
//!
//! Rules that insert text next to an anchor they keep (a template that
//! re-emits `$1`) always match their own output. Give such rules a guard
//! that matches once the insertion is present:
//!
//! ```
//! use markup_patcher::{apply, Document, Pattern, Rule};
//!
//! let rule = Rule::new(
//!     "after-init",
//!     Pattern::regex(r"(init\(\);)").unwrap(),
//!     "$1\nsetup();",
//! )
//! .with_guard(Pattern::literal("setup();").unwrap());
//!
//! let once = apply(&Document::new("app.js", "init();"), &rule).unwrap();
//! let twice = apply(&once.document, &rule).unwrap();
//! assert_eq!(twice.document.text(), "init();\nsetup();");
//! ```
//!
//! # Example
//!
//! ```
//! use markup_patcher::{run, Document, Pattern, Rule, RuleSet};
//!
//! let rules = RuleSet::new(vec![Rule::new(
//!     "drop-a",
//!     Pattern::literal("<div>A</div>").unwrap(),
//!     "",
//! )]);
//!
//! let doc = Document::new("index.html", "<div>A</div>\n<div>B</div>");
//! let report = run(doc, &rules).unwrap();
//! assert_eq!(report.document.text(), "\n<div>B</div>");
//! ```

pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod pattern;
pub mod rule;
pub mod safety;
pub mod verifier;

// Re-exports
pub use config::{
    apply_rules, check_rules, load_from_path, load_from_str, ApplicationError, ApplyMode,
    ConfigError, RuleConfig,
};
pub use document::{Document, DocumentError, SaveResult};
pub use engine::{apply, run, Engine, Outcome, PatchError, Patched, RuleCheck, RuleStatus, RunReport};
pub use pattern::{find, Match, Matches, Pattern, PatternError, RegexOptions};
pub use rule::{Mode, Policy, Rule, RuleError, RuleSet};
pub use safety::{RootGuard, SafetyError};
pub use verifier::{Capture, CaptureRequest, HeadlessBrowser, Verifier, VerifierError, Viewport};

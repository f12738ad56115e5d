//! Patch engine - applies rules to documents with idempotency checks
//!
//! This module provides rule application that:
//! - Skips rules whose guard shows they are already applied
//! - Replaces the first or every match in a single linear pass
//! - Verifies a rule would be a no-op on its own output
//! - Reports an [`Outcome`] for each rule

use crate::document::Document;
use crate::pattern::{find, Match, Pattern};
use crate::rule::{Mode, Rule, RuleError, RuleSet};
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Minimum normalized similarity for a line to be offered as a drift hint.
const HINT_THRESHOLD: f64 = 0.6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("required rule '{rule}' matched no text{}", .hint.as_ref().map(|h| format!(" (closest: {h})")).unwrap_or_default())]
    PatternNotFound { rule: String, hint: Option<String> },

    #[error("rule '{rule}' is not idempotent: its pattern matches its own output at byte {offset}")]
    NotIdempotent { rule: String, offset: usize },

    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// How a single rule application ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleStatus {
    /// At least one span was replaced
    Applied,
    /// Guard matched, pattern absent, or replacement identical to the match
    AlreadyApplied,
    /// Required rule whose pattern is absent
    NotFound,
}

/// Per-rule result. `matched == false` implies `applied_count == 0` and an
/// unchanged document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[must_use = "Outcome should be checked for applied/already-applied"]
pub struct Outcome {
    pub rule: String,
    pub status: RuleStatus,
    pub applied_count: usize,
    pub matched: bool,
}

impl Outcome {
    fn already_applied(rule: &Rule, matched: bool) -> Self {
        Self {
            rule: rule.name().to_string(),
            status: RuleStatus::AlreadyApplied,
            applied_count: 0,
            matched,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            RuleStatus::Applied => write!(
                f,
                "{}: applied ({} span{})",
                self.rule,
                self.applied_count,
                if self.applied_count == 1 { "" } else { "s" }
            ),
            RuleStatus::AlreadyApplied => write!(f, "{}: already applied", self.rule),
            RuleStatus::NotFound => write!(f, "{}: pattern not found", self.rule),
        }
    }
}

/// Output of one rule application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub document: Document,
    pub outcome: Outcome,
}

/// Output of a full rule-set run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub document: Document,
    pub outcomes: Vec<Outcome>,
}

impl RunReport {
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == RuleStatus::Applied)
            .count()
    }
}

/// Diagnostic result of one rule in a [`Engine::check`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCheck {
    pub rule: String,
    pub result: Result<Outcome, PatchError>,
}

/// Applies rules to documents.
///
/// Strict engines (the default) refuse rules whose output would be matched
/// again on the next run. Lenient engines log the problem and keep going.
#[derive(Debug, Clone, Copy)]
pub struct Engine {
    strict: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Apply one rule to a document.
    pub fn apply(&self, document: &Document, rule: &Rule) -> Result<Patched, PatchError> {
        let patched = self.evaluate(document, rule)?;
        if patched.outcome.status == RuleStatus::NotFound {
            return Err(PatchError::PatternNotFound {
                rule: rule.name().to_string(),
                hint: drift_hint(document.text(), rule.pattern()),
            });
        }
        Ok(patched)
    }

    /// Apply every rule in order, threading each output into the next rule.
    ///
    /// Stops at the first failing rule; nothing is persisted here, so a
    /// failed run leaves storage untouched. Once every rule has run, each
    /// rule is evaluated again on the final text: a later rule may recreate
    /// an earlier rule's pattern, and a second run would then change the
    /// document again.
    pub fn run(&self, document: Document, rules: &RuleSet) -> Result<RunReport, PatchError> {
        let mut document = document;
        let mut outcomes = Vec::with_capacity(rules.len());

        for rule in rules {
            let patched = self.apply(&document, rule)?;
            document = patched.document;
            outcomes.push(patched.outcome);
        }

        if outcomes.iter().any(|o| o.status == RuleStatus::Applied) {
            self.ensure_settled(&document, rules)?;
        }

        Ok(RunReport {
            document,
            outcomes,
        })
    }

    /// Fail (or warn, when lenient) if any rule would apply again to the
    /// output of the whole rule set.
    fn ensure_settled(&self, document: &Document, rules: &RuleSet) -> Result<(), PatchError> {
        for rule in rules {
            let reapplies = match self.evaluate(document, rule) {
                Ok(patched) => patched.outcome.status == RuleStatus::Applied,
                Err(PatchError::NotIdempotent { .. }) => true,
                Err(e) => return Err(e),
            };
            if !reapplies {
                continue;
            }

            let offset = find(document.text(), rule.pattern())
                .next()
                .map_or(0, |m| m.start());
            if self.strict {
                return Err(PatchError::NotIdempotent {
                    rule: rule.name().to_string(),
                    offset,
                });
            }
            tracing::warn!(
                rule = rule.name(),
                offset,
                "rule set output matches this rule again; re-running will change the document"
            );
        }
        Ok(())
    }

    /// Evaluate every rule without stopping at failures.
    ///
    /// Rules that fail leave the threaded document unchanged. Returns the
    /// final document along with one entry per rule.
    pub fn check(&self, document: Document, rules: &RuleSet) -> (Document, Vec<RuleCheck>) {
        let mut document = document;
        let mut checks = Vec::with_capacity(rules.len());

        for rule in rules {
            let result = match self.evaluate(&document, rule) {
                Ok(patched) => {
                    document = patched.document;
                    Ok(patched.outcome)
                }
                Err(e) => Err(e),
            };
            checks.push(RuleCheck {
                rule: rule.name().to_string(),
                result,
            });
        }

        (document, checks)
    }

    /// Apply one rule, reporting a required-but-absent pattern as
    /// [`RuleStatus::NotFound`] instead of an error.
    fn evaluate(&self, document: &Document, rule: &Rule) -> Result<Patched, PatchError> {
        rule.validate()?;
        let text = document.text();

        if rule.guard().is_some_and(|guard| guard.is_match(text)) {
            tracing::debug!(rule = rule.name(), "guard matched, skipping");
            return Ok(unchanged(document, Outcome::already_applied(rule, false)));
        }

        let limit = match rule.policy().mode {
            Mode::First => 1,
            Mode::All => usize::MAX,
        };
        let matches: Vec<Match<'_>> = find(text, rule.pattern()).take(limit).collect();

        if matches.is_empty() {
            // Literal replacement already present: earlier run inserted it
            let present = rule
                .literal_replacement()
                .is_some_and(|replacement| text.contains(replacement));

            if present || !rule.policy().required {
                tracing::debug!(rule = rule.name(), "pattern absent, treating as applied");
                return Ok(unchanged(document, Outcome::already_applied(rule, false)));
            }

            tracing::debug!(rule = rule.name(), "required pattern absent");
            return Ok(unchanged(
                document,
                Outcome {
                    rule: rule.name().to_string(),
                    status: RuleStatus::NotFound,
                    applied_count: 0,
                    matched: false,
                },
            ));
        }

        // Single pass over the original text; inserted text is never rescanned.
        let mut output = String::with_capacity(text.len());
        let mut inserted: Vec<Range<usize>> = Vec::with_capacity(matches.len());
        let mut changed = false;
        let mut last = 0;

        for m in &matches {
            output.push_str(&text[last..m.start()]);
            let start = output.len();
            rule.render(m, &mut output);
            changed |= &output[start..] != m.as_str();
            inserted.push(start..output.len());
            last = m.end();
        }
        output.push_str(&text[last..]);

        if !changed {
            return Ok(unchanged(document, Outcome::already_applied(rule, true)));
        }

        if let Some(offset) = reapplication_offset(rule, &output, &inserted) {
            if self.strict {
                return Err(PatchError::NotIdempotent {
                    rule: rule.name().to_string(),
                    offset,
                });
            }
            tracing::warn!(
                rule = rule.name(),
                offset,
                "rule output matches its own pattern; re-running will apply it again"
            );
        }

        tracing::debug!(rule = rule.name(), count = matches.len(), "rule applied");
        Ok(Patched {
            document: document.with_text(output),
            outcome: Outcome {
                rule: rule.name().to_string(),
                status: RuleStatus::Applied,
                applied_count: matches.len(),
                matched: true,
            },
        })
    }
}

fn unchanged(document: &Document, outcome: Outcome) -> Patched {
    Patched {
        document: document.clone(),
        outcome,
    }
}

/// Where a second application of `rule` to `output` would act on text the
/// first application inserted, if anywhere.
///
/// Guarded rules are settled by their guard alone. Otherwise a match that
/// touches an inserted span means the rule re-finds its own output.
fn reapplication_offset(rule: &Rule, output: &str, inserted: &[Range<usize>]) -> Option<usize> {
    if let Some(guard) = rule.guard() {
        return (!guard.is_match(output)).then_some(0);
    }

    find(output, rule.pattern())
        .filter(|m| m.start() < m.end())
        .find(|m| inserted.iter().any(|span| touches(&m.range(), span)))
        .map(|m| m.start())
}

fn touches(m: &Range<usize>, span: &Range<usize>) -> bool {
    if span.is_empty() {
        // Deletion point: only a match straddling it is new text
        m.start < span.start && span.start < m.end
    } else {
        m.start < span.end && span.start < m.end
    }
}

/// Closest document line to a literal pattern's first non-blank line.
fn drift_hint(text: &str, pattern: &Pattern) -> Option<String> {
    let Pattern::Literal(needle) = pattern else {
        return None;
    };
    let probe = needle.lines().map(str::trim).find(|l| !l.is_empty())?;

    text.lines()
        .enumerate()
        .map(|(idx, line)| {
            let score = strsim::normalized_levenshtein(probe, line.trim());
            (idx, line, score)
        })
        .filter(|(_, _, score)| *score >= HINT_THRESHOLD)
        .max_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(idx, line, _)| format!("line {}: {}", idx + 1, line.trim()))
}

/// Apply one rule with a strict engine.
pub fn apply(document: &Document, rule: &Rule) -> Result<Patched, PatchError> {
    Engine::default().apply(document, rule)
}

/// Run a rule set with a strict engine.
pub fn run(document: Document, rules: &RuleSet) -> Result<RunReport, PatchError> {
    Engine::default().run(document, rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Policy;

    fn doc(text: &str) -> Document {
        Document::new("index.html", text)
    }

    fn literal(name: &str, from: &str, to: &str) -> Rule {
        Rule::new(name, Pattern::literal(from).unwrap(), to)
    }

    #[test]
    fn test_remove_first_div() {
        let rule = literal("drop-a", "<div>A</div>", "");
        let patched = apply(&doc("<div>A</div>\n<div>B</div>"), &rule).unwrap();
        assert_eq!(patched.document.text(), "\n<div>B</div>");
        assert_eq!(patched.outcome.status, RuleStatus::Applied);
        assert_eq!(patched.outcome.applied_count, 1);
    }

    #[test]
    fn test_first_policy_leaves_later_matches() {
        let rule = literal("x", "cat", "dog");
        let patched = apply(&doc("cat cat cat"), &rule).unwrap();
        assert_eq!(patched.document.text(), "dog cat cat");
    }

    #[test]
    fn test_all_policy_replaces_every_match() {
        let rule = literal("x", "cat", "dog").with_policy(Policy::all());
        let patched = apply(&doc("cat cat cat"), &rule).unwrap();
        assert_eq!(patched.document.text(), "dog dog dog");
        assert_eq!(patched.outcome.applied_count, 3);
    }

    #[test]
    fn test_all_policy_does_not_rescan_inserted_text() {
        let rule = Rule::new("x", Pattern::regex("a").unwrap(), "b")
            .with_policy(Policy::all());
        let patched = apply(&doc("aXa"), &rule).unwrap();
        assert_eq!(patched.document.text(), "bXb");
    }

    #[test]
    fn test_optional_missing_pattern_is_noop() {
        let rule = literal("x", "<nav>", "<nav class=\"top\">");
        let input = doc("<main></main>");
        let patched = apply(&input, &rule).unwrap();
        assert_eq!(patched.document, input);
        assert_eq!(patched.outcome.status, RuleStatus::AlreadyApplied);
        assert!(!patched.outcome.matched);
        assert_eq!(patched.outcome.applied_count, 0);
    }

    #[test]
    fn test_required_missing_pattern_fails() {
        let rule = literal("nav", "<nav id=\"main\">", "<nav id=\"main\" role=\"navigation\">")
            .with_policy(Policy::first().required());
        let err = apply(&doc("<body>\n  <nav id=\"mian\">\n</body>"), &rule).unwrap_err();
        match err {
            PatchError::PatternNotFound { rule, hint } => {
                assert_eq!(rule, "nav");
                assert_eq!(hint.as_deref(), Some("line 2: <nav id=\"mian\">"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_required_rule_already_applied_via_replacement() {
        let rule = literal(
            "zoom",
            "<button id=\"x\" title=\"T\">",
            "<button id=\"x\" title=\"T\" aria-label=\"T\">",
        )
        .with_policy(Policy::first().required());
        let once = apply(&doc("<div><button id=\"x\" title=\"T\"></div>"), &rule).unwrap();
        let twice = apply(&once.document, &rule).unwrap();
        assert_eq!(twice.document.text(), once.document.text());
        assert_eq!(twice.outcome.status, RuleStatus::AlreadyApplied);
    }

    #[test]
    fn test_identical_replacement_reports_already_applied() {
        let rule = Rule::new("same", Pattern::regex(r"(\d+)").unwrap(), "$1");
        let patched = apply(&doc("v = 42"), &rule).unwrap();
        assert_eq!(patched.outcome.status, RuleStatus::AlreadyApplied);
        assert!(patched.outcome.matched);
        assert_eq!(patched.outcome.applied_count, 0);
    }

    #[test]
    fn test_self_matching_rule_rejected_when_strict() {
        let rule = Rule::new(
            "after-init",
            Pattern::regex(r"(init\(\);)").unwrap(),
            "$1\nsetup();",
        );
        let err = apply(&doc("init();"), &rule).unwrap_err();
        assert_eq!(
            err,
            PatchError::NotIdempotent {
                rule: "after-init".to_string(),
                offset: 0
            }
        );
    }

    #[test]
    fn test_self_matching_rule_allowed_when_lenient() {
        let rule = Rule::new(
            "after-init",
            Pattern::regex(r"(init\(\);)").unwrap(),
            "$1\nsetup();",
        );
        let patched = Engine::new()
            .strict(false)
            .apply(&doc("init();"), &rule)
            .unwrap();
        assert_eq!(patched.document.text(), "init();\nsetup();");
    }

    #[test]
    fn test_guard_makes_self_matching_rule_idempotent() {
        let rule = Rule::new(
            "after-init",
            Pattern::regex(r"(init\(\);)").unwrap(),
            "$1\nsetup();",
        )
        .with_guard(Pattern::literal("setup();").unwrap());
        let once = apply(&doc("init();"), &rule).unwrap();
        let twice = apply(&once.document, &rule).unwrap();
        assert_eq!(once.document.text(), "init();\nsetup();");
        assert_eq!(twice.document.text(), once.document.text());
        assert_eq!(twice.outcome.status, RuleStatus::AlreadyApplied);
    }

    #[test]
    fn test_guard_that_replacement_does_not_satisfy_is_rejected() {
        let rule = Rule::new("r", Pattern::literal("a").unwrap(), "b")
            .with_guard(Pattern::literal("zzz").unwrap());
        assert!(matches!(
            apply(&doc("a"), &rule),
            Err(PatchError::NotIdempotent { .. })
        ));
    }

    #[test]
    fn test_deletion_joining_into_new_match_is_detected() {
        // A deletion is fine unless the joined text matches again
        let rule = Rule::new("join", Pattern::regex("X").unwrap(), "");
        assert!(apply(&doc("aXb"), &rule).is_ok());

        let rule = Rule::new("join", Pattern::regex("aXb|ab").unwrap(), "ab");
        assert!(matches!(
            apply(&doc("aXb"), &rule),
            Err(PatchError::NotIdempotent { .. })
        ));
    }

    #[test]
    fn test_run_threads_documents_in_order() {
        let rules = RuleSet::new(vec![
            literal("insert-bar", "<canvas>", "<div class=\"bar\"></div>\n<canvas>")
                .with_guard(Pattern::literal("class=\"bar\"").unwrap()),
            literal("label-bar", "<div class=\"bar\">", "<div class=\"bar\" role=\"status\">"),
        ]);
        let report = run(doc("<canvas>"), &rules).unwrap();
        assert_eq!(
            report.document.text(),
            "<div class=\"bar\" role=\"status\"></div>\n<canvas>"
        );
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.applied(), 2);
    }

    #[test]
    fn test_later_rule_recreating_earlier_pattern_is_rejected() {
        let rules = RuleSet::new(vec![literal("a-to-b", "a", "b"), literal("c-to-a", "c", "a")]);

        let err = run(doc("ac"), &rules).unwrap_err();
        assert_eq!(
            err,
            PatchError::NotIdempotent {
                rule: "a-to-b".to_string(),
                offset: 1
            }
        );
    }

    #[test]
    fn test_later_rule_recreating_earlier_pattern_allowed_when_lenient() {
        let rules = RuleSet::new(vec![literal("a-to-b", "a", "b"), literal("c-to-a", "c", "a")]);
        let report = Engine::new().strict(false).run(doc("ac"), &rules).unwrap();
        assert_eq!(report.document.text(), "ba");
    }

    #[test]
    fn test_unguarded_anchor_insertion() {
        let text = "    updateCreatureStatus(creatureIndex) {\n        this.selected = creatureIndex;\n    }";
        let rule = Rule::new(
            "status-method-start",
            Pattern::regex(r"(updateCreatureStatus\(creatureIndex\) \{)").unwrap(),
            "clearCreatureSelection() {\n        this.selected = -1;\n    }\n\n    $1",
        );

        // The anchor is re-emitted, so the rule would find it again
        assert!(matches!(
            apply(&doc(text), &rule),
            Err(PatchError::NotIdempotent { .. })
        ));

        let patched = Engine::new().strict(false).apply(&doc(text), &rule).unwrap();
        assert_eq!(
            patched.document.text(),
            "    clearCreatureSelection() {\n        this.selected = -1;\n    }\n\n    \
             updateCreatureStatus(creatureIndex) {\n        this.selected = creatureIndex;\n    }"
        );
        assert_eq!(patched.outcome.applied_count, 1);

        let guarded = rule.with_guard(Pattern::literal("clearCreatureSelection() {").unwrap());
        let once = apply(&doc(text), &guarded).unwrap();
        assert_eq!(once.document.text(), patched.document.text());
        let twice = apply(&once.document, &guarded).unwrap();
        assert_eq!(twice.outcome.status, RuleStatus::AlreadyApplied);
    }

    #[test]
    fn test_run_stops_at_required_failure() {
        let rules = RuleSet::new(vec![
            literal("a", "a", "A"),
            literal("missing", "zzz", "y").with_policy(Policy::first().required()),
        ]);
        let err = run(doc("abc"), &rules).unwrap_err();
        assert!(matches!(err, PatchError::PatternNotFound { ref rule, .. } if rule == "missing"));
    }

    #[test]
    fn test_check_reports_every_rule() {
        let rules = RuleSet::new(vec![
            literal("missing", "zzz", "y").with_policy(Policy::first().required()),
            literal("a", "a", "A"),
        ]);
        let (document, checks) = Engine::new().check(doc("abc"), &rules);
        assert_eq!(document.text(), "Abc");
        assert_eq!(checks.len(), 2);
        assert_eq!(
            checks[0].result.as_ref().unwrap().status,
            RuleStatus::NotFound
        );
        assert_eq!(checks[1].result.as_ref().unwrap().status, RuleStatus::Applied);
    }

    #[test]
    fn test_invalid_rule_surfaces_error() {
        let rule = Rule::new("bad", Pattern::regex("(a)").unwrap(), "$3");
        assert!(matches!(
            apply(&doc("a"), &rule),
            Err(PatchError::Rule(RuleError::UnknownGroup { .. }))
        ));
    }

    #[test]
    fn test_drift_hint_threshold() {
        let pattern = Pattern::literal("completely different").unwrap();
        assert_eq!(drift_hint("<html></html>", &pattern), None);
        let regex = Pattern::regex("x").unwrap();
        assert_eq!(drift_hint("x", &regex), None);
    }

    #[test]
    fn test_outcome_display() {
        let outcome = Outcome {
            rule: "r".to_string(),
            status: RuleStatus::Applied,
            applied_count: 2,
            matched: true,
        };
        assert_eq!(outcome.to_string(), "r: applied (2 spans)");
    }
}

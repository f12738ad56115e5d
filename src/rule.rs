//! Rules and rule sets.
//!
//! A [`Rule`] pairs a [`Pattern`] with a replacement template and a
//! [`Policy`]. For regex patterns the template may reference captures as
//! `$1`, `${1}`, `$name` or `${name}` (`$0` is the whole match, `$$` a
//! literal dollar). Literal patterns have no captures, so their replacement
//! is inserted verbatim.

use crate::pattern::{Match, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule name is empty")]
    EmptyName,

    #[error("rule '{rule}' references capture group '{group}' which its pattern does not define")]
    UnknownGroup { rule: String, group: String },

    #[error("rule '{rule}' has an unterminated '${{' in its replacement")]
    UnterminatedGroup { rule: String },

    #[error("rule set contains no rules")]
    EmptyRuleSet,

    #[error("rule name '{0}' is used more than once")]
    DuplicateName(String),
}

/// Which matches a rule replaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Only the leftmost match
    #[default]
    First,
    /// Every non-overlapping match, left to right
    All,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::First => f.write_str("first"),
            Mode::All => f.write_str("all"),
        }
    }
}

/// Replacement policy of a rule.
///
/// `required` rules fail the run when their pattern is absent. Optional rules
/// treat an absent pattern as "already applied".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    pub mode: Mode,
    pub required: bool,
}

impl Policy {
    pub fn first() -> Self {
        Self {
            mode: Mode::First,
            required: false,
        }
    }

    pub fn all() -> Self {
        Self {
            mode: Mode::All,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A named transformation: pattern, replacement template, policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    name: String,
    pattern: Pattern,
    replacement: String,
    policy: Policy,
    guard: Option<Pattern>,
}

impl Rule {
    pub fn new(name: impl Into<String>, pattern: Pattern, replacement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern,
            replacement: replacement.into(),
            policy: Policy::default(),
            guard: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Mark the rule as already applied whenever `guard` matches the document.
    ///
    /// Needed for rules whose replacement re-emits the text they search for,
    /// e.g. inserting lines after an anchor that is kept.
    #[must_use]
    pub fn with_guard(mut self, guard: Pattern) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn guard(&self) -> Option<&Pattern> {
        self.guard.as_ref()
    }

    /// Check the name and every capture reference in the template.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.name.trim().is_empty() {
            return Err(RuleError::EmptyName);
        }
        if self.pattern.is_literal() {
            return Ok(());
        }

        for group in template_references(&self.replacement).map_err(|()| {
            RuleError::UnterminatedGroup {
                rule: self.name.clone(),
            }
        })? {
            let known = match group.parse::<usize>() {
                Ok(index) => index < self.pattern.group_count(),
                Err(_) => self.pattern.has_group_name(group),
            };
            if !known {
                return Err(RuleError::UnknownGroup {
                    rule: self.name.clone(),
                    group: group.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Render the replacement for one match, appending to `out`.
    pub fn render(&self, m: &Match<'_>, out: &mut String) {
        match m.captures() {
            Some(caps) => caps.expand(&self.replacement, out),
            None => out.push_str(&self.replacement),
        }
    }

    /// The replacement exactly as it would be inserted for a literal pattern.
    pub(crate) fn literal_replacement(&self) -> Option<&str> {
        (self.pattern.is_literal() && !self.replacement.is_empty())
            .then_some(self.replacement.as_str())
    }
}

/// Capture group names referenced by a template, in order.
///
/// Follows the `regex` crate's expansion grammar: `$$` escapes, `${...}`
/// takes everything up to the closing brace, bare `$` takes the longest run
/// of `[A-Za-z0-9_]`.
fn template_references(template: &str) -> Result<Vec<&str>, ()> {
    let mut refs = Vec::new();
    let mut rest = template;

    while let Some(idx) = rest.find('$') {
        rest = &rest[idx + 1..];
        if let Some(after) = rest.strip_prefix('$') {
            rest = after;
        } else if let Some(after) = rest.strip_prefix('{') {
            let close = after.find('}').ok_or(())?;
            refs.push(&after[..close]);
            rest = &after[close + 1..];
        } else {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if len > 0 {
                refs.push(&rest[..len]);
            }
            rest = &rest[len..];
        }
    }

    Ok(refs)
}

/// An ordered list of rules. Later rules see the output of earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Validate every rule and reject empty sets and duplicate names.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.rules.is_empty() {
            return Err(RuleError::EmptyRuleSet);
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.name()) {
                return Err(RuleError::DuplicateName(rule.name().to_string()));
            }
        }
        Ok(())
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

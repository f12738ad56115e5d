use crate::pattern::{Pattern, PatternError, RegexOptions};
use crate::rule::{Mode, Policy, Rule, RuleSet};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// A rule file: metadata plus an ordered list of rule definitions.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RuleConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// Rules grouped by the document they target, in first-appearance order.
#[derive(Debug, Clone)]
pub struct DocumentRules {
    /// Document path as written in the rule file
    pub document: String,
    pub rules: RuleSet,
}

impl RuleConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.rules.is_empty() {
            issues.push(ValidationIssue::EmptyRuleList);
        }

        let mut seen = HashSet::new();
        for def in &self.rules {
            if def.name.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule: None,
                    field: "name",
                });
                continue;
            }
            if !seen.insert(def.name.as_str()) {
                issues.push(ValidationIssue::DuplicateName {
                    rule: def.name.clone(),
                });
            }
            if self.document_for(def).is_none() {
                issues.push(ValidationIssue::MissingField {
                    rule: Some(def.name.clone()),
                    field: "document",
                });
            }
            if def.pattern.is_blank() {
                issues.push(ValidationIssue::MissingField {
                    rule: Some(def.name.clone()),
                    field: "pattern",
                });
                continue;
            }
            if let Err(message) = def.to_rule().map_err(|e| e.to_string()).and_then(|rule| {
                rule.validate().map_err(|e| e.to_string())
            }) {
                issues.push(ValidationIssue::InvalidRule {
                    rule: def.name.clone(),
                    message,
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Target document of a rule: its own override, else the file default.
    pub fn document_for<'a>(&'a self, def: &'a RuleDefinition) -> Option<&'a str> {
        def.document
            .as_deref()
            .or(self.meta.document.as_deref())
            .filter(|doc| !doc.trim().is_empty())
    }

    /// Build rule sets, one per target document.
    pub fn rule_sets(&self) -> Result<Vec<DocumentRules>, PatternError> {
        let mut groups: Vec<DocumentRules> = Vec::new();

        for def in &self.rules {
            let Some(document) = self.document_for(def) else {
                continue;
            };
            let rule = def.to_rule()?;
            match groups.iter_mut().find(|g| g.document == document) {
                Some(group) => group.rules.push(rule),
                None => groups.push(DocumentRules {
                    document: document.to_string(),
                    rules: RuleSet::new(vec![rule]),
                }),
            }
        }

        Ok(groups)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Default target document, relative to the patch root
    #[serde(default)]
    pub document: Option<String>,
    /// Downgrade idempotence violations to warnings
    #[serde(default)]
    pub lenient: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub document: Option<String>,
    pub pattern: PatternSpec,
    #[serde(default)]
    pub replacement: String,
    #[serde(default)]
    pub policy: Mode,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub guard: Option<PatternSpec>,
}

impl RuleDefinition {
    pub fn to_rule(&self) -> Result<Rule, PatternError> {
        let policy = Policy {
            mode: self.policy,
            required: self.required,
        };
        let rule = Rule::new(&self.name, self.pattern.to_pattern()?, &self.replacement)
            .with_policy(policy);
        match &self.guard {
            Some(guard) => Ok(rule.with_guard(guard.to_pattern()?)),
            None => Ok(rule),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PatternSpec {
    /// Exact text, whitespace significant
    Literal { text: String },
    Regex {
        regex: String,
        #[serde(default)]
        dot_all: bool,
        #[serde(default)]
        case_insensitive: bool,
    },
}

impl PatternSpec {
    pub fn text(&self) -> &str {
        match self {
            PatternSpec::Literal { text } => text,
            PatternSpec::Regex { regex, .. } => regex,
        }
    }

    /// Literals are whitespace significant, so only an empty one is blank.
    pub fn is_blank(&self) -> bool {
        match self {
            PatternSpec::Literal { text } => text.is_empty(),
            PatternSpec::Regex { regex, .. } => regex.trim().is_empty(),
        }
    }

    pub fn to_pattern(&self) -> Result<Pattern, PatternError> {
        match self {
            PatternSpec::Literal { text } => Pattern::literal(text.as_str()),
            PatternSpec::Regex {
                regex,
                dot_all,
                case_insensitive,
            } => Pattern::regex_with(
                regex.as_str(),
                RegexOptions {
                    dot_all: *dot_all,
                    case_insensitive: *case_insensitive,
                },
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyRuleList,
    MissingField {
        rule: Option<String>,
        field: &'static str,
    },
    DuplicateName {
        rule: String,
    },
    InvalidRule {
        rule: String,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyRuleList => write!(f, "rule file contains no rules"),
            ValidationIssue::MissingField { rule, field } => match rule {
                Some(name) => write!(f, "rule '{name}' missing required field '{field}'"),
                None => write!(f, "rule missing required field '{field}'"),
            },
            ValidationIssue::DuplicateName { rule } => {
                write!(f, "rule name '{rule}' is used more than once")
            }
            ValidationIssue::InvalidRule { rule, message } => {
                write!(f, "rule '{rule}' is invalid: {message}")
            }
        }
    }
}

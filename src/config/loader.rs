use crate::config::schema::{RuleConfig, ValidationError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read rule file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse rule file TOML{}: {source}", display_path(.path))]
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },

    #[error("invalid rule file{}: {source}", display_path(.path))]
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = Some(path.to_path_buf());
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml { path, source },
            ConfigError::Validation { path: None, source } => {
                ConfigError::Validation { path, source }
            }
            other => other,
        }
    }
}

pub fn load_from_str(input: &str) -> Result<RuleConfig, ConfigError> {
    let config: RuleConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RuleConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{PatternSpec, ValidationIssue};
    use crate::rule::Mode;

    #[test]
    fn test_load_literal_and_regex_rules() {
        let config = load_from_str(
            r#"
[meta]
name = "stats"
document = "public/index.html"

[[rules]]
name = "zoom-label"
replacement = '<button id="zoomIn" title="Zoom In" aria-label="Zoom In">'
required = true

[rules.pattern]
type = "literal"
text = '<button id="zoomIn" title="Zoom In">'

[[rules]]
name = "status-panel"
replacement = "$1"
policy = "all"

[rules.pattern]
type = "regex"
regex = '(<div class="status-panel">.*?</div>)'
dot_all = true
"#,
        )
        .unwrap();

        assert_eq!(config.meta.name, "stats");
        assert_eq!(config.rules.len(), 2);
        assert!(config.rules[0].required);
        assert_eq!(config.rules[0].policy, Mode::First);
        assert_eq!(config.rules[1].policy, Mode::All);
        assert!(matches!(
            config.rules[1].pattern,
            PatternSpec::Regex { dot_all: true, .. }
        ));
    }

    #[test]
    fn test_validation_collects_all_issues() {
        let err = load_from_str(
            r#"
[[rules]]
name = "a"
[rules.pattern]
type = "regex"
regex = "(x"

[[rules]]
name = "a"
document = "index.html"
[rules.pattern]
type = "literal"
text = ""
"#,
        )
        .unwrap_err();

        let ConfigError::Validation { source, .. } = err else {
            panic!("expected validation error");
        };
        assert!(source.issues.contains(&ValidationIssue::MissingField {
            rule: Some("a".to_string()),
            field: "document",
        }));
        assert!(source
            .issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::InvalidRule { .. })));
        assert!(source
            .issues
            .contains(&ValidationIssue::DuplicateName { rule: "a".into() }));
        assert!(source.issues.contains(&ValidationIssue::MissingField {
            rule: Some("a".to_string()),
            field: "pattern",
        }));
    }

    #[test]
    fn test_template_with_unknown_group_is_invalid() {
        let err = load_from_str(
            r#"
[meta]
document = "game.js"

[[rules]]
name = "bad-template"
replacement = "${missing}"
[rules.pattern]
type = "regex"
regex = "(?P<present>x)"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_empty_rule_file_rejected() {
        let err = load_from_str("[meta]\nname = \"empty\"\n").unwrap_err();
        assert!(err.to_string().contains("no rules"));
    }

    #[test]
    fn test_load_from_path_reports_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "[[rules]\n").unwrap();

        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { path: Some(_), .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_rule_sets_group_by_document() {
        let config = load_from_str(
            r#"
[meta]
document = "public/index.html"

[[rules]]
name = "one"
replacement = "1"
[rules.pattern]
type = "literal"
text = "a"

[[rules]]
name = "two"
document = "public/game.js"
replacement = "2"
[rules.pattern]
type = "literal"
text = "b"

[[rules]]
name = "three"
replacement = "3"
[rules.pattern]
type = "literal"
text = "c"
"#,
        )
        .unwrap();

        let groups = config.rule_sets().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].document, "public/index.html");
        let names: Vec<_> = groups[0].rules.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["one", "three"]);
        assert_eq!(groups[1].document, "public/game.js");
    }

    #[test]
    fn test_whitespace_only_literal_loads() {
        let config = load_from_str(
            r#"
[meta]
document = "public/index.html"

[[rules]]
name = "collapse"
replacement = "\n\n"
[rules.pattern]
type = "literal"
text = "\n\n\n"
"#,
        )
        .unwrap();

        assert!(matches!(
            &config.rules[0].pattern,
            PatternSpec::Literal { text } if text == "\n\n\n"
        ));
        let groups = config.rule_sets().unwrap();
        let rule = groups[0].rules.iter().next().unwrap();
        let doc = crate::Document::new("index.html", "<p>a</p>\n\n\n<p>b</p>");
        let patched = crate::engine::apply(&doc, rule).unwrap();
        assert_eq!(patched.document.text(), "<p>a</p>\n\n<p>b</p>");
    }
}

//! Patterns and the matcher.
//!
//! A [`Pattern`] is either a literal block of text (whitespace significant) or
//! a regular expression with positional and named capture groups. Matching
//! produces a lazy [`Matches`] iterator over non-overlapping spans, left to
//! right. Matching is read-only: calling [`find`] again on the same text
//! yields the same spans.

use crate::cache;
use regex::{Captures, Regex};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("literal pattern is empty")]
    EmptyLiteral,

    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// Compilation options for regex patterns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegexOptions {
    /// `.` also matches `\n`
    pub dot_all: bool,
    pub case_insensitive: bool,
}

/// A compiled regular expression together with the source it came from.
#[derive(Clone)]
pub struct RegexPattern {
    source: String,
    options: RegexOptions,
    regex: Regex,
}

impl RegexPattern {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn options(&self) -> RegexOptions {
        self.options
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

impl fmt::Debug for RegexPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexPattern")
            .field("source", &self.source)
            .field("options", &self.options)
            .finish()
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.options == other.options
    }
}

impl Eq for RegexPattern {}

/// Text to locate inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Exact substring, including indentation and line breaks
    Literal(String),
    /// Regular expression (leftmost-first, non-overlapping)
    Regex(RegexPattern),
}

impl Pattern {
    /// Create a literal pattern. Empty literals are rejected since they would
    /// match between every character.
    pub fn literal(text: impl Into<String>) -> Result<Self, PatternError> {
        let text = text.into();
        if text.is_empty() {
            return Err(PatternError::EmptyLiteral);
        }
        Ok(Pattern::Literal(text))
    }

    /// Create a regex pattern with default options.
    pub fn regex(source: impl Into<String>) -> Result<Self, PatternError> {
        Self::regex_with(source, RegexOptions::default())
    }

    /// Create a regex pattern with explicit options.
    pub fn regex_with(
        source: impl Into<String>,
        options: RegexOptions,
    ) -> Result<Self, PatternError> {
        let source = source.into();
        let regex = cache::get_or_compile(&source, options).map_err(|e| {
            PatternError::InvalidRegex {
                pattern: source.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(Pattern::Regex(RegexPattern {
            source,
            options,
            regex,
        }))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Pattern::Literal(_))
    }

    /// The pattern text as written (literal text or regex source).
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Literal(text) => text,
            Pattern::Regex(re) => re.source(),
        }
    }

    /// Number of capture groups, including the implicit whole-match group 0.
    pub fn group_count(&self) -> usize {
        match self {
            Pattern::Literal(_) => 1,
            Pattern::Regex(re) => re.regex.captures_len(),
        }
    }

    /// Whether a capture group with this name exists.
    pub fn has_group_name(&self, name: &str) -> bool {
        match self {
            Pattern::Literal(_) => false,
            Pattern::Regex(re) => re.regex.capture_names().flatten().any(|n| n == name),
        }
    }

    /// Iterate over all matches in `text`.
    pub fn find_iter<'p, 't>(&'p self, text: &'t str) -> Matches<'p, 't> {
        find(text, self)
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Pattern::Literal(needle) => text.contains(needle.as_str()),
            Pattern::Regex(re) => re.regex.is_match(text),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(text) => write!(f, "literal {:?}", text),
            Pattern::Regex(re) => write!(f, "regex /{}/", re.source()),
        }
    }
}

/// One matched span with its captures.
#[derive(Debug)]
pub struct Match<'t> {
    haystack: &'t str,
    start: usize,
    end: usize,
    captures: Option<Captures<'t>>,
}

impl<'t> Match<'t> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn as_str(&self) -> &'t str {
        &self.haystack[self.start..self.end]
    }

    /// Positional capture group. Group 0 is the whole match.
    pub fn group(&self, index: usize) -> Option<&'t str> {
        match &self.captures {
            Some(caps) => caps.get(index).map(|m| m.as_str()),
            None if index == 0 => Some(self.as_str()),
            None => None,
        }
    }

    /// Named capture group.
    pub fn named(&self, name: &str) -> Option<&'t str> {
        self.captures
            .as_ref()
            .and_then(|caps| caps.name(name))
            .map(|m| m.as_str())
    }

    /// Regex captures, if this match came from a regex pattern.
    pub fn captures(&self) -> Option<&Captures<'t>> {
        self.captures.as_ref()
    }
}

/// Lazy iterator over the matches of one pattern in one text.
pub struct Matches<'p, 't> {
    haystack: &'t str,
    kind: MatchKind<'p>,
    pos: usize,
    last_end: Option<usize>,
    done: bool,
}

#[derive(Clone, Copy)]
enum MatchKind<'p> {
    Literal(&'p str),
    Regex(&'p Regex),
}

/// Find every non-overlapping match of `pattern` in `text`.
///
/// Returns an empty iterator when the pattern does not occur; whether that
/// is an error is decided by the caller.
pub fn find<'p, 't>(text: &'t str, pattern: &'p Pattern) -> Matches<'p, 't> {
    let kind = match pattern {
        Pattern::Literal(needle) => MatchKind::Literal(needle.as_str()),
        Pattern::Regex(re) => MatchKind::Regex(&re.regex),
    };
    Matches {
        haystack: text,
        kind,
        pos: 0,
        last_end: None,
        done: false,
    }
}

fn next_char_boundary(text: &str, at: usize) -> usize {
    text[at..]
        .chars()
        .next()
        .map_or(at + 1, |c| at + c.len_utf8())
}

impl<'p, 't> Iterator for Matches<'p, 't> {
    type Item = Match<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.kind {
            MatchKind::Literal(needle) => {
                let Some(offset) = self.haystack[self.pos..].find(needle) else {
                    self.done = true;
                    return None;
                };
                let start = self.pos + offset;
                let end = start + needle.len();
                self.pos = end;
                Some(Match {
                    haystack: self.haystack,
                    start,
                    end,
                    captures: None,
                })
            }
            MatchKind::Regex(regex) => loop {
                if self.pos > self.haystack.len() {
                    self.done = true;
                    return None;
                }
                let Some(caps) = regex.captures_at(self.haystack, self.pos) else {
                    self.done = true;
                    return None;
                };
                let Some(whole) = caps.get(0) else {
                    self.done = true;
                    return None;
                };
                let (start, end) = (whole.start(), whole.end());

                // An empty match directly after the previous match is skipped.
                if start == end && self.last_end == Some(end) {
                    self.pos = next_char_boundary(self.haystack, end);
                    continue;
                }

                self.pos = if start == end {
                    next_char_boundary(self.haystack, end)
                } else {
                    end
                };
                self.last_end = Some(end);
                return Some(Match {
                    haystack: self.haystack,
                    start,
                    end,
                    captures: Some(caps),
                });
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(text: &str, pattern: &Pattern) -> Vec<(usize, usize)> {
        find(text, pattern).map(|m| (m.start(), m.end())).collect()
    }

    #[test]
    fn test_empty_literal_rejected() {
        assert_eq!(Pattern::literal(""), Err(PatternError::EmptyLiteral));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = Pattern::regex("(open").unwrap_err();
        assert!(matches!(err, PatternError::InvalidRegex { .. }));
        assert!(err.to_string().contains("(open"));
    }

    #[test]
    fn test_literal_is_whitespace_significant() {
        let pattern = Pattern::literal("    <div>").unwrap();
        assert_eq!(spans("  <div>\n    <div>", &pattern), vec![(8, 17)]);
    }

    #[test]
    fn test_literal_matches_do_not_overlap() {
        let pattern = Pattern::literal("aa").unwrap();
        assert_eq!(spans("aaaaa", &pattern), vec![(0, 2), (2, 4)]);
    }

    #[test]
    fn test_no_match_is_empty_sequence() {
        let pattern = Pattern::regex(r"\d+").unwrap();
        assert_eq!(find("no digits", &pattern).count(), 0);
    }

    #[test]
    fn test_matches_are_restartable() {
        let pattern = Pattern::regex(r"b\w").unwrap();
        let text = "ba be bi";
        assert_eq!(spans(text, &pattern), spans(text, &pattern));
        assert_eq!(spans(text, &pattern).len(), 3);
    }

    #[test]
    fn test_regex_captures_positional_and_named() {
        let pattern = Pattern::regex(r#"id="(?P<id>\w+)" title="([^"]*)""#).unwrap();
        let text = r#"<button id="zoomIn" title="Zoom In">"#;
        let m = find(text, &pattern).next().unwrap();
        assert_eq!(m.named("id"), Some("zoomIn"));
        assert_eq!(m.group(2), Some("Zoom In"));
        assert_eq!(m.group(0), Some(r#"id="zoomIn" title="Zoom In""#));
    }

    #[test]
    fn test_empty_regex_matches_terminate() {
        let pattern = Pattern::regex("x*").unwrap();
        let found = spans("aé", &pattern);
        assert_eq!(found, vec![(0, 0), (1, 1), (3, 3)]);
    }

    #[test]
    fn test_empty_match_after_previous_match_skipped() {
        let pattern = Pattern::regex("a*").unwrap();
        assert_eq!(spans("aab", &pattern), vec![(0, 2), (3, 3)]);
    }

    #[test]
    fn test_dot_all_spans_lines() {
        let pattern = Pattern::regex_with(
            r"<div>(.*?)</div>",
            RegexOptions {
                dot_all: true,
                ..RegexOptions::default()
            },
        )
        .unwrap();
        let m = find("<div>\n  x\n</div>", &pattern).next().unwrap();
        assert_eq!(m.group(1), Some("\n  x\n"));
    }

    #[test]
    fn test_group_introspection() {
        let pattern = Pattern::regex(r"(?P<head>a)(b)").unwrap();
        assert_eq!(pattern.group_count(), 3);
        assert!(pattern.has_group_name("head"));
        assert!(!pattern.has_group_name("tail"));
        assert_eq!(Pattern::literal("x").unwrap().group_count(), 1);
    }
}

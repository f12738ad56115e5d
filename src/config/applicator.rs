//! Rule-file applicator - runs rule files against documents under a root
//!
//! This module provides the load → transform → save pipeline that:
//! - Resolves each target document inside the patch root
//! - Runs the document's rule set with the patch engine
//! - Writes the result once, only when the whole run succeeded
//! - Reports detailed results for each document and rule

use crate::config::schema::{DocumentRules, RuleConfig};
use crate::document::{Document, DocumentError, SaveResult};
use crate::engine::{Engine, PatchError, RuleCheck, RunReport};
use crate::pattern::PatternError;
use crate::safety::{RootGuard, SafetyError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while applying a rule file
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Whether runs persist their result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Write,
    DryRun,
}

/// Result of running one document's rules.
#[derive(Debug)]
pub struct DocumentRun {
    /// Text before any rule ran
    pub original: String,
    pub report: RunReport,
    /// Whether the result was persisted
    pub written: bool,
}

#[derive(Debug)]
pub struct DocumentReport {
    /// Document path as written in the rule file
    pub document: String,
    pub result: Result<DocumentRun, ApplicationError>,
}

#[derive(Debug)]
pub struct DocumentCheck {
    pub document: String,
    pub result: Result<Vec<RuleCheck>, ApplicationError>,
}

fn engine_for(config: &RuleConfig) -> Engine {
    Engine::new().strict(!config.meta.lenient)
}

/// Apply a rule file to the documents under `root`.
///
/// Each document is read once, runs through its full rule set in memory,
/// and is written once. A failing rule leaves that document untouched on
/// disk; other documents are still processed.
pub fn apply_rules(config: &RuleConfig, root: &Path, mode: ApplyMode) -> Vec<DocumentReport> {
    let engine = engine_for(config);
    let groups = match config.rule_sets() {
        Ok(groups) => groups,
        Err(e) => {
            return vec![DocumentReport {
                document: config.meta.document.clone().unwrap_or_default(),
                result: Err(e.into()),
            }]
        }
    };

    let guard = match RootGuard::new(root) {
        Ok(guard) => guard,
        Err(e) => {
            return vec![DocumentReport {
                document: root.display().to_string(),
                result: Err(e.into()),
            }]
        }
    };

    groups
        .into_iter()
        .map(|group| DocumentReport {
            result: apply_document(&engine, &guard, &group, mode),
            document: group.document,
        })
        .collect()
}

fn apply_document(
    engine: &Engine,
    guard: &RootGuard,
    group: &DocumentRules,
    mode: ApplyMode,
) -> Result<DocumentRun, ApplicationError> {
    let path = guard.validate_path(&group.document)?;
    let document = Document::load(&path)?;
    let original = document.text().to_string();

    tracing::debug!(document = %path.display(), rules = group.rules.len(), "running rule set");
    let report = engine.run(document, &group.rules)?;

    let written = match mode {
        ApplyMode::DryRun => false,
        ApplyMode::Write => {
            guard.revalidate(&path)?;
            matches!(report.document.save()?, SaveResult::Written { .. })
        }
    };

    Ok(DocumentRun {
        original,
        report,
        written,
    })
}

/// Evaluate a rule file without writing anything.
///
/// Every rule is reported, including those after a failure.
pub fn check_rules(config: &RuleConfig, root: &Path) -> Vec<DocumentCheck> {
    let engine = engine_for(config);
    let groups = match config.rule_sets() {
        Ok(groups) => groups,
        Err(e) => {
            return vec![DocumentCheck {
                document: config.meta.document.clone().unwrap_or_default(),
                result: Err(e.into()),
            }]
        }
    };

    let guard = match RootGuard::new(root) {
        Ok(guard) => guard,
        Err(e) => {
            return vec![DocumentCheck {
                document: root.display().to_string(),
                result: Err(e.into()),
            }]
        }
    };

    groups
        .into_iter()
        .map(|group| {
            let result = guard
                .validate_path(&group.document)
                .map_err(ApplicationError::from)
                .and_then(|path| Document::load(path).map_err(ApplicationError::from))
                .map(|document| engine.check(document, &group.rules).1);
            DocumentCheck {
                document: group.document,
                result,
            }
        })
        .collect()
}

/// Resolve a document path from a rule file against the root, without
/// requiring it to exist.
pub fn document_path(root: &Path, document: &str) -> PathBuf {
    let path = Path::new(document);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

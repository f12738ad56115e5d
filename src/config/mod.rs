pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{
    apply_rules, check_rules, document_path, ApplicationError, ApplyMode, DocumentCheck,
    DocumentReport, DocumentRun,
};
pub use loader::{load_from_path, load_from_str, ConfigError};
pub use schema::{
    DocumentRules, Metadata, PatternSpec, RuleConfig, RuleDefinition, ValidationError,
    ValidationIssue,
};

//! Handler metadata (§3, §4.1 — C1).
//!
//! One `HandlerMetadata` is declared per handler, in a `<name>.handler.toml`
//! sidecar next to its loadable unit. TOML gives us "strip `#`
//! comments, parse strictly" for free, which is exactly the contract
//! the distilled spec describes for the original's inline
//! `ccmodule = { ... }` mapping literal.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Permanent,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOn {
    Always,
    Success,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerDefaults {
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub run_on: Option<RunOn>,
}

/// Parsed `<name>.handler.toml`. Failure to parse this file is not an
/// error to the caller — the registry treats it as "not a handler" and
/// logs at `debug` (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends: BTreeSet<String>,
    #[serde(default)]
    pub provides: BTreeSet<String>,
    pub input_type: InputType,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub defaults: HandlerDefaults,
    /// Capability bit (REDESIGN FLAGS #1): declared here rather than
    /// inferred from `process_task`'s arity.
    #[serde(default)]
    pub cancellable: bool,
}

impl HandlerMetadata {
    /// Parse a sidecar file's contents. A parse failure is expected,
    /// routine input for the registry — callers should log it at
    /// `debug`, not propagate it as an operational error.
    pub fn parse(toml_source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_metadata() {
        let src = r#"
            input_type = "permanent"
        "#;
        let meta = HandlerMetadata::parse(src).unwrap();
        assert_eq!(meta.input_type, InputType::Permanent);
        assert!(meta.depends.is_empty());
        assert!(!meta.cancellable);
    }

    #[test]
    fn parses_full_metadata_with_comments() {
        let src = r#"
            # a handler for testing
            description = "test handler"
            depends = ["other"]
            provides = ["tag-a"]
            input_type = "transient"
            cancellable = true

            [inputs]
            source = "input file"

            [outputs]
            result = "output rows"

            [defaults]
            priority = 5
            run_on = "success"
        "#;
        let meta = HandlerMetadata::parse(src).unwrap();
        assert_eq!(meta.description, "test handler");
        assert!(meta.depends.contains("other"));
        assert_eq!(meta.defaults.priority, Some(5));
        assert_eq!(meta.defaults.run_on, Some(RunOn::Success));
        assert!(meta.cancellable);
    }

    #[test]
    fn rejects_missing_required_field() {
        let src = r#"description = "no input_type""#;
        assert!(HandlerMetadata::parse(src).is_err());
    }
}

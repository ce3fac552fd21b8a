//! Post-process directives (§4.7, C7).
//!
//! A job's `__post__` list is parsed leniently, one entry at a time:
//! a directive missing `output` is a warn-and-skip, not a hard error
//! for the whole array (§4.7: "Malformed directive (no `output`
//! field) ⇒ warn and skip").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a job's `__post__` list: "after success, upload
/// `result[output]` (or its basename) to `target`".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDirective {
    pub output: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub basename: bool,
    #[serde(default)]
    pub remove: bool,
}

impl PostDirective {
    /// Parse a single raw JSON directive. Returns `None` (the caller
    /// logs a warning) when the required `output` key is absent.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if !obj.contains_key("output") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

//! `TYPE_NORMAL`/`TYPE_ADMIN` (§6). Kept as plain string constants
//! since they cross into DB rows and CLI args as text, matching the
//! original's own string-typed worker kind.

pub const TYPE_NORMAL: &str = "normal";
pub const TYPE_ADMIN: &str = "admin";

//! Identifier wrappers shared across the joint.
//!
//! [`SessionKey`] partitions all per-session state. It is always produced by
//! [`SessionKey::resolve`] so the component set, stop flag and process
//! binding of one session can never end up under different keys.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Key used when a caller supplies no token (or an empty one).
pub const DEFAULT_SESSION: &str = "default";

/// Canonical per-session key derived from an authorization token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SessionKey(String);

impl SessionKey {
    /// Resolve the session key for an optional token.
    ///
    /// Missing and empty tokens map to [`DEFAULT_SESSION`]. Any other token
    /// is used verbatim.
    pub fn resolve(token: Option<&str>) -> Self {
        match token {
            Some(t) if !t.is_empty() => Self(t.to_owned()),
            _ => Self(DEFAULT_SESSION.to_owned()),
        }
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle of a simulation process owned by the simulation service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ProcessId(String);

impl ProcessId {
    /// Wrap a raw process identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Build a process id from whatever the simulation service returned.
    ///
    /// Strings are taken as-is, any other JSON scalar uses its textual form.
    /// Returns `None` for `null`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Self(s.clone())),
            other => Some(Self(other.to_string())),
        }
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one `process_tact` run, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new run identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Per-namespace resume state and identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source bucket identifier in `"<database>.<object>"` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Create a new namespace.
    #[must_use]
    pub fn new(ns: impl Into<String>) -> Self {
        Self(ns.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `<database>` part, up to the first dot.
    #[must_use]
    pub fn database(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(db, _)| db)
    }

    /// The `<object>` part, after the first dot. Empty when the namespace
    /// carries no dot.
    #[must_use]
    pub fn object(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, obj)| obj)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for Namespace {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Opaque writer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriterId(String);

impl WriterId {
    /// Create a new writer identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for WriterId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Which phase a namespace is in: initial snapshot or continuous capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Snapshot copy of existing rows.
    Copy,
    /// Change-data-capture from the stored identifier.
    Sync,
}

impl SyncPhase {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Sync => "sync",
        }
    }

    /// Parse the stored wire-format string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "copy" => Some(Self::Copy),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reader progress for one namespace.
///
/// Within a pipeline there is at most one live state per namespace; a
/// newer state (by `timestamp`) replaces the older one atomically when
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Opaque resume position the reader adaptor recognizes (resume
    /// token, source timestamp, OID). `None` means "from the start".
    pub identifier: Option<String>,
    /// Monotonic 64-bit assignment time; newer wins.
    pub timestamp: u64,
    /// Routing key.
    pub namespace: Namespace,
    /// Snapshot vs CDC phase.
    pub phase: SyncPhase,
}

impl State {
    /// Initial state for a namespace with no persisted history: snapshot
    /// from the start.
    #[must_use]
    pub fn copy_start(namespace: Namespace) -> Self {
        Self {
            identifier: None,
            timestamp: 0,
            namespace,
            phase: SyncPhase::Copy,
        }
    }

    /// Returns `true` when `self` supersedes `other` for the same
    /// namespace.
    #[must_use]
    pub fn is_newer_than(&self, other: &State) -> bool {
        self.timestamp > other.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_split() {
        let ns = Namespace::new("db.users");
        assert_eq!(ns.database(), "db");
        assert_eq!(ns.object(), "users");
    }

    #[test]
    fn namespace_without_dot() {
        let ns = Namespace::new("queue");
        assert_eq!(ns.database(), "queue");
        assert_eq!(ns.object(), "");
    }

    #[test]
    fn namespace_object_keeps_later_dots() {
        let ns = Namespace::new("db.schema.users");
        assert_eq!(ns.database(), "db");
        assert_eq!(ns.object(), "schema.users");
    }

    #[test]
    fn namespace_serde_transparent() {
        let ns = Namespace::new("db.users");
        assert_eq!(serde_json::to_string(&ns).unwrap(), "\"db.users\"");
    }

    #[test]
    fn phase_parse_roundtrip() {
        assert_eq!(SyncPhase::parse("copy"), Some(SyncPhase::Copy));
        assert_eq!(SyncPhase::parse("sync"), Some(SyncPhase::Sync));
        assert_eq!(SyncPhase::parse("bogus"), None);
        assert_eq!(SyncPhase::Sync.as_str(), "sync");
    }

    #[test]
    fn state_newer_comparison() {
        let ns = Namespace::new("db.users");
        let older = State {
            identifier: Some("100".into()),
            timestamp: 5,
            namespace: ns.clone(),
            phase: SyncPhase::Copy,
        };
        let newer = State {
            identifier: Some("200".into()),
            timestamp: 9,
            namespace: ns,
            phase: SyncPhase::Sync,
        };
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older.clone()));
    }

    #[test]
    fn state_serde_roundtrip() {
        let state = State {
            identifier: Some("token-77".into()),
            timestamp: 1234,
            namespace: Namespace::new("db.orders"),
            phase: SyncPhase::Sync,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}

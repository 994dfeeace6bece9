use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable key grouping all workspaces of one repository.
///
/// Usually the normalized URL of the `origin` remote, otherwise the canonical
/// path of the repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(String);

impl RepositoryId {
    /// Wrap an already-normalized identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached summary of the last observed lock holder, stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSummary {
    /// Holder process id.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Host the holder runs on.
    pub hostname: String,
}

/// One reusable working copy known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEntry {
    /// Absolute path of the workspace root; unique across the registry.
    pub path: PathBuf,
    /// Owning repository. Filled from the registry key on load.
    #[serde(skip)]
    pub repository_id: RepositoryId,
    /// Last task the workspace was prepared for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Primary workspaces are never selected automatically.
    #[serde(default)]
    pub primary: bool,
    /// Optional short label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the workspace was registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Advisory copy of the last observed lock holder.
    #[serde(rename = "lockedBy", default, skip_serializing_if = "Option::is_none")]
    pub locked_by_cache: Option<LockSummary>,
}

impl WorkspaceEntry {
    /// A fresh, unlocked, non-primary entry for `path`.
    pub fn new(repository_id: RepositoryId, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            repository_id,
            task_id: None,
            primary: false,
            name: None,
            description: None,
            created_at: Some(Utc::now()),
            locked_by_cache: None,
        }
    }

    /// Workspace root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Label used in listings: the name when set, otherwise the directory name.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Partial update of an entry's descriptive metadata. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    /// New task id.
    pub task_id: Option<String>,
    /// New label.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
}

impl MetadataPatch {
    /// Apply the patch to `entry`.
    pub fn apply(&self, entry: &mut WorkspaceEntry) {
        if let Some(task_id) = &self.task_id {
            entry.task_id = Some(task_id.clone());
        }
        if let Some(name) = &self.name {
            entry.name = Some(name.clone());
        }
        if let Some(description) = &self.description {
            entry.description = Some(description.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_registry_field_names() {
        let mut entry = WorkspaceEntry::new(RepositoryId::new("github.com/acme/widgets"), "/ws/1");
        entry.task_id = Some("task-123".to_string());
        entry.created_at = None;
        entry.locked_by_cache = Some(LockSummary {
            pid: 42,
            started_at: DateTime::parse_from_rfc3339("2025-01-22T10:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            hostname: "dev-machine".to_string(),
        });

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "path": "/ws/1",
                "taskId": "task-123",
                "primary": false,
                "lockedBy": {
                    "pid": 42,
                    "startedAt": "2025-01-22T10:30:00Z",
                    "hostname": "dev-machine"
                }
            })
        );
    }

    #[test]
    fn test_entry_deserializes_minimal_record() {
        let entry: WorkspaceEntry = serde_json::from_str(r#"{"path": "/ws/2"}"#).unwrap();
        assert_eq!(entry.path, PathBuf::from("/ws/2"));
        assert!(!entry.primary);
        assert!(entry.task_id.is_none());
        assert!(entry.locked_by_cache.is_none());
    }

    #[test]
    fn test_metadata_patch_only_touches_set_fields() {
        let mut entry = WorkspaceEntry::new(RepositoryId::new("repo"), "/ws/1");
        entry.name = Some("keep".to_string());

        MetadataPatch {
            task_id: Some("task-9".to_string()),
            ..MetadataPatch::default()
        }
        .apply(&mut entry);

        assert_eq!(entry.task_id.as_deref(), Some("task-9"));
        assert_eq!(entry.name.as_deref(), Some("keep"));
        assert_eq!(entry.label(), "keep");
    }
}

//! On-disk layout of the planning tree.
//!
//! ```text
//! planning/
//!   projects/P-x/project.md
//!   projects/P-x/epics/E-y/epic.md
//!   projects/P-x/epics/E-y/features/F-z/feature.md
//!   projects/P-x/epics/E-y/features/F-z/tasks-open/T-a.md
//!   projects/P-x/epics/E-y/features/F-z/tasks-done/20260101_120000-T-a.md
//!   tasks-open/ST-b.md
//!   tasks-done/20260101_120000-ST-b.md
//! ```
//!
//! # Invariants
//! - Hidden files (leading `.`) are never records; temp files and the lock
//!   directory rely on this.
//! - Done file names carry a `YYYYMMDD_HHMMSS-` UTC completion prefix.

use crate::model::id::ObjectId;
use crate::model::object::{ObjectKind, ObjectStatus};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

pub const PROJECTS_DIR: &str = "projects";
pub const EPICS_DIR: &str = "epics";
pub const FEATURES_DIR: &str = "features";
pub const TASKS_OPEN_DIR: &str = "tasks-open";
pub const TASKS_DONE_DIR: &str = "tasks-done";
pub const LOCKS_DIR: &str = ".locks";
pub const RECORD_EXTENSION: &str = "md";

const DONE_PREFIX_FORMAT: &str = "%Y%m%d_%H%M%S";

static DONE_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}_\d{6}-(.+)\.md$").expect("valid done file regex"));

/// Status-scoped task directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskBucket {
    Open,
    Done,
}

impl TaskBucket {
    pub fn for_status(status: ObjectStatus) -> Self {
        if status == ObjectStatus::Done {
            Self::Done
        } else {
            Self::Open
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Open => TASKS_OPEN_DIR,
            Self::Done => TASKS_DONE_DIR,
        }
    }
}

/// Physical location of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordLocation {
    pub path: PathBuf,
    /// `Some` for task records, `None` for project/epic/feature records.
    pub bucket: Option<TaskBucket>,
}

impl RecordLocation {
    pub fn container(path: PathBuf) -> Self {
        Self { path, bucket: None }
    }

    pub fn task(path: PathBuf, bucket: TaskBucket) -> Self {
        Self {
            path,
            bucket: Some(bucket),
        }
    }

    /// Directory that owns this record's children (or, for tasks, the
    /// directory holding its status buckets).
    pub fn home_dir(&self) -> &Path {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        match self.bucket {
            Some(_) => dir.parent().unwrap_or(dir),
            None => dir,
        }
    }

    /// Record file name; used in diagnostics instead of the full path.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Path arithmetic for one planning root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    planning_dir: PathBuf,
}

impl Layout {
    pub fn new(planning_dir: impl Into<PathBuf>) -> Self {
        Self {
            planning_dir: planning_dir.into(),
        }
    }

    pub fn planning_dir(&self) -> &Path {
        &self.planning_dir
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.planning_dir.join(PROJECTS_DIR)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.planning_dir.join(LOCKS_DIR)
    }

    /// Flat status directory for standalone tasks.
    pub fn standalone_dir(&self, bucket: TaskBucket) -> PathBuf {
        self.planning_dir.join(bucket.dir_name())
    }

    pub fn project_location(&self, id: &ObjectId) -> RecordLocation {
        RecordLocation::container(
            self.projects_dir()
                .join(id.as_str())
                .join(record_file_name(ObjectKind::Project)),
        )
    }

    /// Location of a new container record under `parent_home`.
    pub fn child_container_location(
        &self,
        parent_home: &Path,
        kind: ObjectKind,
        id: &ObjectId,
    ) -> RecordLocation {
        let group = match kind {
            ObjectKind::Project => return self.project_location(id),
            ObjectKind::Epic => EPICS_DIR,
            _ => FEATURES_DIR,
        };
        RecordLocation::container(
            parent_home
                .join(group)
                .join(id.as_str())
                .join(record_file_name(kind)),
        )
    }

    /// Location of a task record inside `home` (a feature dir or the planning dir).
    pub fn task_location(
        &self,
        home: &Path,
        id: &ObjectId,
        bucket: TaskBucket,
        completed: DateTime<Utc>,
    ) -> RecordLocation {
        let dir = home.join(bucket.dir_name());
        let file_name = match bucket {
            TaskBucket::Open => format!("{id}.{RECORD_EXTENSION}"),
            TaskBucket::Done => done_file_name(id, completed),
        };
        RecordLocation::task(dir.join(file_name), bucket)
    }
}

/// Fixed record file name for project/epic/feature records.
pub fn record_file_name(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Project => "project.md",
        ObjectKind::Epic => "epic.md",
        ObjectKind::Feature => "feature.md",
        ObjectKind::Task => "task.md",
    }
}

/// Directory name grouping children of `kind` under a container.
pub fn child_group_dir(kind: ObjectKind) -> Option<&'static str> {
    match kind {
        ObjectKind::Project => Some(EPICS_DIR),
        ObjectKind::Epic => Some(FEATURES_DIR),
        ObjectKind::Feature | ObjectKind::Task => None,
    }
}

pub fn done_file_name(id: &ObjectId, completed: DateTime<Utc>) -> String {
    format!(
        "{}-{id}.{RECORD_EXTENSION}",
        completed.format(DONE_PREFIX_FORMAT)
    )
}

/// Extracts the id portion of a task record file name.
///
/// Returns `None` for hidden files and non-record files.
pub fn task_id_from_file_name(name: &str) -> Option<&str> {
    if is_hidden(name) {
        return None;
    }
    if let Some(captures) = DONE_FILE_RE.captures(name) {
        return captures.get(1).map(|m| m.as_str());
    }
    name.strip_suffix(".md")
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::{done_file_name, task_id_from_file_name, Layout, TaskBucket};
    use crate::model::id::ObjectId;
    use chrono::{TimeZone, Utc};
    use std::path::Path;

    #[test]
    fn done_file_name_embeds_completion_prefix() {
        let id = ObjectId::parse("T-ship-it").unwrap();
        let completed = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let name = done_file_name(&id, completed);
        assert_eq!(name, "20260102_030405-T-ship-it.md");
        assert_eq!(task_id_from_file_name(&name), Some("T-ship-it"));
    }

    #[test]
    fn task_file_parsing_skips_hidden_and_foreign_files() {
        assert_eq!(task_id_from_file_name("ST-a.md"), Some("ST-a"));
        assert_eq!(task_id_from_file_name(".T-a.md.1234.tmp"), None);
        assert_eq!(task_id_from_file_name("notes.txt"), None);
    }

    #[test]
    fn task_location_home_dir_is_bucket_parent() {
        let layout = Layout::new("/p/planning");
        let id = ObjectId::parse("T-a").unwrap();
        let home = Path::new("/p/planning/projects/P-x/epics/E-y/features/F-z");
        let location = layout.task_location(home, &id, TaskBucket::Open, Utc::now());
        assert_eq!(location.home_dir(), home);
        assert!(location.path.ends_with("tasks-open/T-a.md"));
    }
}

//! Record store contract and filesystem implementation.
//!
//! # Responsibility
//! - Locate records by id without walking the whole tree.
//! - Load, save and relocate records with crash-safe write ordering.
//! - Enumerate records for a scope, a parent or the standalone pool.
//!
//! # Invariants
//! - `save` never exposes a partially written record.
//! - `move_record` writes the new copy (temp, fsync, rename, dir fsync)
//!   before deleting the old one, so a crash leaves at least one complete
//!   copy. When both survive, the copy with the later `updated` wins.
//! - This layer does not serialize writers to one id; callers hold a
//!   [`RecordLock`] for that.

use crate::config::PlannerConfig;
use crate::model::id::{IdPrefix, ObjectId};
use crate::model::object::{ObjectKind, WorkObject};
use crate::repo::claim_lock::{self, RecordLock};
use crate::repo::codec;
use crate::repo::layout::{
    child_group_dir, is_hidden, record_file_name, task_id_from_file_name, Layout,
    RecordLocation, TaskBucket, EPICS_DIR, FEATURES_DIR,
};
use crate::repo::{StoreError, StoreResult};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// One loaded record with its physical location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub location: RecordLocation,
    pub object: WorkObject,
}

/// Repository interface for work object records.
pub trait RecordStore: Send + Sync {
    /// Finds the current location of `id`, if a record exists.
    fn locate(&self, id: &ObjectId) -> StoreResult<Option<RecordLocation>>;
    /// Loads the record at a known location.
    fn load_at(&self, location: &RecordLocation) -> StoreResult<WorkObject>;
    /// Writes a brand-new record. Fails when the id already exists.
    fn create(&self, object: &WorkObject) -> StoreResult<RecordLocation>;
    /// Writes `object` where its status says it belongs, relocating if needed.
    fn save(&self, object: &WorkObject) -> StoreResult<RecordLocation>;
    /// Transactionally relocates a task record into `to`, writing `object`.
    fn move_record(
        &self,
        object: &WorkObject,
        from: &RecordLocation,
        to: TaskBucket,
    ) -> StoreResult<RecordLocation>;
    /// Lists every record under `scope`, or the whole store when `None`.
    fn list_records(&self, scope: Option<&RecordLocation>) -> StoreResult<Vec<StoredRecord>>;
    /// Lists standalone task records.
    fn list_standalone(&self) -> StoreResult<Vec<StoredRecord>>;
    /// Lists immediate child records of a container record.
    fn list_child_records(
        &self,
        parent: &RecordLocation,
        parent_kind: ObjectKind,
    ) -> StoreResult<Vec<StoredRecord>>;
    /// Takes the per-record lock; `None` when another holder has it.
    fn try_lock(&self, id: &ObjectId) -> StoreResult<Option<RecordLock>>;

    fn load(&self, id: &ObjectId) -> StoreResult<WorkObject> {
        let location = self
            .locate(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        self.load_at(&location)
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MoveFault {
    /// Simulated crash after the new copy is durable, before delete-old.
    AfterWriteNew,
}

/// Filesystem-backed record store.
#[derive(Debug)]
pub struct FsRecordStore {
    layout: Layout,
    sync_writes: bool,
    lock_stale_after: Duration,
    #[cfg(test)]
    move_fault: std::sync::Mutex<Option<MoveFault>>,
}

impl FsRecordStore {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            layout: Layout::new(config.planning_dir()),
            sync_writes: config.sync_writes,
            lock_stale_after: config.claim_lock_stale_after,
            #[cfg(test)]
            move_fault: std::sync::Mutex::new(None),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[cfg(test)]
    pub(crate) fn inject_move_fault(&self, fault: MoveFault) {
        if let Ok(mut slot) = self.move_fault.lock() {
            *slot = Some(fault);
        }
    }

    #[cfg(test)]
    fn take_move_fault(&self) -> Option<MoveFault> {
        self.move_fault.lock().ok().and_then(|mut slot| slot.take())
    }

    fn candidates(&self, id: &ObjectId) -> StoreResult<Vec<RecordLocation>> {
        let mut found = Vec::new();
        match id.prefix() {
            IdPrefix::Project => {
                push_if_file(&mut found, self.layout.project_location(id));
            }
            IdPrefix::Epic => {
                for project in subdirs(&self.layout.projects_dir())? {
                    push_if_file(
                        &mut found,
                        self.layout
                            .child_container_location(&project, ObjectKind::Epic, id),
                    );
                }
            }
            IdPrefix::Feature => {
                for epic in self.epic_dirs()? {
                    push_if_file(
                        &mut found,
                        self.layout
                            .child_container_location(&epic, ObjectKind::Feature, id),
                    );
                }
            }
            IdPrefix::Task => {
                for feature in self.feature_dirs()? {
                    found.extend(task_files_named(&feature, id)?);
                }
            }
            IdPrefix::StandaloneTask => {
                found.extend(task_files_named(self.layout.planning_dir(), id)?);
            }
        }
        Ok(found)
    }

    fn epic_dirs(&self) -> StoreResult<Vec<PathBuf>> {
        let mut out = Vec::new();
        for project in subdirs(&self.layout.projects_dir())? {
            out.extend(subdirs(&project.join(EPICS_DIR))?);
        }
        Ok(out)
    }

    fn feature_dirs(&self) -> StoreResult<Vec<PathBuf>> {
        let mut out = Vec::new();
        for epic in self.epic_dirs()? {
            out.extend(subdirs(&epic.join(FEATURES_DIR))?);
        }
        Ok(out)
    }

    /// Picks the authoritative copy when a crash left duplicates.
    fn pick_authoritative(
        &self,
        id: &ObjectId,
        mut candidates: Vec<RecordLocation>,
    ) -> StoreResult<Option<RecordLocation>> {
        if candidates.len() <= 1 {
            return Ok(candidates.pop());
        }
        warn!(
            "event=duplicate_record module=repo status=recovering id={} copies={}",
            id,
            candidates.len()
        );
        let mut best: Option<(RecordLocation, WorkObject)> = None;
        for location in candidates {
            let object = self.load_at(&location)?;
            let replace = match &best {
                None => true,
                Some((best_location, best_object)) => {
                    object.updated > best_object.updated
                        || (object.updated == best_object.updated
                            && location.bucket == Some(TaskBucket::Done)
                            && best_location.bucket != Some(TaskBucket::Done))
                }
            };
            if replace {
                best = Some((location, object));
            }
        }
        Ok(best.map(|(location, _)| location))
    }

    /// Computes where a record that does not exist yet should be written.
    fn placement_for(&self, object: &WorkObject) -> StoreResult<RecordLocation> {
        if object.kind == ObjectKind::Project {
            return Ok(self.layout.project_location(&object.id));
        }
        let bucket = TaskBucket::for_status(object.status);
        let parent = match &object.parent {
            Some(parent) => parent,
            None => {
                return Ok(self.layout.task_location(
                    self.layout.planning_dir(),
                    &object.id,
                    bucket,
                    object.updated,
                ))
            }
        };
        let parent_location = self
            .locate(parent)?
            .ok_or_else(|| StoreError::ParentNotFound(parent.clone()))?;
        let home = parent_location.home_dir();
        Ok(match object.kind {
            ObjectKind::Task => self
                .layout
                .task_location(home, &object.id, bucket, object.updated),
            kind => self.layout.child_container_location(home, kind, &object.id),
        })
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> StoreResult<()> {
        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir).map_err(StoreError::io("create record dir"))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

        let written = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(contents.as_bytes())?;
                if self.sync_writes {
                    file.sync_all()?;
                }
                Ok(())
            })
            .and_then(|()| fs::rename(&tmp, path));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io("write record")(err));
        }
        self.sync_dir(dir)
    }

    fn sync_dir(&self, dir: &Path) -> StoreResult<()> {
        if !self.sync_writes {
            return Ok(());
        }
        #[cfg(unix)]
        {
            File::open(dir)
                .and_then(|handle| handle.sync_all())
                .map_err(StoreError::io("sync record dir"))?;
        }
        #[cfg(not(unix))]
        {
            let _ = dir;
        }
        Ok(())
    }

    fn collect_container(
        &self,
        record_path: &Path,
        kind: ObjectKind,
        out: &mut Vec<StoredRecord>,
    ) -> StoreResult<()> {
        if record_path.is_file() {
            let location = RecordLocation::container(record_path.to_path_buf());
            let object = self.load_at(&location)?;
            out.push(StoredRecord { location, object });
        }
        let home = record_path.parent().unwrap_or(Path::new("."));
        match (kind, child_group_dir(kind)) {
            (ObjectKind::Feature, _) => self.collect_tasks(home, out),
            (_, Some(group)) => {
                let child_kind = kind.child_kind().unwrap_or(ObjectKind::Task);
                for child in subdirs(&home.join(group))? {
                    self.collect_container(
                        &child.join(record_file_name(child_kind)),
                        child_kind,
                        out,
                    )?;
                }
                Ok(())
            }
            (_, None) => Ok(()),
        }
    }

    fn collect_tasks(&self, home: &Path, out: &mut Vec<StoredRecord>) -> StoreResult<()> {
        for bucket in [TaskBucket::Open, TaskBucket::Done] {
            for (path, _) in task_files(&home.join(bucket.dir_name()))? {
                let location = RecordLocation::task(path, bucket);
                let object = self.load_at(&location)?;
                out.push(StoredRecord { location, object });
            }
        }
        Ok(())
    }
}

impl RecordStore for FsRecordStore {
    fn locate(&self, id: &ObjectId) -> StoreResult<Option<RecordLocation>> {
        let candidates = self.candidates(id)?;
        self.pick_authoritative(id, candidates)
    }

    fn load_at(&self, location: &RecordLocation) -> StoreResult<WorkObject> {
        let record = location.file_name();
        let text = fs::read_to_string(&location.path).map_err(StoreError::io("read record"))?;
        let object = codec::decode(&text, &record)?;

        let expected_id = match location.bucket {
            Some(_) => task_id_from_file_name(&record).map(str::to_string),
            None => location
                .path
                .parent()
                .and_then(|dir| dir.file_name())
                .map(|name| name.to_string_lossy().into_owned()),
        };
        if expected_id.as_deref() != Some(object.id.as_str()) {
            return Err(StoreError::InvalidRecord {
                record,
                message: format!("record id `{}` does not match its location", object.id),
            });
        }
        Ok(object)
    }

    fn create(&self, object: &WorkObject) -> StoreResult<RecordLocation> {
        object.validate()?;
        if self.locate(&object.id)?.is_some() {
            return Err(StoreError::AlreadyExists(object.id.clone()));
        }
        let location = self.placement_for(object)?;
        self.write_atomic(&location.path, &codec::encode(object)?)?;
        debug!(
            "event=record_create module=repo status=ok id={} kind={}",
            object.id, object.kind
        );
        Ok(location)
    }

    fn save(&self, object: &WorkObject) -> StoreResult<RecordLocation> {
        object.validate()?;
        let current = match self.locate(&object.id)? {
            Some(location) => location,
            None => return self.create(object),
        };
        let target_bucket = match object.kind {
            ObjectKind::Task => Some(TaskBucket::for_status(object.status)),
            _ => None,
        };
        match (current.bucket, target_bucket) {
            (Some(from), Some(to)) if from != to => self.move_record(object, &current, to),
            _ => {
                self.write_atomic(&current.path, &codec::encode(object)?)?;
                Ok(current)
            }
        }
    }

    fn move_record(
        &self,
        object: &WorkObject,
        from: &RecordLocation,
        to: TaskBucket,
    ) -> StoreResult<RecordLocation> {
        object.validate()?;
        let target = self
            .layout
            .task_location(from.home_dir(), &object.id, to, object.updated);

        self.write_atomic(&target.path, &codec::encode(object)?)?;

        #[cfg(test)]
        {
            if self.take_move_fault() == Some(MoveFault::AfterWriteNew) {
                return Err(StoreError::Io {
                    op: "move record",
                    source: std::io::Error::new(ErrorKind::Other, "injected fault"),
                });
            }
        }

        if target.path != from.path {
            match fs::remove_file(&from.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(StoreError::io("remove moved record")(err)),
            }
            if let Some(dir) = from.path.parent() {
                self.sync_dir(dir)?;
            }
        }
        debug!(
            "event=record_move module=repo status=ok id={} to={}",
            object.id,
            to.dir_name()
        );
        Ok(target)
    }

    fn list_records(&self, scope: Option<&RecordLocation>) -> StoreResult<Vec<StoredRecord>> {
        let mut out = Vec::new();
        match scope {
            None => {
                for project in subdirs(&self.layout.projects_dir())? {
                    self.collect_container(
                        &project.join(record_file_name(ObjectKind::Project)),
                        ObjectKind::Project,
                        &mut out,
                    )?;
                }
                self.collect_tasks(self.layout.planning_dir(), &mut out)?;
            }
            Some(location) if location.bucket.is_some() => {
                let object = self.load_at(location)?;
                out.push(StoredRecord {
                    location: location.clone(),
                    object,
                });
            }
            Some(location) => {
                let kind = container_kind(&location.path).ok_or_else(|| {
                    StoreError::InvalidRecord {
                        record: location.file_name(),
                        message: "not a container record".to_string(),
                    }
                })?;
                self.collect_container(&location.path, kind, &mut out)?;
            }
        }
        self.dedupe(out)
    }

    fn list_standalone(&self) -> StoreResult<Vec<StoredRecord>> {
        let mut out = Vec::new();
        self.collect_tasks(self.layout.planning_dir(), &mut out)?;
        self.dedupe(out)
    }

    fn list_child_records(
        &self,
        parent: &RecordLocation,
        parent_kind: ObjectKind,
    ) -> StoreResult<Vec<StoredRecord>> {
        let home = parent.home_dir();
        let mut out = Vec::new();
        match parent_kind {
            ObjectKind::Task => {}
            ObjectKind::Feature => self.collect_tasks(home, &mut out)?,
            kind => {
                let child_kind = kind.child_kind().unwrap_or(ObjectKind::Task);
                let group = child_group_dir(kind).unwrap_or(FEATURES_DIR);
                for child in subdirs(&home.join(group))? {
                    let path = child.join(record_file_name(child_kind));
                    if path.is_file() {
                        let location = RecordLocation::container(path);
                        let object = self.load_at(&location)?;
                        out.push(StoredRecord { location, object });
                    }
                }
            }
        }
        self.dedupe(out)
    }

    fn try_lock(&self, id: &ObjectId) -> StoreResult<Option<RecordLock>> {
        claim_lock::try_lock(&self.layout.locks_dir(), id, self.lock_stale_after)
    }
}

impl FsRecordStore {
    /// Collapses crash duplicates, keeping the authoritative copy per id.
    fn dedupe(&self, records: Vec<StoredRecord>) -> StoreResult<Vec<StoredRecord>> {
        let mut by_id: HashMap<ObjectId, usize> = HashMap::new();
        let mut out: Vec<StoredRecord> = Vec::with_capacity(records.len());
        for record in records {
            match by_id.get(&record.object.id) {
                None => {
                    by_id.insert(record.object.id.clone(), out.len());
                    out.push(record);
                }
                Some(&index) => {
                    let existing = &out[index];
                    let newer = record.object.updated > existing.object.updated
                        || (record.object.updated == existing.object.updated
                            && record.location.bucket == Some(TaskBucket::Done));
                    warn!(
                        "event=duplicate_record module=repo status=recovering id={}",
                        record.object.id
                    );
                    if newer {
                        out[index] = record;
                    }
                }
            }
        }
        Ok(out)
    }
}

fn container_kind(record_path: &Path) -> Option<ObjectKind> {
    let name = record_path.file_name()?.to_str()?;
    [ObjectKind::Project, ObjectKind::Epic, ObjectKind::Feature]
        .into_iter()
        .find(|kind| record_file_name(*kind) == name)
}

fn push_if_file(found: &mut Vec<RecordLocation>, location: RecordLocation) {
    if location.path.is_file() {
        found.push(location);
    }
}

/// Sorted non-hidden subdirectories; a missing directory yields none.
fn subdirs(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StoreError::io("list dir")(err)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(StoreError::io("list dir"))?;
        let name = entry.file_name();
        if is_hidden(&name.to_string_lossy()) {
            continue;
        }
        if entry
            .file_type()
            .map_err(StoreError::io("list dir"))?
            .is_dir()
        {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Sorted task record files in one bucket directory, with their ids.
fn task_files(dir: &Path) -> StoreResult<Vec<(PathBuf, String)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StoreError::io("list dir")(err)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(StoreError::io("list dir"))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = task_id_from_file_name(&name) {
            let id = id.to_string();
            out.push((entry.path(), id));
        }
    }
    out.sort();
    Ok(out)
}

fn task_files_named(home: &Path, id: &ObjectId) -> StoreResult<Vec<RecordLocation>> {
    let mut found = Vec::new();
    for bucket in [TaskBucket::Open, TaskBucket::Done] {
        for (path, file_id) in task_files(&home.join(bucket.dir_name()))? {
            if file_id == id.as_str() {
                found.push(RecordLocation::task(path, bucket));
            }
        }
    }
    Ok(found)
}

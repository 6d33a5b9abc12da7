use lattice_core::repo::layout::TaskBucket;
use lattice_core::{
    ClaimRequest, FsRecordStore, NewObject, ObjectId, ObjectKind, ObjectStatus, Planner,
    PlannerConfig, RecordStore, WorkObject,
};
use regex::Regex;
use std::fs;
use tempfile::TempDir;

fn config(dir: &TempDir) -> PlannerConfig {
    let mut config = PlannerConfig::new(dir.path());
    config.sync_writes = false;
    config
}

fn id(raw: &str) -> ObjectId {
    ObjectId::parse(raw).unwrap()
}

#[test]
fn save_of_loaded_record_only_moves_updated() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsRecordStore::new(&config(&dir));
    let mut task = WorkObject::new(id("ST-steady"), None, "Steady");
    task.body = "First line.\n\n- keep\n- these bytes\n".to_string();
    task.prerequisites = vec![id("ST-other")];
    let location = store.create(&task).unwrap();
    let before = fs::read_to_string(&location.path).unwrap();

    let mut loaded = store.load(&task.id).unwrap();
    assert_eq!(loaded, task);
    loaded.touch();
    let saved_at = store.save(&loaded).unwrap();
    assert_eq!(saved_at, location);

    let reloaded = store.load(&task.id).unwrap();
    assert!(reloaded.updated > task.updated);
    assert_eq!(
        WorkObject {
            updated: task.updated,
            ..reloaded
        },
        task
    );

    let after = fs::read_to_string(&location.path).unwrap();
    let changed: Vec<_> = before
        .lines()
        .zip(after.lines())
        .filter(|(a, b)| a != b)
        .collect();
    assert_eq!(changed.len(), 1);
    assert!(changed[0].0.starts_with("updated:"));
}

#[test]
fn records_are_markdown_with_front_matter() {
    let dir = tempfile::tempdir().unwrap();
    let planner = Planner::open(config(&dir)).unwrap();
    let mut request = NewObject::new(ObjectKind::Task, "Add login");
    request.body = "Body text".to_string();
    planner.create_object(request).unwrap();

    let text = fs::read_to_string(dir.path().join("planning/tasks-open/ST-add-login.md")).unwrap();
    assert!(text.starts_with("---\nkind: task\nid: ST-add-login\n"));
    assert!(text.contains("\nstatus: open\n"));
    assert!(text.contains("\nschema_version: '1.1'\n"));
    assert!(text.ends_with("---\nBody text"));
}

#[test]
fn completed_task_lands_in_done_dir_with_timestamp_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let planner = Planner::open(config(&dir)).unwrap();
    planner
        .create_object(NewObject::new(ObjectKind::Task, "Ship it"))
        .unwrap();
    planner.claim_next(ClaimRequest::direct("ST-ship-it")).unwrap();
    planner
        .complete_task("ST-ship-it", Some("shipped"), &["src/lib.rs".to_string()])
        .unwrap();

    let planning = dir.path().join("planning");
    let open: Vec<_> = fs::read_dir(planning.join("tasks-open")).unwrap().collect();
    assert!(open.is_empty());

    let done: Vec<String> = fs::read_dir(planning.join("tasks-done"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(done.len(), 1);
    let pattern = Regex::new(r"^\d{8}_\d{6}-ST-ship-it\.md$").unwrap();
    assert!(pattern.is_match(&done[0]), "unexpected name {}", done[0]);

    let task = planner.get_object("ST-ship-it").unwrap();
    assert_eq!(task.status, ObjectStatus::Done);
    assert!(task.body.contains("### Log"));
    assert!(task.body.contains("shipped"));
    assert!(task.body.contains("- files changed: src/lib.rs"));

    let location = planner.store().locate(&task.id).unwrap().unwrap();
    assert_eq!(location.bucket, Some(TaskBucket::Done));
}

#[test]
fn hierarchical_task_is_located_under_its_feature() {
    let dir = tempfile::tempdir().unwrap();
    let planner = Planner::open(config(&dir)).unwrap();
    planner
        .create_object(NewObject::new(ObjectKind::Project, "Apollo"))
        .unwrap();
    planner
        .create_object(NewObject::new(ObjectKind::Epic, "Core").with_parent("P-apollo"))
        .unwrap();
    planner
        .create_object(NewObject::new(ObjectKind::Feature, "Auth").with_parent("E-core"))
        .unwrap();
    planner
        .create_object(NewObject::new(ObjectKind::Task, "Login").with_parent("F-auth"))
        .unwrap();

    let location = planner.store().locate(&id("T-login")).unwrap().unwrap();
    assert!(location
        .path
        .ends_with("projects/P-apollo/epics/E-core/features/F-auth/tasks-open/T-login.md"));
    assert_eq!(location.bucket, Some(TaskBucket::Open));
    assert!(planner.store().locate(&id("T-absent")).unwrap().is_none());
}

#[test]
fn corrupt_record_surfaces_as_invalid_record_without_paths() {
    let dir = tempfile::tempdir().unwrap();
    let planner = Planner::open(config(&dir)).unwrap();
    planner
        .create_object(NewObject::new(ObjectKind::Task, "Fragile"))
        .unwrap();
    let path = dir.path().join("planning/tasks-open/ST-fragile.md");
    fs::write(&path, "no front matter here").unwrap();

    let err = planner.get_object("ST-fragile").unwrap_err();
    assert_eq!(err.code(), "invalid_record");
    assert!(!err.to_string().contains(&dir.path().display().to_string()));
}

#[test]
fn record_whose_id_disagrees_with_its_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsRecordStore::new(&config(&dir));
    let task = WorkObject::new(id("ST-real"), None, "Real");
    let location = store.create(&task).unwrap();
    let renamed = location.path.with_file_name("ST-alias.md");
    fs::rename(&location.path, &renamed).unwrap();

    let err = store.load(&id("ST-alias")).unwrap_err();
    assert!(err.to_string().contains("does not match its location"));
}

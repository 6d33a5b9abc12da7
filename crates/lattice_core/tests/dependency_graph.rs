use lattice_core::{
    format_cycle, NewObject, ObjectKind, ObjectPatch, PlanError, Planner, PlannerConfig,
};
use std::sync::Barrier;
use std::thread;
use tempfile::TempDir;

fn setup() -> (TempDir, Planner) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PlannerConfig::new(dir.path());
    config.sync_writes = false;
    let planner = Planner::open(config).unwrap();
    (dir, planner)
}

fn standalone(planner: &Planner, title: &str, prerequisites: &[&str]) {
    planner
        .create_object(
            NewObject::new(ObjectKind::Task, title).with_prerequisites(prerequisites.iter().copied()),
        )
        .unwrap();
}

fn set_prerequisites(planner: &Planner, id: &str, prerequisites: &[&str]) -> Result<(), PlanError> {
    planner
        .update_object(
            id,
            ObjectPatch {
                prerequisites: Some(prerequisites.iter().map(|p| p.to_string()).collect()),
                ..ObjectPatch::default()
            },
            false,
        )
        .map(|_| ())
}

fn cycle_text(err: PlanError) -> String {
    match err {
        PlanError::CircularDependency(path) => format_cycle(&path),
        other => panic!("expected circular dependency, got {other:?}"),
    }
}

#[test]
fn unknown_prerequisites_are_batched_and_nothing_is_written() {
    let (dir, planner) = setup();
    standalone(&planner, "Known", &[]);

    let err = planner
        .create_object(NewObject::new(ObjectKind::Task, "A").with_prerequisites([
            "ST-missing",
            "ST-known",
            "not an id",
            "T-gone",
            "ST-missing",
        ]))
        .unwrap_err();

    match err {
        PlanError::UnknownPrerequisite(ids) => {
            assert_eq!(ids, vec!["ST-missing", "not an id", "T-gone"]);
        }
        other => panic!("expected unknown prerequisite, got {other:?}"),
    }
    assert!(!dir.path().join("planning/tasks-open/ST-a.md").exists());
}

#[test]
fn self_reference_is_a_cycle() {
    let (_dir, planner) = setup();
    standalone(&planner, "A", &[]);

    let err = set_prerequisites(&planner, "ST-a", &["ST-a"]).unwrap_err();
    assert_eq!(
        cycle_text(err),
        "ST-a (task, standalone) → ST-a (task, standalone)"
    );
    assert!(planner.get_object("ST-a").unwrap().prerequisites.is_empty());
}

#[test]
fn cross_family_cycle_names_kind_and_family() {
    let (_dir, planner) = setup();
    standalone(&planner, "A", &[]);
    planner
        .create_object(NewObject::new(ObjectKind::Project, "P"))
        .unwrap();
    planner
        .create_object(NewObject::new(ObjectKind::Epic, "E").with_parent("P-p"))
        .unwrap();
    planner
        .create_object(
            NewObject::new(ObjectKind::Feature, "B")
                .with_parent("E-e")
                .with_prerequisites(["ST-a"]),
        )
        .unwrap();

    let err = set_prerequisites(&planner, "ST-a", &["F-b"]).unwrap_err();
    assert_eq!(err.code(), "circular_dependency");
    assert_eq!(
        err.to_string(),
        "circular dependency: F-b (feature, hierarchical) → ST-a (task, standalone) → F-b (feature, hierarchical)"
    );
}

#[test]
fn cycle_report_does_not_depend_on_edge_order() {
    let (_first_dir, first) = setup();
    standalone(&first, "A", &[]);
    standalone(&first, "B", &[]);
    standalone(&first, "C", &[]);
    set_prerequisites(&first, "ST-a", &["ST-b"]).unwrap();
    set_prerequisites(&first, "ST-b", &["ST-c"]).unwrap();
    let first_cycle = cycle_text(set_prerequisites(&first, "ST-c", &["ST-a"]).unwrap_err());

    let (_second_dir, second) = setup();
    standalone(&second, "A", &[]);
    standalone(&second, "B", &[]);
    standalone(&second, "C", &[]);
    set_prerequisites(&second, "ST-c", &["ST-a"]).unwrap();
    set_prerequisites(&second, "ST-b", &["ST-c"]).unwrap();
    let second_cycle = cycle_text(set_prerequisites(&second, "ST-a", &["ST-b"]).unwrap_err());

    assert_eq!(first_cycle, second_cycle);
    assert_eq!(
        first_cycle,
        "ST-a (task, standalone) → ST-b (task, standalone) → ST-c (task, standalone) → ST-a (task, standalone)"
    );
}

#[test]
fn warm_acyclic_memo_never_hides_a_new_cycle() {
    let (_dir, planner) = setup();
    standalone(&planner, "C", &[]);
    standalone(&planner, "B", &["ST-c"]);

    planner
        .validate_prerequisites("ST-a", &["ST-b".to_string()])
        .unwrap();
    planner
        .validate_prerequisites("ST-a", &["ST-b".to_string()])
        .unwrap();
    standalone(&planner, "A", &["ST-b"]);

    let err = set_prerequisites(&planner, "ST-c", &["ST-a"]).unwrap_err();
    assert_eq!(
        cycle_text(err),
        "ST-a (task, standalone) → ST-b (task, standalone) → ST-c (task, standalone) → ST-a (task, standalone)"
    );
}

#[test]
fn diamond_dependencies_are_not_cycles() {
    let (_dir, planner) = setup();
    standalone(&planner, "D", &[]);
    standalone(&planner, "B", &["ST-d"]);
    standalone(&planner, "C", &["ST-d"]);
    standalone(&planner, "A", &["ST-b", "ST-c"]);

    assert!(planner
        .validate_prerequisites("ST-e", &["ST-a".to_string(), "ST-d".to_string()])
        .is_ok());
    let graph = planner.graph().unwrap();
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.edge_count(), 4);
}

#[test]
fn duplicate_prerequisites_collapse_in_first_seen_order() {
    let (_dir, planner) = setup();
    standalone(&planner, "X", &[]);
    standalone(&planner, "Y", &[]);
    standalone(&planner, "Z", &["ST-y", "ST-x", "ST-y"]);

    let stored: Vec<String> = planner
        .get_object("ST-z")
        .unwrap()
        .prerequisites
        .iter()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(stored, vec!["ST-y", "ST-x"]);
}

#[test]
fn concurrent_opposite_edges_never_commit_a_cycle() {
    for _ in 0..25 {
        let (_dir, planner) = setup();
        standalone(&planner, "A", &[]);
        standalone(&planner, "B", &[]);
        let barrier = Barrier::new(2);

        let (forward, backward) = thread::scope(|scope| {
            let forward = scope.spawn(|| {
                barrier.wait();
                set_prerequisites(&planner, "ST-a", &["ST-b"])
            });
            let backward = scope.spawn(|| {
                barrier.wait();
                set_prerequisites(&planner, "ST-b", &["ST-a"])
            });
            (forward.join().unwrap(), backward.join().unwrap())
        });

        let rejected: Vec<PlanError> = [forward, backward]
            .into_iter()
            .filter_map(Result::err)
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].code(), "circular_dependency");

        planner.invalidate_cache();
        let a = planner.get_object("ST-a").unwrap().prerequisites;
        let b = planner.get_object("ST-b").unwrap().prerequisites;
        assert_eq!(a.len() + b.len(), 1);
    }
}

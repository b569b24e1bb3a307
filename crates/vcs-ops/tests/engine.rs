//! Engine behavior across selection, traversal, sessions, locking and result
//! aggregation, driven against the memory repository.

mod common;

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::{path, TestWorld};
use vcs_ops::backend::memory::Fault;
use vcs_ops::operation::{commit, diff, update, CommitOptions, DiffOptions, Operation, UpdateOptions};
use vcs_ops::{
    CancelFlag, CommandKind, Depth, DiffFormat, LockScope, LockTable, Outcome, Progress, RuleCalculator,
    SchedulingRule, ScopeBuilder, SyncState, TraversalMapper, VcsError, Workspace,
};

fn message(text: &str) -> CommitOptions {
    CommitOptions {
        message: Some(text.to_string()),
        force: false,
    }
}

#[test]
fn test_shallow_folder_and_nested_file_share_one_pass() {
    let world = TestWorld::new();
    world.checked_in(
        "P",
        &[("src/a.txt", "a\n"), ("src/pkg/File.java", "class File {}\n")],
    );
    world.edit("P/src/a.txt", "a2\n");
    world.edit("P/src/pkg/File.java", "class File { int x; }\n");

    let mappings = world.select(&[("P/src", Depth::One), ("P/src/pkg/File.java", Depth::Zero)]);
    let mut op = commit(world.context(), mappings, message("both"));
    op.execute(&mut Progress::none()).expect("commit");

    let invocations = world.repo.invocations();
    assert_eq!(invocations.len(), 1, "expected exactly one pass");
    let invocation = &invocations[0];
    assert_eq!(invocation.kind, CommandKind::Commit);
    assert!(invocation.local.contains("-l"));
    assert_eq!(invocation.arguments, vec!["src", "src/pkg/File.java"]);
    assert!(invocation.for_modification);

    assert_eq!(world.repo.revision("P/src/a.txt").as_deref(), Some("1.2"));
    assert_eq!(world.repo.revision("P/src/pkg/File.java").as_deref(), Some("1.2"));
}

#[test]
fn test_deep_and_shallow_passes_run_in_order() {
    let world = TestWorld::new();
    world.checked_in("P", &[("lib/a.txt", "a\n"), ("doc/b.txt", "b\n")]);
    world.edit("P/lib/a.txt", "a2\n");
    world.edit("P/doc/b.txt", "b2\n");

    let mappings = world.select(&[("P/lib", Depth::Infinite), ("P/doc", Depth::One)]);
    let mut op = commit(world.context(), mappings, message("two passes"));
    op.execute(&mut Progress::none()).expect("commit");

    let invocations = world.repo.invocations();
    assert_eq!(invocations.len(), 2);
    assert!(!invocations[0].local.contains("-l"));
    assert_eq!(invocations[0].arguments, vec!["lib"]);
    assert!(invocations[1].local.contains("-l"));
    assert_eq!(invocations[1].arguments, vec!["doc"]);
    assert_eq!(op.result().attempted(), 2);
}

#[test]
fn test_diff_combines_new_and_changed_files() {
    let world = TestWorld::new();
    world.checked_in("P", &[("changed.txt", "one\ntwo\n")]);
    world.edit("P/changed.txt", "one\nthree\n");
    world
        .workspace
        .add_file("P/fresh.txt", "brand new\n", SyncState::Unmanaged)
        .expect("new file");

    let mut op = diff(world.context(), world.select_projects(&["P"]), DiffOptions::default());
    op.execute(&mut Progress::none()).expect("diff");

    let patch = op.patch();
    assert!(patch.has_new_files());
    assert!(patch.has_contents());
    let entries: Vec<_> = patch.entries().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].path, path("P/changed.txt"));
    assert!(!entries[0].new_file);
    assert!(entries[0].text.starts_with("Index: changed.txt\n"));
    assert!(entries[0].text.contains("-two"));
    assert!(entries[0].text.contains("+three"));
    assert_eq!(entries[1].path, path("P/fresh.txt"));
    assert!(entries[1].new_file);
    assert!(entries[1].text.contains("+brand new"));

    let diffs: Vec<_> = world
        .repo
        .invocations()
        .into_iter()
        .filter(|i| i.kind == CommandKind::Diff)
        .collect();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].arguments, vec!["changed.txt"]);
    assert!(!diffs[0].for_modification);
}

#[test]
fn test_diff_chunks_arguments() {
    let world = TestWorld::new();
    let files: Vec<(String, String)> = (0..5).map(|i| (format!("f{}.txt", i), format!("{}\n", i))).collect();
    let refs: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    world.checked_in("P", &refs);
    for (name, _) in &files {
        world.edit(&format!("P/{}", name), "changed\n");
    }

    let mut context = world.context();
    context.config.max_diff_arguments = 2;
    let options = DiffOptions {
        format: Some(DiffFormat::Context),
        include_new_files: false,
    };
    let mut op = diff(context, world.select_projects(&["P"]), options);
    op.execute(&mut Progress::none()).expect("diff");

    let diffs = world.repo.invocations();
    assert_eq!(diffs.len(), 3);
    assert!(diffs.iter().all(|i| i.local.contains("-c")));
    assert_eq!(op.patch().len(), 5);
    assert_eq!(world.repo.sessions_opened(), 1);
}

#[test]
fn test_server_error_on_one_provider_is_isolated() {
    let world = TestWorld::new();
    for project in ["P1", "P2", "P3"] {
        world.checked_in(project, &[("a.txt", "a\n")]);
        world.edit(&format!("{}/a.txt", project), "b\n");
    }
    world.repo.inject(Fault::ServerError {
        command: CommandKind::Commit,
        project: Some(path("P2")),
    });

    let mut op = commit(world.context(), world.select_projects(&["P1", "P2", "P3"]), message("all"));
    let err = op.execute(&mut Progress::none()).unwrap_err();
    assert!(matches!(err, VcsError::Reportable(status) if status.is_server_error()));

    let result = op.result();
    assert_eq!(result.reportable_errors().len(), 1);
    assert_eq!(result.attempted(), 3);
    assert!(result.provider_status(&path("P1")).expect("P1").is_ok());
    assert!(result.provider_status(&path("P2")).expect("P2").is_server_error());
    assert!(result.provider_status(&path("P3")).expect("P3").is_ok());
    assert_eq!(world.repo.head("P1/a.txt").as_deref(), Some("b\n"));
    assert_eq!(world.repo.head("P2/a.txt").as_deref(), Some("a\n"));
    assert_eq!(world.repo.head("P3/a.txt").as_deref(), Some("b\n"));
}

#[test]
fn test_several_failures_are_summarized() {
    let world = TestWorld::new();
    for project in ["P1", "P2", "P3"] {
        world.checked_in(project, &[("a.txt", "a\n")]);
    }
    world.repo.inject(Fault::RefuseConnection { project: Some(path("P1")) });
    world.repo.inject(Fault::ServerError {
        command: CommandKind::Update,
        project: Some(path("P3")),
    });

    let mut op = update(world.context(), world.select_projects(&["P1", "P2", "P3"]), UpdateOptions::default())
        .expect("update options");
    match op.run_to_outcome(&mut Progress::none()).expect("run") {
        Outcome::PartialFailure { errors, attempted } => {
            assert_eq!(errors.len(), 2);
            assert_eq!(attempted, 3);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    match op.result().check() {
        Err(VcsError::Reportable(status)) => {
            assert!(status.is_multi());
            assert_eq!(status.children().len(), 2);
            assert_eq!(status.message(), "2 of 3 operations failed");
        }
        other => panic!("unexpected check result {:?}", other),
    }
}

#[test]
fn test_sessions_are_closed_after_failures() {
    let world = TestWorld::new();
    for project in ["P1", "P2", "P3"] {
        world.checked_in(project, &[("a.txt", "a\n")]);
        world.edit(&format!("{}/a.txt", project), "b\n");
    }
    world.repo.inject(Fault::ProtocolFailure {
        command: CommandKind::Commit,
        project: Some(path("P1")),
    });
    world.repo.inject(Fault::ServerError {
        command: CommandKind::Commit,
        project: Some(path("P2")),
    });

    let mut op = commit(world.context(), world.select_projects(&["P1", "P2", "P3"]), message("m"));
    assert!(op.execute(&mut Progress::none()).is_err());
    assert_eq!(world.repo.sessions_opened(), 3);
    assert_eq!(world.repo.sessions_closed(), 3);
}

#[test]
fn test_cancellation_stops_and_closes_sessions() {
    let world = TestWorld::new();
    for project in ["P1", "P2"] {
        world.checked_in(project, &[("a.txt", "a\n")]);
        world.edit(&format!("{}/a.txt", project), "b\n");
    }
    let cancel = CancelFlag::new();
    world.repo.inject(Fault::Cancel {
        command: CommandKind::Commit,
        cancel: cancel.clone(),
    });

    let mut op = commit(world.context(), world.select_projects(&["P1", "P2"]), message("m"));
    let outcome = op.run_to_outcome(&mut Progress::new(cancel)).expect("run");
    assert!(matches!(outcome, Outcome::Canceled));
    assert_eq!(world.repo.invocations().len(), 1, "second provider must not run");
    assert_eq!(world.repo.sessions_opened(), world.repo.sessions_closed());
}

#[test]
fn test_canceled_before_start_does_nothing() {
    let world = TestWorld::new();
    world.checked_in("P", &[("a.txt", "a\n")]);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let mut op = commit(world.context(), world.select_projects(&["P"]), message("m"));
    let err = op.execute(&mut Progress::new(cancel)).unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(world.repo.sessions_opened(), 0);
}

#[test]
fn test_rule_covers_only_touched_projects() {
    let world = TestWorld::new();
    for project in ["P1", "P2", "P3"] {
        world.checked_in(project, &[("a.txt", "a\n")]);
    }
    let providers: Vec<_> = ["P3", "P1"]
        .iter()
        .map(|p| world.workspace.provider(&path(p)).expect("shared"))
        .collect();
    let rule = RuleCalculator::rule_for(&providers).expect("rule");
    assert_eq!(
        rule,
        SchedulingRule::Multi(vec![SchedulingRule::Project(path("P1")), SchedulingRule::Project(path("P3"))])
    );
    assert!(!rule.conflicts_with(&SchedulingRule::Project(path("P2"))));
    assert!(rule.conflicts_with(&SchedulingRule::Workspace));

    let mut providers = providers;
    providers.push(Arc::new(world.repo.provider("C").with_lock_scope(LockScope::Workspace)));
    assert_eq!(RuleCalculator::rule_for(&providers), Some(SchedulingRule::Workspace));
}

#[test]
fn test_server_error_in_deep_pass_skips_shallow_pass() {
    let world = TestWorld::new();
    world.checked_in("P", &[("lib/a.txt", "a\n"), ("doc/b.txt", "b\n")]);
    world.edit("P/lib/a.txt", "a2\n");
    world.edit("P/doc/b.txt", "b2\n");
    world.repo.inject(Fault::ServerError {
        command: CommandKind::Commit,
        project: Some(path("P")),
    });

    let mappings = world.select(&[("P/lib", Depth::Infinite), ("P/doc", Depth::One)]);
    let mut op = commit(world.context(), mappings, message("two passes"));
    let err = op.execute(&mut Progress::none()).unwrap_err();
    assert!(matches!(err, VcsError::Reportable(status) if status.is_server_error()));

    let invocations = world.repo.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].arguments, vec!["lib"]);
    assert_eq!(op.result().attempted(), 1);
    assert_eq!(world.repo.sessions_opened(), world.repo.sessions_closed());
    assert_eq!(world.repo.head("P/doc/b.txt").as_deref(), Some("b\n"));
}

#[test]
fn test_operations_on_disjoint_projects_do_not_block() {
    let world = TestWorld::new();
    for project in ["P1", "P2"] {
        world.checked_in(project, &[("a.txt", "a\n")]);
    }
    world.edit("P2/a.txt", "b\n");

    let locks = LockTable::new();
    let held = locks
        .acquire(SchedulingRule::Project(path("P1")), &CancelFlag::new(), Duration::from_millis(10))
        .expect("lock P1");

    let context = world.context().with_locks(locks.clone());
    let mappings = world.select_projects(&["P2"]);
    let (done_tx, done_rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let mut op = commit(context, mappings, message("m"));
        let result = op.execute(&mut Progress::none());
        done_tx.send(()).expect("signal");
        result
    });
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("commit on P2 blocked behind P1");
    worker.join().expect("join").expect("commit");
    drop(held);
    assert!(locks.held().is_empty());
}

#[test]
fn test_conflicting_operation_waits_for_release() {
    let world = TestWorld::new();
    world.checked_in("P", &[("a.txt", "a\n")]);
    world.edit("P/a.txt", "b\n");

    let locks = LockTable::new();
    let held = locks
        .acquire(SchedulingRule::Workspace, &CancelFlag::new(), Duration::from_millis(10))
        .expect("lock workspace");

    let context = world.context().with_locks(locks.clone());
    let mappings = world.select_projects(&["P"]);
    let (done_tx, done_rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let mut op = commit(context, mappings, message("m"));
        let result = op.execute(&mut Progress::none());
        done_tx.send(()).expect("signal");
        result
    });
    assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
    drop(held);
    done_rx.recv_timeout(Duration::from_secs(5)).expect("released");
    worker.join().expect("join").expect("commit");
}

#[test]
fn test_every_selected_file_is_traversed_once() {
    let world = TestWorld::new();
    world.checked_in(
        "P",
        &[
            ("a.txt", "a\n"),
            ("src/b.txt", "b\n"),
            ("src/deep/c.txt", "c\n"),
            ("doc/d.txt", "d\n"),
            ("doc/inner/e.txt", "e\n"),
        ],
    );
    world.checked_in("Q", &[("x.txt", "x\n")]);

    let mappings = world.select(&[
        ("P/src", Depth::Infinite),
        ("P/src/deep/c.txt", Depth::Zero),
        ("P/doc", Depth::One),
        ("P/a.txt", Depth::Zero),
        ("Q", Depth::One),
    ]);
    let scope = ScopeBuilder::new(mappings).build(world.workspace.as_ref());
    let map = TraversalMapper::map(&scope, world.workspace.as_ref());
    assert_eq!(map.len(), 2);

    let p = map.get(&path("P")).expect("P entry");
    let deep = p.deep_resources();
    let shallow = p.shallow_resources();
    let expected = [
        ("P/a.txt", true),
        ("P/src/b.txt", true),
        ("P/src/deep/c.txt", true),
        ("P/doc/d.txt", true),
        ("P/doc/inner/e.txt", false),
    ];
    for (file, selected) in expected {
        let file = path(file);
        let by_deep = deep.iter().filter(|r| r.path.is_prefix_of(&file)).count();
        let by_shallow = shallow
            .iter()
            .filter(|r| r.path == file || (r.kind.is_container() && file.parent().as_ref() == Some(&r.path)))
            .count();
        let passes = usize::from(by_deep > 0) + usize::from(by_shallow > 0);
        assert_eq!(passes, usize::from(selected), "{} covered by {} passes", file, passes);
    }

    let q = map.get(&path("Q")).expect("Q entry");
    assert!(q.deep_resources().is_empty());
    assert_eq!(q.shallow_resources().len(), 1);
}

#[test]
fn test_unshared_resources_are_skipped() {
    let world = TestWorld::new();
    world.checked_in("P", &[("a.txt", "a\n")]);
    world
        .workspace
        .add_file("Local/b.txt", "b\n", SyncState::Unmanaged)
        .expect("unshared project");
    world.edit("P/a.txt", "a2\n");

    let mut op = commit(world.context(), world.select_projects(&["P", "Local"]), message("m"));
    op.execute(&mut Progress::none()).expect("commit");
    assert_eq!(world.repo.invocations().len(), 1);
    assert_eq!(op.result().provider_results().len(), 1);
}

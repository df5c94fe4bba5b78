//! Scope release ordering and cleanup aggregation.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;

use duke_sheets_automation::{Engine, EngineError, ErrorKind};
use pretty_assertions::assert_eq;

use crate::common::{unguarded, FakeBackend, RecordingAffinity};

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn FnOnce() -> duke_sheets_automation::Result<()>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let release = move |label: &str| -> Box<dyn FnOnce() -> duke_sheets_automation::Result<()>> {
        let sink = sink.clone();
        let label = label.to_string();
        Box::new(move || {
            sink.lock().unwrap().push(label);
            Ok(())
        })
    };
    (log, release)
}

#[test]
fn releases_run_in_reverse_order() {
    let engine = Engine::new(Arc::new(FakeBackend::new()), unguarded()).unwrap();
    let (log, release) = recorder();

    let mut scope = engine.enter_scope();
    let first = scope.track_named("workbook", 1, release("workbook"));
    let second = scope.track_named("sheet", 2, release("sheet"));
    let third = scope.track_named("chart", 3, release("chart"));
    assert_eq!((first.position(), second.position(), third.position()), (0, 1, 2));
    assert_eq!(*third, 3);
    assert_eq!(engine.session().live_handles(), 3);

    let report = scope.exit().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.released, 3);
    assert_eq!(*log.lock().unwrap(), vec!["chart", "sheet", "workbook"]);
    assert_eq!(engine.session().live_handles(), 0);
}

#[test]
fn workbooks_and_objects_release_children_first() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();

    let mut scope = engine.enter_scope();
    let book1 = engine.create_workbook(&mut scope).unwrap();
    let book2 = engine.create_workbook(&mut scope).unwrap();
    scope.exit().unwrap();

    let releases: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("release"))
        .collect();
    assert_eq!(releases, vec!["release Book2", "release Book1"]);
    assert!(!book1.is_live());
    assert!(!book2.is_live());
}

#[test]
fn failing_release_does_not_stop_the_rest() {
    let backend = Arc::new(FakeBackend::new().fail_release("Book2"));
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();

    let mut scope = engine.enter_scope();
    engine.create_workbook(&mut scope).unwrap();
    engine.create_workbook(&mut scope).unwrap();
    engine.create_workbook(&mut scope).unwrap();
    let report = scope.exit().unwrap();

    assert_eq!(backend.count("release"), 3);
    assert_eq!(report.released, 2);
    let warning = report.warning.expect("one release failed");
    assert_eq!(warning.failures.len(), 1);
    assert!(warning.failures[0].label.contains("Book2"));
    assert!(warning.to_string().starts_with("1 cleanup step(s) failed"));
}

#[test]
fn panicking_release_is_contained() {
    let backend = Arc::new(FakeBackend::new().panic_on_release("Book1"));
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();

    let mut scope = engine.enter_scope();
    engine.create_workbook(&mut scope).unwrap();
    engine.create_workbook(&mut scope).unwrap();
    let report = scope.exit().unwrap();

    assert_eq!(report.released, 1);
    let failures = report.warning.unwrap().failures;
    assert!(failures[0].error.contains("release panicked"));
    assert_eq!(engine.session().live_handles(), 0);
}

#[test]
fn strict_mode_returns_the_warning() {
    let backend = Arc::new(FakeBackend::new().fail_release("Book1"));
    let engine = Engine::new(backend.clone(), unguarded().strict(true)).unwrap();

    let mut scope = engine.enter_scope();
    engine.create_workbook(&mut scope).unwrap();
    let err = scope.exit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CleanupWarning);
    assert!(matches!(err, EngineError::CleanupWarning(ref w) if w.failures.len() == 1));
    // Reclamation still ran
    assert_eq!(backend.count("reclaim"), 2);
}

#[test]
fn reclamation_passes_follow_releases() {
    let backend = Arc::new(FakeBackend::new());
    let mut config = unguarded();
    config.lifecycle.reclaim_passes = 3;
    let engine = Engine::new(backend.clone(), config).unwrap();

    let mut scope = engine.enter_scope();
    engine.create_workbook(&mut scope).unwrap();
    let report = scope.exit().unwrap();

    assert_eq!(report.reclaim_passes, 3);
    let calls = backend.calls();
    let tail: Vec<_> = calls[calls.len() - 4..].to_vec();
    assert_eq!(tail, vec!["release Book1", "reclaim", "reclaim", "reclaim"]);
}

#[test]
fn dropped_scope_still_releases() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    {
        let mut scope = engine.enter_scope();
        engine.create_workbook(&mut scope).unwrap();
    }
    assert_eq!(backend.count("release Book1"), 1);
    assert_eq!(engine.session().live_handles(), 0);
}

#[test]
fn thread_teardown_runs_once_for_the_outermost_scope() {
    let affinity = Arc::new(RecordingAffinity::default());
    let backend = Arc::new(FakeBackend::new().with_affinity(affinity.clone()));
    let engine = Engine::new(backend, unguarded()).unwrap();

    let mut outer = engine.enter_scope();
    engine.create_workbook(&mut outer).unwrap();
    {
        let mut inner = engine.enter_scope();
        engine.create_workbook(&mut inner).unwrap();
        let report = inner.exit().unwrap();
        assert!(!report.thread_teardown);
    }
    assert_eq!(affinity.detaches.load(Ordering::SeqCst), 0);

    let report = outer.exit().unwrap();
    assert!(report.thread_teardown);
    assert_eq!(affinity.detaches_on(thread::current().id()), 1);
}

#[test]
fn scope_that_never_touched_the_host_reports_no_thread_teardown() {
    let affinity = Arc::new(RecordingAffinity::default());
    let backend = Arc::new(FakeBackend::new().with_affinity(affinity.clone()));
    let engine = Engine::new(backend, unguarded()).unwrap();

    let scope = engine.enter_scope();
    let report = scope.exit().unwrap();

    assert!(!report.thread_teardown);
    assert!(!affinity.is_attached_here());
}

#[test]
fn shutdown_runs_attached_after_the_outermost_scope_detached() {
    let affinity = Arc::new(RecordingAffinity::default());
    let backend = Arc::new(FakeBackend::new().with_affinity(affinity.clone()));
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();

    let mut scope = engine.enter_scope();
    engine.create_workbook(&mut scope).unwrap();
    let report = scope.exit().unwrap();
    assert!(report.thread_teardown);
    assert!(!affinity.is_attached_here());

    engine.teardown().unwrap();

    assert_eq!(backend.count("shutdown (attached)"), 1);
    assert_eq!(affinity.attaches.load(Ordering::SeqCst), 1);
    assert!(!affinity.is_attached_here());
}

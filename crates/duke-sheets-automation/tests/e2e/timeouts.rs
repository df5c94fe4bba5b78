//! Deadlines, post-timeout verification and the alternate chart path.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use duke_sheets_automation::{
    ChartKind, Engine, EngineConfig, EngineError, ErrorKind, Fallback, ObjectKind, PlacementPolicy,
    TimeoutGuard, TimeoutPolicy,
};
use pretty_assertions::assert_eq;

use crate::common::{FakeBackend, RecordingAffinity};

const DEADLINE_MS: u64 = 50;
const HANG: Duration = Duration::from_secs(3);

fn config(operation: &str, fallback: Fallback) -> EngineConfig {
    EngineConfig::default().with_timeouts(TimeoutPolicy::empty().with(operation, DEADLINE_MS, fallback))
}

fn policy() -> PlacementPolicy {
    PlacementPolicy::sized(300.0, 200.0)
}

#[test]
fn wait_is_bounded_by_the_deadline() {
    let guard = TimeoutGuard::new();
    let deadline = Duration::from_millis(DEADLINE_MS);
    let started = Instant::now();
    let err = guard
        .run_with_deadline::<(), _>("add_chart", deadline, || {
            std::thread::sleep(HANG);
            Ok(())
        })
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= deadline);
    assert!(
        elapsed < deadline + Duration::from_millis(50),
        "waited {elapsed:?}"
    );
}

#[test]
fn fail_policy_surfaces_the_timeout() {
    let backend = Arc::new(FakeBackend::new().stall("add_chart:Primary", HANG, false));
    let engine = Engine::new(backend.clone(), config("add_chart", Fallback::Fail)).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let started = Instant::now();
    let err = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &policy())
        .unwrap_err();
    assert!(started.elapsed() < HANG);

    assert!(matches!(
        err,
        EngineError::TimedOut { rechecked: false, .. }
    ));
    // Only the placement query ran; no verification, no alternate
    assert_eq!(backend.count("list_objects"), 1);
    assert_eq!(backend.count("add_chart:Alternate"), 0);
    assert_eq!(engine.session().objects().len(), 0);
}

#[test]
fn late_completion_is_found_by_verification() {
    let backend = Arc::new(FakeBackend::new().stall("add_chart:Primary", HANG, true));
    let engine = Engine::new(
        backend.clone(),
        config("add_chart", Fallback::FallBackToAlternateOperation),
    )
    .unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let chart = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &policy())
        .unwrap();

    assert_eq!(chart.name, "Chart 1");
    assert_eq!(chart.kind, ObjectKind::Chart);
    assert_eq!((chart.bounds.left, chart.bounds.top), (0.0, 0.0));
    assert_eq!(backend.count("add_chart:Alternate"), 0);
    // placement query + verification
    assert_eq!(backend.count("list_objects"), 2);
    assert!(engine.session().objects().contains(chart.id));
}

#[test]
fn alternate_operation_runs_when_nothing_was_created() {
    let backend = Arc::new(FakeBackend::new().stall("add_chart:Primary", HANG, false));
    let engine = Engine::new(
        backend.clone(),
        config("add_chart", Fallback::FallBackToAlternateOperation),
    )
    .unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let chart = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Pie, &policy())
        .unwrap();

    assert_eq!(chart.name, "Chart 1");
    assert_eq!(backend.count("add_chart:Alternate Chart 1"), 1);
    assert!(!wb.is_saved());
}

#[test]
fn both_paths_hanging_reports_a_rechecked_timeout() {
    let backend = Arc::new(
        FakeBackend::new()
            .stall("add_chart:Primary", HANG, false)
            .stall("add_chart:Alternate", HANG, false),
    );
    let engine = Engine::new(
        backend.clone(),
        config("add_chart", Fallback::FallBackToAlternateOperation),
    )
    .unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let err = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &policy())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(matches!(err, EngineError::TimedOut { rechecked: true, .. }));
    // placement, after timeout, after alternate
    assert_eq!(backend.count("list_objects"), 3);
}

#[test]
fn pivot_link_without_alternate_rechecks_then_fails() {
    let backend = Arc::new(FakeBackend::new().stall("link_pivot_chart", HANG, false));
    let engine = Engine::new(
        backend.clone(),
        config("link_pivot_chart", Fallback::FallBackToAlternateOperation),
    )
    .unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let err = engine
        .link_pivot_chart(&wb, "Report", "Chart 1", "Sales")
        .unwrap_err();
    assert!(matches!(err, EngineError::TimedOut { rechecked: true, .. }));
    assert_eq!(backend.count("pivot_chart_source Chart 1"), 1);
}

#[test]
fn pivot_link_that_landed_late_is_success() {
    let backend = Arc::new(FakeBackend::new().stall("link_pivot_chart", HANG, true));
    let engine = Engine::new(
        backend.clone(),
        config("link_pivot_chart", Fallback::FallBackToAlternateOperation),
    )
    .unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    engine
        .link_pivot_chart(&wb, "Report", "Chart 1", "Sales")
        .unwrap();
}

#[test]
fn workers_attach_and_detach_their_own_threads() {
    let affinity = Arc::new(RecordingAffinity::default());
    let backend = Arc::new(FakeBackend::new().with_affinity(affinity.clone()));
    let engine = Engine::new(backend, config("add_chart", Fallback::Fail)).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Area, &policy())
        .unwrap();

    assert_eq!(affinity.attaches.load(Ordering::SeqCst), 1);
    assert_eq!(affinity.detaches.load(Ordering::SeqCst), 1);
    assert_eq!(affinity.detaches_on(std::thread::current().id()), 0);
}

//! The AppleScript backend driven through the engine with canned output.

use std::sync::Arc;

use duke_sheets_automation::{
    ChartKind, Engine, ErrorKind, MacBackend, MacConfig, ObjectKind, PlacementPolicy, Platform,
};
use pretty_assertions::assert_eq;

use crate::common::{unguarded, CannedRunner};

fn engine(runner: CannedRunner) -> (Engine, Arc<CannedRunner>) {
    let runner = Arc::new(runner);
    let backend = MacBackend::with_runner(&MacConfig::default(), runner.clone());
    (Engine::new(Arc::new(backend), unguarded()).unwrap(), runner)
}

#[test]
fn chart_is_named_and_placed_from_the_listing() {
    let (engine, runner) = engine(
        CannedRunner::default()
            .reply("\"Book1\"")
            .reply("{}")
            .reply("{0, 0, 360, 216}"),
    );
    assert_eq!(engine.platform(), Platform::MacOs);
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    assert_eq!(wb.name(), "Book1");

    let chart = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &PlacementPolicy::default())
        .unwrap();

    assert_eq!(chart.name, "Chart 1");
    assert_eq!(chart.kind, ObjectKind::Chart);
    assert_eq!((chart.bounds.width, chart.bounds.height), (360.0, 216.0));

    let scripts = runner.scripts();
    assert_eq!(scripts.len(), 3);
    let insert = &scripts[2];
    assert!(insert.contains("tell application \"Microsoft Excel\""));
    assert!(insert.contains("set name of co to \"Chart 1\""));
    assert!(insert.contains("set chart type of ch to line chart"));
    assert!(insert.contains("worksheet \"Data\" of workbook \"Book1\""));
}

#[test]
fn windows_only_operations_fail_without_running_scripts() {
    let (engine, runner) = engine(CannedRunner::default().reply("\"Book1\""));
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let err = engine
        .add_slicer(&mut scope, &wb, "Report", "Sales", "Region", &PlacementPolicy::default())
        .unwrap_err();
    assert_eq!(err.to_string(), "add_slicer is not available on macOS");

    let err = engine
        .link_pivot_chart(&wb, "Report", "Chart 1", "Sales")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);

    assert_eq!(runner.scripts().len(), 1);
}

#[test]
fn script_errors_are_normalized() {
    let (engine, _) = engine(
        CannedRunner::default()
            .reply("\"Book1\"")
            .fail(-600, "Application isn’t running."),
    );
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let err = engine.recalculate(&wb).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AutomationUnavailable);
}

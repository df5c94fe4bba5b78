//! Chart and slicer placement through the engine.

use std::sync::Arc;

use duke_sheets_automation::{
    Aggregation, Anchor, ChartKind, Engine, ErrorKind, ObjectKind, PivotSpec, PlacementPolicy,
    Position, SheetExtents, ValueField,
};
use pretty_assertions::assert_eq;

use crate::common::{chart_box, unguarded, FakeBackend};

fn policy() -> PlacementPolicy {
    PlacementPolicy::sized(300.0, 200.0)
}

#[test]
fn new_chart_goes_right_of_the_last_one() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    backend.seed(&wb, "Data", chart_box("Chart 1", 0.0, 0.0, 300.0, 200.0));

    let chart = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::ColumnClustered, &policy())
        .unwrap();

    assert_eq!(chart.name, "Chart 2");
    assert_eq!(chart.bounds, chart_box("Chart 2", 310.0, 0.0, 300.0, 200.0));
}

#[test]
fn full_row_wraps_below() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    backend.seed(&wb, "Data", chart_box("Chart 1", 0.0, 0.0, 300.0, 200.0));
    backend.seed(&wb, "Data", chart_box("Chart 2", 310.0, 0.0, 300.0, 200.0));

    let chart = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &policy())
        .unwrap();

    assert_eq!(chart.name, "Chart 3");
    assert_eq!(chart.bounds.position(), Position::new(0.0, 210.0));
}

#[test]
fn successive_inserts_never_overlap() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let charts: Vec<_> = (0..5)
        .map(|_| {
            engine
                .add_chart(&mut scope, &wb, 0u32, "A1:B5", ChartKind::Pie, &policy())
                .unwrap()
        })
        .collect();

    for (i, a) in charts.iter().enumerate() {
        for b in &charts[i + 1..] {
            assert!(!a.bounds.overlaps(&b.bounds), "{a} overlaps {b}");
        }
    }
    let names: Vec<_> = charts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Chart 1", "Chart 2", "Chart 3", "Chart 4", "Chart 5"]);
}

#[test]
fn explicit_anchor_is_tried_first() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let chart = engine
        .add_chart(
            &mut scope,
            &wb,
            "Data",
            "A1:B5",
            ChartKind::Line,
            &policy().with_anchor(Anchor::At(Position::new(100.0, 400.0))),
        )
        .unwrap();
    assert_eq!(chart.bounds.position(), Position::new(100.0, 400.0));
}

#[test]
fn default_size_comes_from_config() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let chart = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &PlacementPolicy::default())
        .unwrap();
    assert_eq!((chart.bounds.width, chart.bounds.height), (360.0, 216.0));
}

#[test]
fn exhausted_sheet_reports_no_space() {
    let backend = Arc::new(FakeBackend::new());
    let mut config = unguarded();
    config.placement.extents = SheetExtents::new(400.0, 250.0);
    let engine = Engine::new(backend.clone(), config).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    backend.seed(&wb, "Data", chart_box("Chart 1", 0.0, 0.0, 300.0, 200.0));

    let err = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &policy())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSpaceFound);
    assert_eq!(backend.count("add_chart"), 0);
}

#[test]
fn slicer_is_placed_beside_the_pivot_table() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let spec = PivotSpec {
        name: "Sales".into(),
        source_sheet: "Data".into(),
        source_range: "A1:C20".into(),
        destination_sheet: "Report".into(),
        destination: Some("A1".into()),
        rows: vec!["Region".into()],
        columns: vec![],
        filters: vec![],
        values: vec![ValueField::new("Amount", Aggregation::Sum)],
    };
    let pivot = engine.add_pivot_table(&mut scope, &wb, &spec).unwrap();
    assert_eq!(pivot.kind, ObjectKind::Pivot);
    assert_eq!(pivot.bounds.position(), Position::new(0.0, 0.0));

    let slicer = engine
        .add_slicer(&mut scope, &wb, "Report", "Sales", "Region", &PlacementPolicy::default())
        .unwrap();
    assert_eq!(slicer.name, "Region");
    assert_eq!(slicer.bounds.position(), Position::new(202.0, 0.0));
    assert!(!slicer.bounds.overlaps(&pivot.bounds));

    let second = engine
        .add_slicer(&mut scope, &wb, "Report", "Sales", "Region", &PlacementPolicy::default())
        .unwrap();
    assert_eq!(second.name, "Region 1");
}

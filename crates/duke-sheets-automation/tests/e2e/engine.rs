//! Workbook, cell and object operations through the engine.

use std::sync::Arc;

use duke_sheets_automation::{
    Aggregation, BoundingBox, CellValue, ChartKind, Engine, EngineError, ErrorKind, ObjectKind,
    PivotSpec, PlacementPolicy, SessionState, ValueField,
};
use pretty_assertions::assert_eq;

use crate::common::{unguarded, FakeBackend};

fn sales_pivot() -> PivotSpec {
    PivotSpec {
        name: "Sales".into(),
        source_sheet: "Data".into(),
        source_range: "A1:C20".into(),
        destination_sheet: "Report".into(),
        destination: Some("C3".into()),
        rows: vec!["Region".into()],
        columns: vec!["Quarter".into()],
        filters: vec![],
        values: vec![ValueField::new("Amount", Aggregation::Sum)],
    }
}

#[test]
fn written_cells_read_back() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    engine
        .write_range(&wb, "Data", "B2", &[vec![1.5.into(), "north".into(), true.into()]])
        .unwrap();
    let range = engine.read_range(&wb, "Data", "b2:d2").unwrap();

    assert_eq!(range.address, "B2:D2");
    assert_eq!(
        range.values,
        vec![vec![
            CellValue::Number(1.5),
            CellValue::from("north"),
            CellValue::Bool(true)
        ]]
    );
    assert_eq!(engine.list_sheets(&wb).unwrap(), vec!["Sheet1", "Data"]);
}

#[test]
fn closed_workbook_handle_is_rejected() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    engine.close(&wb, false).unwrap();
    assert!(!wb.is_live());

    let err = engine.read_range(&wb, "Data", "A1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandleInvalidated);
    assert!(matches!(
        err,
        EngineError::HandleInvalidated { ref operation, handle } if operation == "read_range" && handle == wb.id()
    ));
    assert_eq!(backend.count("read_range"), 0);

    let err = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &PlacementPolicy::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandleInvalidated);
}

#[test]
fn handles_die_with_their_scope() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();

    let wb = {
        let mut scope = engine.enter_scope();
        let wb = engine.create_workbook(&mut scope).unwrap();
        assert_eq!(engine.session().live_handles(), 1);
        scope.exit().unwrap();
        wb
    };

    assert_eq!(engine.session().live_handles(), 0);
    let err = engine.list_objects(&wb, "Data").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandleInvalidated);
}

#[test]
fn nothing_runs_after_teardown() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();

    engine.teardown().unwrap();
    assert_eq!(engine.session().state(), SessionState::TornDown);

    let mut scope = engine.enter_scope();
    let err = engine.create_workbook(&mut scope).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Session);
    assert!(matches!(err, EngineError::SessionTornDown { .. }));

    // Teardown is idempotent
    engine.teardown().unwrap();
    assert_eq!(backend.count("shutdown"), 1);
    assert_eq!(backend.count("create_workbook"), 0);
}

#[test]
fn dropping_the_engine_tears_it_down() {
    let backend = Arc::new(FakeBackend::new());
    {
        let engine = Engine::new(backend.clone(), unguarded()).unwrap();
        let mut scope = engine.enter_scope();
        engine.create_workbook(&mut scope).unwrap();
    }
    assert_eq!(backend.count("shutdown"), 1);
    // The scope released its workbook before the session went away
    let calls = backend.calls();
    assert_eq!(calls.last().map(String::as_str), Some("shutdown"));
    assert!(calls.contains(&"release Book1".to_string()));
}

#[test]
fn pivot_table_lands_at_its_destination() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let pivot = engine.add_pivot_table(&mut scope, &wb, &sales_pivot()).unwrap();

    assert_eq!(pivot.name, "Sales");
    assert_eq!(pivot.kind, ObjectKind::Pivot);
    assert_eq!(pivot.workbook, wb.id());
    assert_eq!((pivot.bounds.left, pivot.bounds.top), (96.0, 30.0));
    assert_eq!(backend.count("add_pivot_table Sales at C3"), 1);
    assert_eq!(backend.count("list_objects"), 1);
    assert!(engine.session().objects().contains(pivot.id));
}

#[test]
fn pivot_destination_over_a_chart_is_refused() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    backend.seed(
        &wb,
        "Report",
        BoundingBox::new("Chart 1", ObjectKind::Chart, 0.0, 0.0, 300.0, 200.0),
    );

    let spec = PivotSpec {
        destination: Some("B2".into()),
        ..sales_pivot()
    };
    let err = engine.add_pivot_table(&mut scope, &wb, &spec).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(err.to_string().contains("'Sales' would overlap 'Chart 1'"));
    assert_eq!(backend.count("add_pivot_table"), 0);
}

#[test]
fn pivot_without_destination_goes_beside_existing_objects() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    let chart = BoundingBox::new("Chart 1", ObjectKind::Chart, 0.0, 0.0, 300.0, 200.0);
    backend.seed(&wb, "Report", chart.clone());

    let spec = PivotSpec {
        destination: None,
        ..sales_pivot()
    };
    let pivot = engine.add_pivot_table(&mut scope, &wb, &spec).unwrap();

    // Right of the chart plus spacing (310pt), snapped forward to column H
    assert_eq!(backend.count("add_pivot_table Sales at H1"), 1);
    assert_eq!((pivot.bounds.left, pivot.bounds.top), (336.0, 0.0));
    assert!(!pivot.bounds.overlaps(&chart));
}

#[test]
fn invalid_pivot_spec_is_rejected_before_the_host_sees_it() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();

    let spec = PivotSpec {
        destination: Some("not a cell".into()),
        ..sales_pivot()
    };
    let err = engine.add_pivot_table(&mut scope, &wb, &spec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(backend.count("add_pivot_table"), 0);
}

#[test]
fn delete_object_forgets_the_handle() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    let other = engine.create_workbook(&mut scope).unwrap();

    let chart = engine
        .add_chart(&mut scope, &wb, "Data", "A1:B5", ChartKind::Line, &PlacementPolicy::default())
        .unwrap();
    assert_eq!(engine.list_objects(&wb, "Data").unwrap().len(), 1);

    let err = engine.delete_object(&other, &chart).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    engine.delete_object(&wb, &chart).unwrap();
    assert_eq!(backend.count("delete_object chart Chart 1"), 1);
    assert!(!engine.session().objects().contains(chart.id));
    assert!(engine.list_objects(&wb, "Data").unwrap().is_empty());
    assert!(engine.verify_object(&wb, "Data", "Chart 1").unwrap().is_none());
}

#[test]
fn deleting_a_pivot_tells_the_host_what_it_is() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    let pivot = engine.add_pivot_table(&mut scope, &wb, &sales_pivot()).unwrap();

    engine.delete_object(&wb, &pivot).unwrap();

    assert_eq!(backend.count("delete_object pivot Sales"), 1);
    assert!(engine.list_objects(&wb, "Report").unwrap().is_empty());
}

#[test]
fn pivot_chart_link_is_recorded() {
    let backend = Arc::new(FakeBackend::new());
    let engine = Engine::new(backend.clone(), unguarded()).unwrap();
    let mut scope = engine.enter_scope();
    let wb = engine.create_workbook(&mut scope).unwrap();
    wb.mark_saved(true);

    engine.link_pivot_chart(&wb, "Report", "Chart 1", "Sales").unwrap();

    assert_eq!(backend.count("link_pivot_chart Chart 1 -> Sales"), 1);
    assert_eq!(backend.count("pivot_chart_source"), 0);
    assert!(!wb.is_saved());
}

//! AppleScript program builders.
//!
//! Every builder returns a complete `tell application ... end tell` program.
//! User-supplied text only ever enters a script through [`quote`].

use std::fmt::Write as _;

use duke_sheets_layout::{BoundingBox, ObjectKind};

use crate::model::{
    CellError, CellValue, ChartRequest, FileFormat, InsertMethod, PivotSpec, SheetRef,
};

/// Quote `s` as an AppleScript string literal
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn number(n: f64) -> String {
    if n.is_finite() {
        format!("{n}")
    } else {
        "0".to_string()
    }
}

fn cell_literal(value: &CellValue) -> String {
    match value {
        CellValue::Empty => "\"\"".to_string(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Number(n) => number(*n),
        // Excel turns a typed error code into the error value
        CellValue::Text(s) | CellValue::Error(CellError { code: s }) => quote(s),
    }
}

fn matrix_literal<T>(rows: &[Vec<T>], cell: impl Fn(&T) -> String) -> String {
    let rows: Vec<String> = rows
        .iter()
        .map(|r| format!("{{{}}}", r.iter().map(&cell).collect::<Vec<_>>().join(", ")))
        .collect();
    format!("{{{}}}", rows.join(", "))
}

fn workbook(name: &str) -> String {
    format!("workbook {}", quote(name))
}

/// `worksheet "Data" of workbook "Book1"` (indices are 0-based on our side)
pub fn sheet(workbook_name: &str, sheet: &SheetRef) -> String {
    match sheet {
        SheetRef::Index(i) => format!("worksheet {} of {}", i + 1, workbook(workbook_name)),
        SheetRef::Name(n) => format!("worksheet {} of {}", quote(n), workbook(workbook_name)),
    }
}

/// Builds scripts addressed to one application
#[derive(Debug, Clone)]
pub struct Scripts {
    application: String,
}

impl Scripts {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
        }
    }

    fn tell(&self, body: &str) -> String {
        let mut script = format!("tell application {}\n", quote(&self.application));
        for line in body.lines() {
            let _ = writeln!(script, "\t{line}");
        }
        script.push_str("end tell");
        script
    }

    pub fn create_workbook(&self) -> String {
        self.tell("set wb to make new workbook\nreturn name of wb")
    }

    pub fn open(&self, posix_path: &str) -> String {
        self.tell(&format!(
            "open (POSIX file {})\nreturn name of active workbook",
            quote(posix_path)
        ))
    }

    pub fn close(&self, workbook_name: &str, save: bool) -> String {
        let saving = if save { "yes" } else { "no" };
        self.tell(&format!("close {} saving {saving}", workbook(workbook_name)))
    }

    pub fn save(&self, workbook_name: &str, posix_path: Option<&str>) -> String {
        match posix_path {
            Some(path) => self.tell(&format!(
                "save workbook as {} filename {} file format {}",
                workbook(workbook_name),
                quote(path),
                FileFormat::from_path(path).applescript_name()
            )),
            None => self.tell(&format!("save {}", workbook(workbook_name))),
        }
    }

    pub fn recalculate(&self) -> String {
        self.tell("calculate")
    }

    pub fn list_sheets(&self, workbook_name: &str) -> String {
        self.tell(&format!(
            "return name of every worksheet of {}",
            workbook(workbook_name)
        ))
    }

    /// `value2` reports dates as serial numbers instead of `date` objects
    pub fn read_range(&self, sheet_ref: &str, address: &str) -> String {
        self.tell(&format!(
            "set r to range {} of {sheet_ref}\nreturn {{value2 of r, formula of r}}",
            quote(address)
        ))
    }

    pub fn write_range(&self, sheet_ref: &str, address: &str, values: &[Vec<CellValue>]) -> String {
        self.tell(&format!(
            "set value of range {} of {sheet_ref} to {}",
            quote(address),
            matrix_literal(values, cell_literal)
        ))
    }

    pub fn write_formulas(&self, sheet_ref: &str, address: &str, formulas: &[Vec<String>]) -> String {
        self.tell(&format!(
            "set formula of range {} of {sheet_ref} to {}",
            quote(address),
            matrix_literal(formulas, |f| quote(f))
        ))
    }

    pub fn add_chart(
        &self,
        sheet_ref: &str,
        request: &ChartRequest,
        bounds: &BoundingBox,
        method: InsertMethod,
    ) -> String {
        let geometry = format!(
            "left position:{}, top:{}, width:{}, height:{}",
            number(bounds.left),
            number(bounds.top),
            number(bounds.width),
            number(bounds.height)
        );
        let mut body = match method {
            InsertMethod::Primary => format!(
                "set co to make new chart object at {sheet_ref} with properties {{{geometry}}}\n"
            ),
            InsertMethod::Alternate => format!(
                "set co to make new chart object at {sheet_ref}\n\
                 set properties of co to {{{geometry}}}\n"
            ),
        };
        let _ = writeln!(body, "set name of co to {}", quote(&request.name));
        body.push_str("set ch to chart of co\n");
        let _ = writeln!(
            body,
            "set chart type of ch to {}",
            request.kind.applescript_name()
        );
        let _ = writeln!(
            body,
            "set source data ch source range (range {} of {sheet_ref})",
            quote(&request.data_range)
        );
        if let Some(title) = &request.title {
            body.push_str("set has title of ch to true\n");
            let _ = writeln!(body, "set caption of chart title of ch to {}", quote(title));
        }
        body.push_str("return {left position of co, top of co, width of co, height of co}");
        self.tell(&body)
    }

    /// Every object on the sheet as `{kind, name, left, top, width, height}`
    pub fn list_objects(&self, sheet_ref: &str) -> String {
        self.tell(&format!(
            "set ws to {sheet_ref}\n\
             set out to {{}}\n\
             repeat with co in (every chart object of ws)\n\
             \tset end of out to {{\"chart\", name of co, left position of co, top of co, width of co, height of co}}\n\
             end repeat\n\
             repeat with pt in (every pivot table of ws)\n\
             \tset r to table range2 of pt\n\
             \tset end of out to {{\"pivot\", name of pt, left position of r, top of r, width of r, height of r}}\n\
             end repeat\n\
             repeat with lo in (every list object of ws)\n\
             \tset r to range object of lo\n\
             \tset end of out to {{\"table\", name of lo, left position of r, top of r, width of r, height of r}}\n\
             end repeat\n\
             return out"
        ))
    }

    pub fn delete_object(&self, sheet_ref: &str, name: &str, kind: ObjectKind) -> String {
        let name = quote(name);
        self.tell(&match kind {
            ObjectKind::Chart => format!("delete chart object {name} of {sheet_ref}"),
            ObjectKind::Pivot => {
                format!("clear range (table range2 of pivot table {name} of {sheet_ref})")
            }
            ObjectKind::Table => format!("delete list object {name} of {sheet_ref}"),
            ObjectKind::Shape => format!("delete shape {name} of {sheet_ref}"),
        })
    }

    pub fn add_pivot_table(
        &self,
        workbook_name: &str,
        source_ref: &str,
        destination_ref: &str,
        destination: &str,
        spec: &PivotSpec,
    ) -> String {
        let mut body = format!(
            "set pc to make new pivot cache at {} with properties \
             {{source type:database, source data:range {} of {source_ref}}}\n",
            workbook(workbook_name),
            quote(&spec.source_range)
        );
        let _ = writeln!(
            body,
            "set pt to create pivot table pc table destination range {} of {destination_ref} table name {}",
            quote(destination),
            quote(&spec.name)
        );
        for (fields, orientation) in [
            (&spec.rows, "orient as row field"),
            (&spec.columns, "orient as column field"),
            (&spec.filters, "orient as page field"),
        ] {
            for field in fields {
                let _ = writeln!(
                    body,
                    "set orientation of pivot field {} of pt to {orientation}",
                    quote(field)
                );
            }
        }
        for value in &spec.values {
            let _ = writeln!(
                body,
                "add data field pt field pivot field {} of pt caption {} function {}",
                quote(&value.field),
                quote(&value.display_caption()),
                value.aggregation.applescript_name()
            );
        }
        body.push_str(
            "set r to table range2 of pt\nreturn {left position of r, top of r, width of r, height of r}",
        );
        self.tell(&body)
    }
}

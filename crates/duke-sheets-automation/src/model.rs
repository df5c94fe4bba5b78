//! Value types exchanged with the backends.
//!
//! These are plain data: no ownership of native objects, freely cloned, and
//! serializable so the command layer can render them.

use std::fmt;
use std::str::FromStr;

use duke_sheets_layout::{Anchor, Size};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Reference to a worksheet, by 0-based index or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetRef {
    Index(u32),
    Name(String),
}

impl From<&str> for SheetRef {
    fn from(s: &str) -> Self {
        SheetRef::Name(s.to_string())
    }
}

impl From<String> for SheetRef {
    fn from(s: String) -> Self {
        SheetRef::Name(s)
    }
}

impl From<u32> for SheetRef {
    fn from(index: u32) -> Self {
        SheetRef::Index(index)
    }
}

impl From<&SheetRef> for SheetRef {
    fn from(sheet: &SheetRef) -> Self {
        sheet.clone()
    }
}

impl fmt::Display for SheetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetRef::Index(i) => write!(f, "sheet #{i}"),
            SheetRef::Name(name) => f.write_str(name),
        }
    }
}

/// Excel error value (e.g. `#DIV/0!`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellError {
    pub code: String,
}

/// `xlErr` numbers and the codes Excel displays for them
const XL_ERRORS: [(i32, &str); 7] = [
    (2000, "#NULL!"),
    (2007, "#DIV/0!"),
    (2015, "#VALUE!"),
    (2023, "#REF!"),
    (2029, "#NAME?"),
    (2036, "#NUM!"),
    (2042, "#N/A"),
];

/// Facility bits of a `CVErr` value (0x800A0000 | xlErr)
const CVERR_FACILITY: u32 = 0x800A_0000;

impl CellError {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// Decode a `CVErr` value. Both automation surfaces hand error cells
    /// back this way: COM as a `VT_ERROR` scode, AppleScript as a number.
    pub fn from_cverr(scode: i32) -> Option<Self> {
        let bits = scode as u32;
        if bits & 0xFFFF_0000 != CVERR_FACILITY {
            return None;
        }
        let number = (bits & 0xFFFF) as i32;
        XL_ERRORS
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, code)| Self::new(*code))
    }

    /// The `CVErr` value for this code, if it is one Excel knows
    pub fn to_cverr(&self) -> Option<i32> {
        XL_ERRORS
            .iter()
            .find(|(_, code)| *code == self.code)
            .map(|(n, _)| (CVERR_FACILITY | *n as u32) as i32)
    }
}

/// A single cell value as both backends marshal it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    Error(CellError),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(CellValue::Empty, Into::into)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => write!(f, "<empty>"),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Error(e) => write!(f, "{}", e.code),
        }
    }
}

/// A block of cells read from a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    /// Normalized A1 address of the block
    pub address: String,
    /// Row-major values
    pub values: Vec<Vec<CellValue>>,
    /// Row-major formulas (empty string where a cell holds a constant)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formulas: Option<Vec<Vec<String>>>,
}

impl RangeDescriptor {
    /// Create a descriptor without formulas
    pub fn new(address: impl Into<String>, values: Vec<Vec<CellValue>>) -> Self {
        Self {
            address: address.into(),
            values,
            formulas: None,
        }
    }

    /// Attach a formula matrix. Rows that are all constants still appear.
    pub fn with_formulas(mut self, formulas: Vec<Vec<String>>) -> Self {
        self.formulas = Some(formulas);
        self
    }

    pub fn rows(&self) -> usize {
        self.values.len()
    }

    pub fn cols(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    /// Value at a 0-based offset within the block
    pub fn value(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.values.get(row).and_then(|r| r.get(col))
    }

    /// Formula at a 0-based offset, if the cell holds one
    pub fn formula(&self, row: usize, col: usize) -> Option<&str> {
        self.formulas
            .as_ref()
            .and_then(|f| f.get(row))
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .filter(|f| f.starts_with('='))
    }
}

/// Workbook file format chosen from the save path's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FileFormat {
    #[default]
    Xlsx,
    Xlsm,
    Xls,
    Csv,
}

impl FileFormat {
    /// Unknown or missing extensions save as `.xlsx`
    pub fn from_path(path: &str) -> Self {
        let ext = std::path::Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("xlsm") => FileFormat::Xlsm,
            Some("xls") => FileFormat::Xls,
            Some("csv") => FileFormat::Csv,
            _ => FileFormat::Xlsx,
        }
    }

    /// `XlFileFormat` constant
    pub fn xl_file_format(self) -> i32 {
        match self {
            FileFormat::Xlsx => 51,
            FileFormat::Xlsm => 52,
            FileFormat::Xls => -4143,
            FileFormat::Csv => 6,
        }
    }

    /// Enumeration keyword in Excel's AppleScript dictionary
    pub fn applescript_name(self) -> &'static str {
        match self {
            FileFormat::Xlsx => "Excel XML file format",
            FileFormat::Xlsm => "macro enabled XML file format",
            FileFormat::Xls => "Excel98to2004 file format",
            FileFormat::Csv => "CSV file format",
        }
    }
}

/// Chart types supported by both backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    // Column/Bar
    ColumnClustered,
    ColumnStacked,
    ColumnPercentStacked,
    BarClustered,
    BarStacked,
    BarPercentStacked,

    // Line
    Line,
    LineStacked,
    LineMarkers,

    // Pie
    Pie,
    PieExploded,
    Doughnut,

    // Area
    Area,
    AreaStacked,
    AreaPercentStacked,

    // Scatter
    ScatterMarkers,
    ScatterSmooth,
    ScatterLines,

    // Other
    Bubble,
    Radar,
}

impl ChartKind {
    const ALL: [ChartKind; 20] = [
        ChartKind::ColumnClustered,
        ChartKind::ColumnStacked,
        ChartKind::ColumnPercentStacked,
        ChartKind::BarClustered,
        ChartKind::BarStacked,
        ChartKind::BarPercentStacked,
        ChartKind::Line,
        ChartKind::LineStacked,
        ChartKind::LineMarkers,
        ChartKind::Pie,
        ChartKind::PieExploded,
        ChartKind::Doughnut,
        ChartKind::Area,
        ChartKind::AreaStacked,
        ChartKind::AreaPercentStacked,
        ChartKind::ScatterMarkers,
        ChartKind::ScatterSmooth,
        ChartKind::ScatterLines,
        ChartKind::Bubble,
        ChartKind::Radar,
    ];

    /// `XlChartType` constant used by the COM object model
    pub fn xl_chart_type(self) -> i32 {
        match self {
            ChartKind::ColumnClustered => 51,
            ChartKind::ColumnStacked => 52,
            ChartKind::ColumnPercentStacked => 53,
            ChartKind::BarClustered => 57,
            ChartKind::BarStacked => 58,
            ChartKind::BarPercentStacked => 59,
            ChartKind::Line => 4,
            ChartKind::LineStacked => 63,
            ChartKind::LineMarkers => 65,
            ChartKind::Pie => 5,
            ChartKind::PieExploded => 69,
            ChartKind::Doughnut => -4120,
            ChartKind::Area => 1,
            ChartKind::AreaStacked => 76,
            ChartKind::AreaPercentStacked => 77,
            ChartKind::ScatterMarkers => -4169,
            ChartKind::ScatterSmooth => 72,
            ChartKind::ScatterLines => 74,
            ChartKind::Bubble => 15,
            ChartKind::Radar => -4151,
        }
    }

    /// Enumeration keyword in Excel's AppleScript dictionary
    pub fn applescript_name(self) -> &'static str {
        match self {
            ChartKind::ColumnClustered => "column clustered",
            ChartKind::ColumnStacked => "column stacked",
            ChartKind::ColumnPercentStacked => "column stacked 100",
            ChartKind::BarClustered => "bar clustered",
            ChartKind::BarStacked => "bar stacked",
            ChartKind::BarPercentStacked => "bar stacked 100",
            ChartKind::Line => "line chart",
            ChartKind::LineStacked => "line stacked",
            ChartKind::LineMarkers => "line markers",
            ChartKind::Pie => "pie chart",
            ChartKind::PieExploded => "pie exploded",
            ChartKind::Doughnut => "doughnut",
            ChartKind::Area => "area chart",
            ChartKind::AreaStacked => "area stacked",
            ChartKind::AreaPercentStacked => "area stacked 100",
            ChartKind::ScatterMarkers => "xyscatter",
            ChartKind::ScatterSmooth => "xy scatter smooth",
            ChartKind::ScatterLines => "xy scatter lines",
            ChartKind::Bubble => "bubble",
            ChartKind::Radar => "radar",
        }
    }

    /// snake_case identifier, as accepted by [`FromStr`]
    pub fn id(self) -> &'static str {
        match self {
            ChartKind::ColumnClustered => "column_clustered",
            ChartKind::ColumnStacked => "column_stacked",
            ChartKind::ColumnPercentStacked => "column_percent_stacked",
            ChartKind::BarClustered => "bar_clustered",
            ChartKind::BarStacked => "bar_stacked",
            ChartKind::BarPercentStacked => "bar_percent_stacked",
            ChartKind::Line => "line",
            ChartKind::LineStacked => "line_stacked",
            ChartKind::LineMarkers => "line_markers",
            ChartKind::Pie => "pie",
            ChartKind::PieExploded => "pie_exploded",
            ChartKind::Doughnut => "doughnut",
            ChartKind::Area => "area",
            ChartKind::AreaStacked => "area_stacked",
            ChartKind::AreaPercentStacked => "area_percent_stacked",
            ChartKind::ScatterMarkers => "scatter_markers",
            ChartKind::ScatterSmooth => "scatter_smooth",
            ChartKind::ScatterLines => "scatter_lines",
            ChartKind::Bubble => "bubble",
            ChartKind::Radar => "radar",
        }
    }
}

impl FromStr for ChartKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let wanted = match wanted.as_str() {
            "column" | "bar_chart" => "column_clustered",
            "bar" => "bar_clustered",
            "scatter" => "scatter_markers",
            other => other,
        };
        ChartKind::ALL
            .into_iter()
            .find(|k| k.id() == wanted)
            .ok_or_else(|| EngineError::invalid(format!("unknown chart type '{s}'")))
    }
}

/// Everything needed to insert a chart, apart from its position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRequest {
    /// Object name; used to find the chart again after a timeout
    pub name: String,
    pub kind: ChartKind,
    /// Source data address on the same sheet
    pub data_range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// How an inserted object is sized and where the position scan starts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlacementPolicy {
    /// Object size; the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    /// Scan start; the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
}

impl PlacementPolicy {
    pub fn sized(width: f64, height: f64) -> Self {
        Self {
            size: Some(Size::new(width, height)),
            anchor: None,
        }
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = Some(anchor);
        self
    }
}

/// Which native call inserted a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMethod {
    /// `Shapes.AddChart2` on Windows, `make new chart object` on macOS
    Primary,
    /// `ChartObjects.Add` followed by `SetSourceData`
    Alternate,
}

/// Summary function of a pivot data field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Sum,
    Count,
    Average,
    Max,
    Min,
}

impl Aggregation {
    /// `XlConsolidationFunction` constant
    pub fn xl_function(self) -> i32 {
        match self {
            Aggregation::Sum => -4157,
            Aggregation::Count => -4112,
            Aggregation::Average => -4106,
            Aggregation::Max => -4136,
            Aggregation::Min => -4139,
        }
    }

    /// Keyword in Excel's AppleScript dictionary
    pub fn applescript_name(self) -> &'static str {
        match self {
            Aggregation::Sum => "do sum",
            Aggregation::Count => "do count",
            Aggregation::Average => "do average",
            Aggregation::Max => "do max",
            Aggregation::Min => "do min",
        }
    }

    fn caption_prefix(self) -> &'static str {
        match self {
            Aggregation::Sum => "Sum of",
            Aggregation::Count => "Count of",
            Aggregation::Average => "Average of",
            Aggregation::Max => "Max of",
            Aggregation::Min => "Min of",
        }
    }
}

/// One summarized field of a pivot table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueField {
    pub field: String,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl ValueField {
    pub fn new(field: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            field: field.into(),
            aggregation,
            caption: None,
        }
    }

    /// Caption shown in the pivot header, e.g. "Sum of Sales"
    pub fn display_caption(&self) -> String {
        self.caption
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.aggregation.caption_prefix(), self.field))
    }
}

/// Pivot table definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotSpec {
    /// Table name; also the key used to find the pivot again
    pub name: String,
    pub source_sheet: SheetRef,
    /// Source data including the header row
    pub source_range: String,
    pub destination_sheet: SheetRef,
    /// Top-left cell of the pivot table; a free spot is chosen when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default)]
    pub rows: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub values: Vec<ValueField>,
}

impl PivotSpec {
    /// Reject definitions Excel would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid("pivot table name is empty"));
        }
        if self.values.is_empty() && self.rows.is_empty() && self.columns.is_empty() {
            return Err(EngineError::invalid(format!(
                "pivot table '{}' has no row, column or value fields",
                self.name
            )));
        }
        crate::address::RangeRef::parse(&self.source_range)?;
        if let Some(cell) = &self.destination {
            crate::address::CellRef::parse(cell)?;
        }
        Ok(())
    }
}

//! Spreadsheet row parser
//!
//! Uploads arrive either as a raw cell grid (header rows included) or as
//! records already keyed by field name. Both are normalized into [`SheetRow`].
//! A row without a student code, name and parent phone is dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which fixed layout the upload uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetFormat {
    /// Per-session results, one header row
    Sessions,
    /// Cumulative exam results, two header rows
    Exams,
}

impl SheetFormat {
    pub fn header_rows(self) -> usize {
        match self {
            SheetFormat::Sessions => 1,
            SheetFormat::Exams => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SheetFormat::Sessions => "sessions",
            SheetFormat::Exams => "exams",
        }
    }

    fn columns(self) -> &'static Columns {
        match self {
            SheetFormat::Sessions => &SESSION_COLUMNS,
            SheetFormat::Exams => &EXAM_COLUMNS,
        }
    }
}

/// Column positions of one grid layout
struct Columns {
    code: usize,
    name: usize,
    student_phone: Option<usize>,
    parent_phone: usize,
    attendance: usize,
    payment: usize,
    quiz_mark: usize,
    time: Option<usize>,
    homework: Option<usize>,
}

const SESSION_COLUMNS: Columns = Columns {
    code: 0,
    name: 1,
    student_phone: Some(2),
    parent_phone: 3,
    attendance: 4,
    payment: 5,
    quiz_mark: 6,
    time: Some(7),
    homework: Some(8),
};

const EXAM_COLUMNS: Columns = Columns {
    code: 0,
    name: 1,
    student_phone: None,
    parent_phone: 2,
    attendance: 3,
    payment: 4,
    quiz_mark: 5,
    time: None,
    homework: None,
};

/// Uploaded cells, as sent in `excelData`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SheetData {
    /// Rows of cells, header rows included
    Grid(Vec<Vec<Value>>),
    /// Objects keyed `id, name, student_phone, parent_phone, attendance,
    /// payment, quiz_mark, time, hw_status`
    Records(Vec<Map<String, Value>>),
}

impl SheetData {
    /// Number of raw entries, headers included
    pub fn len(&self) -> usize {
        match self {
            SheetData::Grid(rows) => rows.len(),
            SheetData::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One accepted spreadsheet row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetRow {
    pub student_code: String,
    pub name: String,
    pub parent_phone: String,
    pub student_phone: Option<String>,
    pub attended: bool,
    pub payment: f64,
    pub quiz_mark: Option<f64>,
    pub time: Option<String>,
    /// Raw homework code; mapped to a status by the reconciler
    pub homework_code: Option<f64>,
}

/// Parser output
#[derive(Debug, Clone, Default)]
pub struct ParsedSheet {
    pub rows: Vec<SheetRow>,
    /// Rows missing a required field
    pub dropped: usize,
}

/// Parse uploaded cells in the given layout
pub fn parse_rows(format: SheetFormat, data: &SheetData) -> ParsedSheet {
    let candidates: Vec<Option<SheetRow>> = match data {
        SheetData::Grid(rows) => rows
            .iter()
            .skip(format.header_rows())
            .filter(|cells| !cells.iter().all(is_blank))
            .map(|cells| grid_row(format.columns(), cells))
            .collect(),
        SheetData::Records(records) => records.iter().map(record_row).collect(),
    };

    let mut parsed = ParsedSheet::default();
    for candidate in candidates {
        match candidate {
            Some(row) => parsed.rows.push(row),
            None => parsed.dropped += 1,
        }
    }
    parsed
}

fn grid_row(columns: &Columns, cells: &[Value]) -> Option<SheetRow> {
    let cell = |index: usize| cells.get(index).unwrap_or(&Value::Null);
    let optional = |index: Option<usize>| index.map(cell).unwrap_or(&Value::Null);

    build_row(
        cell(columns.code),
        cell(columns.name),
        cell(columns.parent_phone),
        optional(columns.student_phone),
        cell(columns.attendance),
        cell(columns.payment),
        cell(columns.quiz_mark),
        optional(columns.time),
        optional(columns.homework),
    )
}

fn record_row(record: &Map<String, Value>) -> Option<SheetRow> {
    let field = |key: &str| record.get(key).unwrap_or(&Value::Null);

    build_row(
        field("id"),
        field("name"),
        field("parent_phone"),
        field("student_phone"),
        field("attendance"),
        field("payment"),
        field("quiz_mark"),
        field("time"),
        field("hw_status"),
    )
}

#[allow(clippy::too_many_arguments)]
fn build_row(
    code: &Value,
    name: &Value,
    parent_phone: &Value,
    student_phone: &Value,
    attendance: &Value,
    payment: &Value,
    quiz_mark: &Value,
    time: &Value,
    homework: &Value,
) -> Option<SheetRow> {
    Some(SheetRow {
        student_code: cell_text(code)?,
        name: cell_text(name)?,
        parent_phone: cell_text(parent_phone)?,
        student_phone: cell_text(student_phone),
        // 1, "1" and `true` all mark attendance
        attended: cell_number(attendance) == Some(1.0),
        payment: cell_number(payment).unwrap_or(0.0),
        quiz_mark: cell_number(quiz_mark),
        time: cell_text(time),
        homework_code: cell_number(homework),
    })
}

fn is_blank(value: &Value) -> bool {
    cell_text(value).is_none()
}

/// Text content of a cell; `None` when empty or blank
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(match n.as_f64() {
            // Spreadsheet exports turn codes and phones into floats
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Numeric content of a cell; text cells are parsed
pub fn cell_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

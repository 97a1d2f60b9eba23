//! Follow-Up Ingestion
//!
//! Turns spreadsheet uploads into roster records:
//! 1. Parse the uploaded cells into normalized rows
//! 2. Resolve the target sheet (and exam)
//! 3. Upsert each row's student and result record
//! 4. Provision the parent login for each row

pub mod errors;
pub mod parser;
pub mod reconciler;

pub use errors::{ImportError, RowError};
pub use parser::{parse_rows, ParsedSheet, SheetData, SheetFormat, SheetRow};
pub use reconciler::{ExamImport, ImportReport, Reconciler, SessionImport};

//! Import reconciler
//!
//! Applies parsed rows to the roster. The sheet (and exam) is resolved once;
//! a failure there aborts the run. Each row then upserts its student, its
//! result record and its parent account, strictly in order. A failing step
//! is recorded against the row and the run moves to the next one.

use crate::errors::{ImportError, RowError};
use crate::parser::{parse_rows, SheetData, SheetFormat, SheetRow};
use followup_common::db::models::{AppRole, Exam, ExamType, HomeworkSlot, HomeworkStatus, Sheet, Student};
use followup_common::db::{ExamResultUpsert, Patch, RosterStore, SessionUpsert, StudentUpsert};
use followup_common::errors::AppError;
use followup_common::{metrics, SESSION_COUNT};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Parameters of a per-session upload
#[derive(Debug, Clone)]
pub struct SessionImport {
    pub sheet_name: String,
    pub session_number: i32,
    /// Homework column selected by the admin, e.g. `hw3`
    pub homework_column: String,
    pub finish_time: Option<String>,
}

/// Parameters of a cumulative exam upload
#[derive(Debug, Clone)]
pub struct ExamImport {
    pub sheet_name: String,
    pub exam_name: String,
}

/// Outcome of one import run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Rows that passed the required-field filter
    pub accepted: usize,
    /// Rows whose every step succeeded
    pub processed: usize,
    pub errors: Vec<String>,
}

impl ImportReport {
    fn record(&mut self, outcome: Result<(), RowError>) {
        match outcome {
            Ok(()) => self.processed += 1,
            Err(e) => {
                warn!(error = %e, "Row failed");
                self.errors.push(e.to_string());
            }
        }
    }
}

/// Import reconciler
pub struct Reconciler {
    store: Arc<dyn RosterStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RosterStore>) -> Self {
        Self { store }
    }

    /// Import per-session results into `params.session_number`
    #[instrument(skip(self, data, params), fields(sheet = %params.sheet_name, session = params.session_number))]
    pub async fn import_sessions(
        &self,
        data: &SheetData,
        params: &SessionImport,
    ) -> Result<ImportReport, ImportError> {
        let start = Instant::now();
        let result = self.run_sessions(data, params).await;
        observe(SheetFormat::Sessions, &result, start);
        result
    }

    /// Import cumulative exam results for `params.exam_name`
    #[instrument(skip(self, data, params), fields(sheet = %params.sheet_name, exam = %params.exam_name))]
    pub async fn import_exam(
        &self,
        data: &SheetData,
        params: &ExamImport,
    ) -> Result<ImportReport, ImportError> {
        let start = Instant::now();
        let result = self.run_exam(data, params).await;
        observe(SheetFormat::Exams, &result, start);
        result
    }

    async fn run_sessions(
        &self,
        data: &SheetData,
        params: &SessionImport,
    ) -> Result<ImportReport, ImportError> {
        if !(1..=SESSION_COUNT).contains(&params.session_number) {
            return Err(ImportError::InvalidSessionNumber {
                number: params.session_number,
                max: SESSION_COUNT,
            });
        }
        let slot = HomeworkSlot::parse(&params.homework_column)
            .ok_or_else(|| ImportError::InvalidHomeworkColumn(params.homework_column.clone()))?;

        let sheet = self.resolve_sheet(&params.sheet_name).await?;
        let finish_time = params
            .finish_time
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);

        let parsed = parse_rows(SheetFormat::Sessions, data);
        if parsed.dropped > 0 {
            debug!(dropped = parsed.dropped, "Skipped rows missing code, name or parent phone");
        }

        let mut report = ImportReport {
            accepted: parsed.rows.len(),
            ..Default::default()
        };

        for row in &parsed.rows {
            let outcome = self
                .reconcile_session_row(&sheet, row, params.session_number, slot, finish_time.as_deref())
                .await;
            report.record(outcome);
        }

        Ok(report)
    }

    async fn run_exam(
        &self,
        data: &SheetData,
        params: &ExamImport,
    ) -> Result<ImportReport, ImportError> {
        let exam_name = params.exam_name.trim();
        if exam_name.is_empty() {
            return Err(ImportError::MissingField("examName"));
        }

        let sheet = self.resolve_sheet(&params.sheet_name).await?;
        let exam = self
            .store
            .upsert_exam(exam_name, ExamType::Shamel)
            .await
            .map_err(ImportError::ExamSetup)?;

        let parsed = parse_rows(SheetFormat::Exams, data);
        if parsed.dropped > 0 {
            debug!(dropped = parsed.dropped, "Skipped rows missing code, name or parent phone");
        }

        let mut report = ImportReport {
            accepted: parsed.rows.len(),
            ..Default::default()
        };

        for row in &parsed.rows {
            let outcome = self.reconcile_exam_row(&sheet, &exam, row).await;
            report.record(outcome);
        }

        Ok(report)
    }

    async fn resolve_sheet(&self, name: &str) -> Result<Sheet, ImportError> {
        self.store
            .find_sheet_by_name(name)
            .await
            .map_err(ImportError::SheetLookup)?
            .ok_or_else(|| ImportError::SheetNotFound { name: name.to_string() })
    }

    async fn reconcile_session_row(
        &self,
        sheet: &Sheet,
        row: &SheetRow,
        session_number: i32,
        slot: HomeworkSlot,
        finish_time: Option<&str>,
    ) -> Result<(), RowError> {
        let student = self.upsert_student(sheet, row, Patch::Set(row.student_phone.clone())).await?;

        self.store
            .upsert_session(&SessionUpsert {
                student_id: student.id,
                session_number,
                attended: row.attended,
                payment: row.payment,
                quiz_mark: row.quiz_mark,
                time: row.time.clone(),
                finish_time: finish_time.map(String::from),
                homework_slot: slot,
                homework: HomeworkStatus::from_code(row.homework_code),
            })
            .await
            .map_err(|source| RowError::Session {
                code: row.student_code.clone(),
                source,
            })?;

        self.provision_parent(&student, row).await
    }

    async fn reconcile_exam_row(&self, sheet: &Sheet, exam: &Exam, row: &SheetRow) -> Result<(), RowError> {
        // The exam layout has no student phone column
        let student = self.upsert_student(sheet, row, Patch::Keep).await?;

        self.store
            .upsert_exam_result(&ExamResultUpsert {
                exam_id: exam.id,
                student_id: student.id,
                attendance: row.attended,
                payment: row.payment,
                quiz_mark: row.quiz_mark,
            })
            .await
            .map_err(|source| RowError::ExamResult {
                code: row.student_code.clone(),
                source,
            })?;

        self.provision_parent(&student, row).await
    }

    async fn upsert_student(
        &self,
        sheet: &Sheet,
        row: &SheetRow,
        student_phone: Patch<Option<String>>,
    ) -> Result<Student, RowError> {
        self.store
            .upsert_student(&StudentUpsert {
                sheet_id: sheet.id,
                student_code: row.student_code.clone(),
                name: row.name.clone(),
                parent_phone: row.parent_phone.clone(),
                student_phone,
            })
            .await
            .map_err(|source| RowError::Student {
                code: row.student_code.clone(),
                source,
            })
    }

    /// Ensure the parent login exists, sees this student and holds the parent role
    async fn provision_parent(&self, student: &Student, row: &SheetRow) -> Result<(), RowError> {
        let account = async {
            let provisioned = self.store.upsert_user(&row.parent_phone).await?;
            if provisioned.created {
                debug!(student = %row.student_code, "Created parent account");
            }
            self.store.link_user_student(provisioned.user.id, student.id).await?;
            self.store.grant_role(provisioned.user.id, AppRole::Parent).await?;
            Ok::<_, AppError>(())
        };

        account.await.map_err(|source| RowError::Account {
            code: row.student_code.clone(),
            source,
        })
    }
}

fn observe(format: SheetFormat, result: &Result<ImportReport, ImportError>, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    match result {
        Ok(report) => {
            info!(
                accepted = report.accepted,
                processed = report.processed,
                failed = report.errors.len(),
                duration_ms = (duration * 1000.0) as u64,
                "Import finished"
            );
            metrics::record_import(
                format.as_str(),
                report.accepted,
                report.processed,
                report.errors.len(),
                duration,
                true,
            );
        }
        Err(e) => {
            warn!(error = %e, "Import aborted");
            metrics::record_import(format.as_str(), 0, 0, 0, duration, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use followup_common::MemoryStore;
    use serde_json::json;

    const SHEET: &str = "Sat 4pm";

    fn setup() -> (Arc<MemoryStore>, Reconciler) {
        store_with(MemoryStore::with_sheets([SHEET]))
    }

    fn store_with(store: MemoryStore) -> (Arc<MemoryStore>, Reconciler) {
        let store = Arc::new(store);
        let reconciler = Reconciler::new(store.clone());
        (store, reconciler)
    }

    fn session_params(number: i32, column: &str) -> SessionImport {
        SessionImport {
            sheet_name: SHEET.to_string(),
            session_number: number,
            homework_column: column.to_string(),
            finish_time: Some("18:30".to_string()),
        }
    }

    fn exam_params(name: &str) -> ExamImport {
        ExamImport {
            sheet_name: SHEET.to_string(),
            exam_name: name.to_string(),
        }
    }

    fn data(value: serde_json::Value) -> SheetData {
        serde_json::from_value(value).unwrap()
    }

    fn session_upload() -> SheetData {
        data(json!([
            ["code", "name", "phone", "parent", "att", "pay", "quiz", "time", "hw"],
            ["S1", "Omar Hany", "0111", "0100", 1, 50, 8, "17:00", 1],
            ["S2", "Laila Samir", null, "0122", 0, null, null, null, null],
            ["S3", "Nour Ali", "0133", "0100", 1, 50, 10, "17:10", 3]
        ]))
    }

    fn exam_upload() -> SheetData {
        data(json!([
            ["Shamel"],
            ["code", "name", "parent", "att", "pay", "quiz"],
            ["S1", "Omar Hany", "0100", 1, 100, 45],
            ["S2", "Laila Samir", "0122", 1, 100, 38]
        ]))
    }

    #[tokio::test]
    async fn test_session_import_writes_every_table() {
        let (store, reconciler) = setup();

        let report = reconciler
            .import_sessions(&session_upload(), &session_params(2, "hw2"))
            .await
            .unwrap();

        assert_eq!(report, ImportReport { accepted: 3, processed: 3, errors: vec![] });

        let counts = store.counts();
        assert_eq!(counts.students, 3);
        assert_eq!(counts.sessions, 3);
        // S1 and S3 share a parent phone
        assert_eq!(counts.users, 2);
        assert_eq!(counts.user_students, 3);
        assert_eq!(counts.user_roles, 2);

        let sessions = store.sessions();
        assert!(sessions.iter().all(|s| s.session_number == 2));
        assert!(sessions.iter().all(|s| s.finish_time.as_deref() == Some("18:30")));

        let laila = store.students().into_iter().find(|s| s.student_code == "S2").unwrap();
        let laila_session = sessions.iter().find(|s| s.student_id == laila.id).unwrap();
        assert_eq!(laila_session.attended, Some(false));
        assert_eq!(laila_session.payment, Some(0.0));
        assert_eq!(laila_session.quiz_mark, None);
        assert_eq!(laila_session.hw2_status, Some(HomeworkStatus::Complete));
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent() {
        let (store, reconciler) = setup();
        let params = session_params(1, "hw1");

        reconciler.import_sessions(&session_upload(), &params).await.unwrap();
        let counts = store.counts();
        let students = store.students();
        let users = store.users();

        let report = reconciler.import_sessions(&session_upload(), &params).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(store.counts(), counts);
        assert_eq!(store.students(), students);
        assert_eq!(store.users(), users);
    }

    #[tokio::test]
    async fn test_row_missing_parent_phone_is_silently_dropped() {
        let (store, reconciler) = setup();
        let upload = data(json!([
            ["header"],
            ["S1", "Omar", null, "0100", 1],
            ["S2", "Laila", null, "", 1],
            ["S3", "Nour", null, "0133", 1]
        ]));

        let report = reconciler
            .import_sessions(&upload, &session_params(1, "hw1"))
            .await
            .unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.processed, 2);
        assert!(report.errors.is_empty());
        assert_eq!(store.counts().students, 2);
    }

    #[tokio::test]
    async fn test_unknown_sheet_is_fatal() {
        let (store, reconciler) = setup();
        let mut params = session_params(1, "hw1");
        params.sheet_name = "Nope".to_string();

        let err = reconciler.import_sessions(&session_upload(), &params).await.unwrap_err();
        assert_eq!(err.to_string(), "Sheet \"Nope\" not found");
        assert_eq!(store.counts().students, 0);
    }

    #[tokio::test]
    async fn test_invalid_session_parameters_are_fatal() {
        let (store, reconciler) = setup();

        let err = reconciler
            .import_sessions(&session_upload(), &session_params(9, "hw1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidSessionNumber { number: 9, .. }));

        let err = reconciler
            .import_sessions(&session_upload(), &session_params(1, "quiz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidHomeworkColumn(_)));
        assert_eq!(store.counts().sessions, 0);
    }

    #[tokio::test]
    async fn test_last_write_wins_on_student_name() {
        let (store, reconciler) = setup();
        let upload = data(json!([
            ["header"],
            ["S1", "Omar", null, "0100", 1],
            ["S1", "Omar Hany", null, "0100", 1]
        ]));

        let report = reconciler
            .import_sessions(&upload, &session_params(1, "hw1"))
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        let students = store.students();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Omar Hany");
        assert_eq!(store.counts().sessions, 1);
    }

    #[tokio::test]
    async fn test_homework_upload_touches_only_selected_slot() {
        let (store, reconciler) = setup();

        reconciler
            .import_sessions(&session_upload(), &session_params(1, "hw1"))
            .await
            .unwrap();

        let second = data(json!([
            ["header"],
            ["S1", "Omar Hany", "0111", "0100", 1, 50, 8, "17:00", 2]
        ]));
        reconciler
            .import_sessions(&second, &session_params(1, "HW4"))
            .await
            .unwrap();

        let omar = store.students().into_iter().find(|s| s.student_code == "S1").unwrap();
        let session = store
            .sessions()
            .into_iter()
            .find(|s| s.student_id == omar.id)
            .unwrap();

        assert_eq!(session.hw1_status, Some(HomeworkStatus::NotDone));
        assert_eq!(session.hw4_status, Some(HomeworkStatus::Partial));
        assert_eq!(session.hw2_status, None);
    }

    #[tokio::test]
    async fn test_exam_created_once() {
        let (store, reconciler) = setup();

        let report = reconciler
            .import_exam(&exam_upload(), &exam_params("Shamel 1"))
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        let counts = store.counts();
        assert_eq!(counts.exams, 1);
        assert_eq!(counts.exam_results, 2);

        reconciler
            .import_exam(&exam_upload(), &exam_params("Shamel 1"))
            .await
            .unwrap();
        assert_eq!(store.counts().exams, 1);
        assert_eq!(store.counts().exam_results, 2);
    }

    #[tokio::test]
    async fn test_exam_import_keeps_student_phone() {
        let (store, reconciler) = setup();

        reconciler
            .import_sessions(&session_upload(), &session_params(1, "hw1"))
            .await
            .unwrap();
        reconciler
            .import_exam(&exam_upload(), &exam_params("Shamel 1"))
            .await
            .unwrap();

        let omar = store.students().into_iter().find(|s| s.student_code == "S1").unwrap();
        assert_eq!(omar.student_phone.as_deref(), Some("0111"));
    }

    #[tokio::test]
    async fn test_blank_exam_name_is_fatal() {
        let (store, reconciler) = setup();

        let err = reconciler
            .import_exam(&exam_upload(), &exam_params("  "))
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::MissingField("examName")));
        assert_eq!(store.counts().exams, 0);
    }

    #[tokio::test]
    async fn test_student_failure_is_recorded_and_run_continues() {
        let (store, reconciler) = store_with(MemoryStore::with_sheets([SHEET]).with_failing_student("S2"));

        let report = reconciler
            .import_sessions(&session_upload(), &session_params(1, "hw1"))
            .await
            .unwrap();

        assert_eq!(report.accepted, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Student S2: "));
        assert_eq!(store.counts().sessions, 2);
    }

    #[tokio::test]
    async fn test_account_failure_is_reported() {
        let (store, reconciler) = store_with(MemoryStore::with_sheets([SHEET]).with_failing_phone("0122"));

        let report = reconciler
            .import_exam(&exam_upload(), &exam_params("Shamel 1"))
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Account for S2: "));
        // The result itself was stored before provisioning failed
        assert_eq!(store.counts().exam_results, 2);
    }

    #[tokio::test]
    async fn test_parent_role_granted_once_per_account() {
        let (store, reconciler) = setup();

        reconciler
            .import_sessions(&session_upload(), &session_params(1, "hw1"))
            .await
            .unwrap();
        reconciler
            .import_exam(&exam_upload(), &exam_params("Shamel 1"))
            .await
            .unwrap();

        let grants = store.role_grants();
        assert_eq!(grants.len(), 2);
        assert!(grants.iter().all(|g| g.role == AppRole::Parent));
        assert!(store.users().iter().all(|u| u.must_change_password));
    }
}

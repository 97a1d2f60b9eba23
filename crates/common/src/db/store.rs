//! Storage abstraction shared by the import pipeline and the portal
//!
//! Every write is a single upsert keyed on the table's natural unique
//! constraint, so re-running an upload converges to the same state.

use crate::db::models::{
    AppRole, Exam, ExamResult, ExamType, HomeworkSlot, HomeworkStatus, Session, Sheet, Student,
    User,
};
use crate::errors::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Whether an upsert overwrites a column or leaves the stored value alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Keep,
    Set(T),
}

/// Student fields written by an upload, keyed on `(sheet_id, student_code)`
#[derive(Debug, Clone)]
pub struct StudentUpsert {
    pub sheet_id: Uuid,
    pub student_code: String,
    pub name: String,
    pub parent_phone: String,
    pub student_phone: Patch<Option<String>>,
}

/// Session fields written by an upload, keyed on `(student_id, session_number)`
#[derive(Debug, Clone)]
pub struct SessionUpsert {
    pub student_id: Uuid,
    pub session_number: i32,
    pub attended: bool,
    pub payment: f64,
    pub quiz_mark: Option<f64>,
    pub time: Option<String>,
    pub finish_time: Option<String>,
    /// Only this slot is written; the other seven keep their values
    pub homework_slot: HomeworkSlot,
    pub homework: HomeworkStatus,
}

/// Exam result fields, keyed on `(exam_id, student_id)`
#[derive(Debug, Clone)]
pub struct ExamResultUpsert {
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub attendance: bool,
    pub payment: f64,
    pub quiz_mark: Option<f64>,
}

/// Outcome of resolving a login identity by phone or username
#[derive(Debug, Clone)]
pub struct ProvisionedUser {
    pub user: User,
    /// True when this call inserted the account
    pub created: bool,
}

/// Data access used by the import reconciler and the HTTP handlers
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    // Sheets

    async fn find_sheet_by_name(&self, name: &str) -> Result<Option<Sheet>>;

    async fn find_sheet_by_id(&self, id: Uuid) -> Result<Option<Sheet>>;

    /// Create a sheet, returning the existing one if the name is taken
    async fn create_sheet(&self, name: &str) -> Result<Sheet>;

    async fn list_sheets(&self) -> Result<Vec<Sheet>>;

    // Import writes

    /// Resolve an exam by `(name, type)`, creating it if absent
    async fn upsert_exam(&self, name: &str, exam_type: ExamType) -> Result<Exam>;

    async fn upsert_student(&self, student: &StudentUpsert) -> Result<Student>;

    async fn upsert_session(&self, session: &SessionUpsert) -> Result<Session>;

    async fn upsert_exam_result(&self, result: &ExamResultUpsert) -> Result<ExamResult>;

    /// Resolve a user by login, creating it with `must_change_password` set if absent
    async fn upsert_user(&self, phone_or_username: &str) -> Result<ProvisionedUser>;

    /// Idempotent user/student link
    async fn link_user_student(&self, user_id: Uuid, student_id: Uuid) -> Result<()>;

    /// Idempotent role grant
    async fn grant_role(&self, user_id: Uuid, role: AppRole) -> Result<()>;

    // Accounts

    async fn find_user_by_login(&self, phone_or_username: &str) -> Result<Option<User>>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<AppRole>>;

    /// Store a new credential and clear the forced password change
    async fn set_password(&self, user_id: Uuid, password_hash: &str) -> Result<User>;

    // Portal reads

    async fn students_for_user(&self, user_id: Uuid) -> Result<Vec<Student>>;

    /// Sessions ordered by session number
    async fn sessions_for_student(&self, student_id: Uuid) -> Result<Vec<Session>>;

    async fn exam_results_for_student(&self, student_id: Uuid) -> Result<Vec<(Exam, ExamResult)>>;
}

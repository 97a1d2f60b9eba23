//! In-memory roster store
//!
//! Enforces the same natural keys as the Postgres schema. Used by tests and
//! by dry-run imports, where nothing should reach the database.

use crate::db::models::*;
use crate::db::store::{
    ExamResultUpsert, Patch, ProvisionedUser, RosterStore, SessionUpsert, StudentUpsert,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::entity::prelude::DateTimeWithTimeZone;
use sea_orm::DbErr;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    sheets: Vec<Sheet>,
    students: Vec<Student>,
    sessions: Vec<Session>,
    exams: Vec<Exam>,
    exam_results: Vec<ExamResult>,
    users: Vec<User>,
    user_students: Vec<UserStudent>,
    user_roles: Vec<UserRole>,
}

#[derive(Default)]
struct Faults {
    students: HashSet<String>,
    accounts: HashSet<String>,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub sheets: usize,
    pub students: usize,
    pub sessions: usize,
    pub exams: usize,
    pub exam_results: usize,
    pub users: usize,
    pub user_students: usize,
    pub user_roles: usize,
}

/// Roster store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
}

fn now() -> DateTimeWithTimeZone {
    chrono::Utc::now().into()
}

fn injected(what: &str, key: &str) -> AppError {
    AppError::Database(DbErr::Custom(format!("injected {} failure for {}", what, key)))
}

// A poisoned lock only means another test thread panicked mid-write
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with the named sheets
    pub fn with_sheets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut tables = lock(&store.tables);
            for name in names {
                tables.sheets.push(Sheet {
                    id: Uuid::new_v4(),
                    name: name.into(),
                    created_at: now(),
                });
            }
        }
        store
    }

    /// Make every student upsert for `student_code` fail
    #[cfg(any(test, feature = "test-util"))]
    pub fn with_failing_student(self, student_code: impl Into<String>) -> Self {
        lock(&self.faults).students.insert(student_code.into());
        self
    }

    /// Make every user upsert for `phone_or_username` fail
    #[cfg(any(test, feature = "test-util"))]
    pub fn with_failing_phone(self, phone_or_username: impl Into<String>) -> Self {
        lock(&self.faults).accounts.insert(phone_or_username.into());
        self
    }

    pub fn counts(&self) -> TableCounts {
        let tables = lock(&self.tables);
        TableCounts {
            sheets: tables.sheets.len(),
            students: tables.students.len(),
            sessions: tables.sessions.len(),
            exams: tables.exams.len(),
            exam_results: tables.exam_results.len(),
            users: tables.users.len(),
            user_students: tables.user_students.len(),
            user_roles: tables.user_roles.len(),
        }
    }

    pub fn students(&self) -> Vec<Student> {
        lock(&self.tables).students.clone()
    }

    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.tables).sessions.clone()
    }

    pub fn exam_results(&self) -> Vec<ExamResult> {
        lock(&self.tables).exam_results.clone()
    }

    pub fn users(&self) -> Vec<User> {
        lock(&self.tables).users.clone()
    }

    pub fn role_grants(&self) -> Vec<UserRole> {
        lock(&self.tables).user_roles.clone()
    }
}

#[async_trait]
impl RosterStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_sheet_by_name(&self, name: &str) -> Result<Option<Sheet>> {
        let tables = lock(&self.tables);
        Ok(tables.sheets.iter().find(|s| s.name == name).cloned())
    }

    async fn find_sheet_by_id(&self, id: Uuid) -> Result<Option<Sheet>> {
        let tables = lock(&self.tables);
        Ok(tables.sheets.iter().find(|s| s.id == id).cloned())
    }

    async fn create_sheet(&self, name: &str) -> Result<Sheet> {
        let mut tables = lock(&self.tables);
        if let Some(existing) = tables.sheets.iter().find(|s| s.name == name) {
            return Ok(existing.clone());
        }

        let sheet = Sheet {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now(),
        };
        tables.sheets.push(sheet.clone());
        Ok(sheet)
    }

    async fn list_sheets(&self) -> Result<Vec<Sheet>> {
        let mut sheets = lock(&self.tables).sheets.clone();
        sheets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sheets)
    }

    async fn upsert_exam(&self, name: &str, exam_type: ExamType) -> Result<Exam> {
        let mut tables = lock(&self.tables);
        if let Some(existing) = tables
            .exams
            .iter()
            .find(|e| e.name == name && e.exam_type == exam_type)
        {
            return Ok(existing.clone());
        }

        let exam = Exam {
            id: Uuid::new_v4(),
            name: name.to_string(),
            exam_type,
            created_at: now(),
        };
        tables.exams.push(exam.clone());
        Ok(exam)
    }

    async fn upsert_student(&self, student: &StudentUpsert) -> Result<Student> {
        if lock(&self.faults).students.contains(&student.student_code) {
            return Err(injected("student", &student.student_code));
        }

        let mut tables = lock(&self.tables);
        if let Some(existing) = tables
            .students
            .iter_mut()
            .find(|s| s.sheet_id == student.sheet_id && s.student_code == student.student_code)
        {
            existing.name = student.name.clone();
            existing.parent_phone = student.parent_phone.clone();
            if let Patch::Set(ref phone) = student.student_phone {
                existing.student_phone = phone.clone();
            }
            return Ok(existing.clone());
        }

        let created = Student {
            id: Uuid::new_v4(),
            sheet_id: student.sheet_id,
            student_code: student.student_code.clone(),
            name: student.name.clone(),
            parent_phone: student.parent_phone.clone(),
            student_phone: match student.student_phone {
                Patch::Set(ref phone) => phone.clone(),
                Patch::Keep => None,
            },
            created_at: now(),
        };
        tables.students.push(created.clone());
        Ok(created)
    }

    async fn upsert_session(&self, session: &SessionUpsert) -> Result<Session> {
        let mut tables = lock(&self.tables);
        let timestamp = now();

        let position = tables
            .sessions
            .iter()
            .position(|s| s.student_id == session.student_id && s.session_number == session.session_number);

        let index = match position {
            Some(index) => index,
            None => {
                tables.sessions.push(Session {
                    id: Uuid::new_v4(),
                    student_id: session.student_id,
                    session_number: session.session_number,
                    attended: None,
                    payment: None,
                    quiz_mark: None,
                    time: None,
                    finish_time: None,
                    hw1_status: None,
                    hw2_status: None,
                    hw3_status: None,
                    hw4_status: None,
                    hw5_status: None,
                    hw6_status: None,
                    hw7_status: None,
                    hw8_status: None,
                    created_at: timestamp,
                    updated_at: timestamp,
                });
                tables.sessions.len() - 1
            }
        };

        let row = &mut tables.sessions[index];
        row.attended = Some(session.attended);
        row.payment = Some(session.payment);
        row.quiz_mark = session.quiz_mark;
        row.time = session.time.clone();
        row.finish_time = session.finish_time.clone();
        row.set_homework(session.homework_slot, session.homework);
        row.updated_at = timestamp;

        Ok(row.clone())
    }

    async fn upsert_exam_result(&self, result: &ExamResultUpsert) -> Result<ExamResult> {
        let mut tables = lock(&self.tables);
        let timestamp = now();

        if let Some(existing) = tables
            .exam_results
            .iter_mut()
            .find(|r| r.exam_id == result.exam_id && r.student_id == result.student_id)
        {
            existing.attendance = Some(result.attendance);
            existing.payment = Some(result.payment);
            existing.quiz_mark = result.quiz_mark;
            existing.updated_at = timestamp;
            return Ok(existing.clone());
        }

        let created = ExamResult {
            id: Uuid::new_v4(),
            exam_id: result.exam_id,
            student_id: result.student_id,
            attendance: Some(result.attendance),
            payment: Some(result.payment),
            quiz_mark: result.quiz_mark,
            created_at: timestamp,
            updated_at: timestamp,
        };
        tables.exam_results.push(created.clone());
        Ok(created)
    }

    async fn upsert_user(&self, phone_or_username: &str) -> Result<ProvisionedUser> {
        if lock(&self.faults).accounts.contains(phone_or_username) {
            return Err(injected("account", phone_or_username));
        }

        let mut tables = lock(&self.tables);
        if let Some(existing) = tables
            .users
            .iter()
            .find(|u| u.phone_or_username == phone_or_username)
        {
            return Ok(ProvisionedUser {
                user: existing.clone(),
                created: false,
            });
        }

        let user = User {
            id: Uuid::new_v4(),
            phone_or_username: phone_or_username.to_string(),
            auth_id: None,
            password_hash: None,
            must_change_password: true,
            created_at: now(),
        };
        tables.users.push(user.clone());
        Ok(ProvisionedUser { user, created: true })
    }

    async fn link_user_student(&self, user_id: Uuid, student_id: Uuid) -> Result<()> {
        let mut tables = lock(&self.tables);
        let linked = tables
            .user_students
            .iter()
            .any(|l| l.user_id == user_id && l.student_id == student_id);

        if !linked {
            tables.user_students.push(UserStudent {
                id: Uuid::new_v4(),
                user_id,
                student_id,
            });
        }
        Ok(())
    }

    async fn grant_role(&self, user_id: Uuid, role: AppRole) -> Result<()> {
        let mut tables = lock(&self.tables);
        let granted = tables
            .user_roles
            .iter()
            .any(|g| g.user_id == user_id && g.role == role);

        if !granted {
            tables.user_roles.push(UserRole {
                id: Uuid::new_v4(),
                user_id,
                role,
            });
        }
        Ok(())
    }

    async fn find_user_by_login(&self, phone_or_username: &str) -> Result<Option<User>> {
        let tables = lock(&self.tables);
        Ok(tables
            .users
            .iter()
            .find(|u| u.phone_or_username == phone_or_username)
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let tables = lock(&self.tables);
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<AppRole>> {
        let tables = lock(&self.tables);
        Ok(tables
            .user_roles
            .iter()
            .filter(|g| g.user_id == user_id)
            .map(|g| g.role)
            .collect())
    }

    async fn set_password(&self, user_id: Uuid, password_hash: &str) -> Result<User> {
        let mut tables = lock(&self.tables);
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| AppError::UserNotFound { id: user_id.to_string() })?;

        user.password_hash = Some(password_hash.to_string());
        if user.auth_id.is_none() {
            user.auth_id = Some(Uuid::new_v4());
        }
        user.must_change_password = false;

        Ok(user.clone())
    }

    async fn students_for_user(&self, user_id: Uuid) -> Result<Vec<Student>> {
        let tables = lock(&self.tables);
        let linked: HashSet<Uuid> = tables
            .user_students
            .iter()
            .filter(|l| l.user_id == user_id)
            .map(|l| l.student_id)
            .collect();

        let mut students: Vec<Student> = tables
            .students
            .iter()
            .filter(|s| linked.contains(&s.id))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(students)
    }

    async fn sessions_for_student(&self, student_id: Uuid) -> Result<Vec<Session>> {
        let tables = lock(&self.tables);
        let mut sessions: Vec<Session> = tables
            .sessions
            .iter()
            .filter(|s| s.student_id == student_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.session_number);
        Ok(sessions)
    }

    async fn exam_results_for_student(&self, student_id: Uuid) -> Result<Vec<(Exam, ExamResult)>> {
        let tables = lock(&self.tables);
        Ok(tables
            .exam_results
            .iter()
            .filter(|r| r.student_id == student_id)
            .filter_map(|r| {
                tables
                    .exams
                    .iter()
                    .find(|e| e.id == r.exam_id)
                    .map(|e| (e.clone(), r.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(sheet_id: Uuid, code: &str, phone: Patch<Option<String>>) -> StudentUpsert {
        StudentUpsert {
            sheet_id,
            student_code: code.to_string(),
            name: format!("Student {}", code),
            parent_phone: "0100".to_string(),
            student_phone: phone,
        }
    }

    fn session(student_id: Uuid, slot: u8, status: HomeworkStatus) -> SessionUpsert {
        SessionUpsert {
            student_id,
            session_number: 1,
            attended: true,
            payment: 50.0,
            quiz_mark: Some(7.0),
            time: Some("17:00".into()),
            finish_time: None,
            homework_slot: HomeworkSlot::new(slot).unwrap(),
            homework: status,
        }
    }

    #[tokio::test]
    async fn test_student_upsert_is_keyed_by_sheet_and_code() {
        let store = MemoryStore::with_sheets(["A", "B"]);
        let a = store.find_sheet_by_name("A").await.unwrap().unwrap();
        let b = store.find_sheet_by_name("B").await.unwrap().unwrap();

        let first = store
            .upsert_student(&student(a.id, "S1", Patch::Set(Some("011".into()))))
            .await
            .unwrap();
        let again = store
            .upsert_student(&student(a.id, "S1", Patch::Keep))
            .await
            .unwrap();
        let other = store
            .upsert_student(&student(b.id, "S1", Patch::Keep))
            .await
            .unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.student_phone.as_deref(), Some("011"));
        assert_ne!(first.id, other.id);
        assert_eq!(store.counts().students, 2);
    }

    #[tokio::test]
    async fn test_session_upsert_touches_one_homework_slot() {
        let store = MemoryStore::new();
        let student_id = Uuid::new_v4();

        store
            .upsert_session(&session(student_id, 1, HomeworkStatus::NotDone))
            .await
            .unwrap();
        let row = store
            .upsert_session(&session(student_id, 2, HomeworkStatus::Partial))
            .await
            .unwrap();

        assert_eq!(store.counts().sessions, 1);
        assert_eq!(row.hw1_status, Some(HomeworkStatus::NotDone));
        assert_eq!(row.hw2_status, Some(HomeworkStatus::Partial));
        assert_eq!(row.hw3_status, None);
    }

    #[tokio::test]
    async fn test_user_upsert_reports_creation_once() {
        let store = MemoryStore::new();

        let first = store.upsert_user("0100").await.unwrap();
        let second = store.upsert_user("0100").await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.user.id, second.user.id);
        assert!(first.user.must_change_password);
    }

    #[tokio::test]
    async fn test_links_and_grants_are_idempotent() {
        let store = MemoryStore::new();
        let user = store.upsert_user("0100").await.unwrap().user;
        let student_id = Uuid::new_v4();

        for _ in 0..2 {
            store.link_user_student(user.id, student_id).await.unwrap();
            store.grant_role(user.id, AppRole::Parent).await.unwrap();
        }

        let counts = store.counts();
        assert_eq!(counts.user_students, 1);
        assert_eq!(counts.user_roles, 1);
        assert_eq!(store.roles_for_user(user.id).await.unwrap(), vec![AppRole::Parent]);
    }

    #[tokio::test]
    async fn test_set_password_clears_flag() {
        let store = MemoryStore::new();
        let user = store.upsert_user("0100").await.unwrap().user;

        let updated = store.set_password(user.id, "$argon2id$stub").await.unwrap();
        assert!(!updated.must_change_password);
        assert!(updated.auth_id.is_some());
        assert!(updated.has_credential());

        let missing = store.set_password(Uuid::new_v4(), "x").await;
        assert!(matches!(missing, Err(AppError::UserNotFound { .. })));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryStore::new()
            .with_failing_student("BAD")
            .with_failing_phone("0999");

        let err = store
            .upsert_student(&student(Uuid::new_v4(), "BAD", Patch::Keep))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(store.upsert_user("0999").await.is_err());
        assert_eq!(store.counts(), TableCounts::default());
    }
}

//! Repository pattern for database operations
//!
//! Postgres implementation of [`RosterStore`]. Writes are single
//! `INSERT .. ON CONFLICT` statements against the natural unique keys,
//! so there is no fetch-then-insert window.

use crate::db::models::*;
use crate::db::store::{
    ExamResultUpsert, Patch, ProvisionedUser, RosterStore, SessionUpsert, StudentUpsert,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DbBackend, EntityTrait, FromQueryResult, Insert, QueryFilter, QueryOrder, Set, Statement,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl RosterStore for Repository {
    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Sheet Operations
    // ========================================================================

    async fn find_sheet_by_name(&self, name: &str) -> Result<Option<Sheet>> {
        SheetEntity::find()
            .filter(SheetColumn::Name.eq(name))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_sheet_by_id(&self, id: Uuid) -> Result<Option<Sheet>> {
        SheetEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn create_sheet(&self, name: &str) -> Result<Sheet> {
        let sheet = SheetActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            created_at: Set(chrono::Utc::now().into()),
        };

        SheetEntity::insert(sheet)
            .on_conflict(
                OnConflict::column(SheetColumn::Name)
                    .update_column(SheetColumn::Name)
                    .to_owned(),
            )
            .exec_with_returning(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_sheets(&self) -> Result<Vec<Sheet>> {
        SheetEntity::find()
            .order_by_asc(SheetColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Import Writes
    // ========================================================================

    async fn upsert_exam(&self, name: &str, exam_type: ExamType) -> Result<Exam> {
        let exam = ExamActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            exam_type: Set(exam_type),
            created_at: Set(chrono::Utc::now().into()),
        };

        // The no-op update makes RETURNING yield the existing row on conflict
        ExamEntity::insert(exam)
            .on_conflict(
                OnConflict::columns([ExamColumn::Name, ExamColumn::ExamType])
                    .update_column(ExamColumn::Name)
                    .to_owned(),
            )
            .exec_with_returning(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn upsert_student(&self, student: &StudentUpsert) -> Result<Student> {
        let mut update_columns = vec![StudentColumn::Name, StudentColumn::ParentPhone];

        let mut model = StudentActiveModel {
            id: Set(Uuid::new_v4()),
            sheet_id: Set(student.sheet_id),
            student_code: Set(student.student_code.clone()),
            name: Set(student.name.clone()),
            parent_phone: Set(student.parent_phone.clone()),
            created_at: Set(chrono::Utc::now().into()),
            ..Default::default()
        };

        if let Patch::Set(ref phone) = student.student_phone {
            model.student_phone = Set(phone.clone());
            update_columns.push(StudentColumn::StudentPhone);
        }

        StudentEntity::insert(model)
            .on_conflict(
                OnConflict::columns([StudentColumn::StudentCode, StudentColumn::SheetId])
                    .update_columns(update_columns)
                    .to_owned(),
            )
            .exec_with_returning(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn upsert_session(&self, session: &SessionUpsert) -> Result<Session> {
        session_upsert(session)
            .exec_with_returning(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn upsert_exam_result(&self, result: &ExamResultUpsert) -> Result<ExamResult> {
        let now = chrono::Utc::now();

        let model = ExamResultActiveModel {
            id: Set(Uuid::new_v4()),
            exam_id: Set(result.exam_id),
            student_id: Set(result.student_id),
            attendance: Set(Some(result.attendance)),
            payment: Set(Some(result.payment)),
            quiz_mark: Set(result.quiz_mark),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        ExamResultEntity::insert(model)
            .on_conflict(
                OnConflict::columns([ExamResultColumn::ExamId, ExamResultColumn::StudentId])
                    .update_columns([
                        ExamResultColumn::Attendance,
                        ExamResultColumn::Payment,
                        ExamResultColumn::QuizMark,
                        ExamResultColumn::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_with_returning(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn upsert_user(&self, phone_or_username: &str) -> Result<ProvisionedUser> {
        let stmt = user_upsert(phone_or_username);

        let row = self
            .write_conn()
            .query_one(stmt)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("User upsert returned no row for {}", phone_or_username),
            })?;

        let user = User::from_query_result(&row, "")?;
        let created: bool = row.try_get("", "inserted")?;

        Ok(ProvisionedUser { user, created })
    }

    async fn link_user_student(&self, user_id: Uuid, student_id: Uuid) -> Result<()> {
        let link = UserStudentActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            student_id: Set(student_id),
        };

        UserStudentEntity::insert(link)
            .on_conflict(
                OnConflict::columns([UserStudentColumn::UserId, UserStudentColumn::StudentId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;

        Ok(())
    }

    async fn grant_role(&self, user_id: Uuid, role: AppRole) -> Result<()> {
        let grant = UserRoleActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            role: Set(role),
        };

        UserRoleEntity::insert(grant)
            .on_conflict(
                OnConflict::columns([UserRoleColumn::UserId, UserRoleColumn::Role])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;

        Ok(())
    }

    // ========================================================================
    // Account Operations
    // ========================================================================

    async fn find_user_by_login(&self, phone_or_username: &str) -> Result<Option<User>> {
        UserEntity::find()
            .filter(UserColumn::PhoneOrUsername.eq(phone_or_username))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<AppRole>> {
        let grants = UserRoleEntity::find()
            .filter(UserRoleColumn::UserId.eq(user_id))
            .all(self.read_conn())
            .await?;

        Ok(grants.into_iter().map(|grant| grant.role).collect())
    }

    async fn set_password(&self, user_id: Uuid, password_hash: &str) -> Result<User> {
        let existing = UserEntity::find_by_id(user_id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: user_id.to_string() })?;

        let auth_id = existing.auth_id.unwrap_or_else(Uuid::new_v4);

        let mut user: UserActiveModel = existing.into();
        user.password_hash = Set(Some(password_hash.to_string()));
        user.auth_id = Set(Some(auth_id));
        user.must_change_password = Set(false);

        user.update(self.write_conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Portal Reads
    // ========================================================================

    async fn students_for_user(&self, user_id: Uuid) -> Result<Vec<Student>> {
        let student_ids: Vec<Uuid> = UserStudentEntity::find()
            .filter(UserStudentColumn::UserId.eq(user_id))
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(|link| link.student_id)
            .collect();

        if student_ids.is_empty() {
            return Ok(Vec::new());
        }

        StudentEntity::find()
            .filter(StudentColumn::Id.is_in(student_ids))
            .order_by_asc(StudentColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn sessions_for_student(&self, student_id: Uuid) -> Result<Vec<Session>> {
        SessionEntity::find()
            .filter(SessionColumn::StudentId.eq(student_id))
            .order_by_asc(SessionColumn::SessionNumber)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn exam_results_for_student(&self, student_id: Uuid) -> Result<Vec<(Exam, ExamResult)>> {
        let rows = ExamResultEntity::find()
            .filter(ExamResultColumn::StudentId.eq(student_id))
            .order_by_asc(ExamResultColumn::CreatedAt)
            .find_also_related(ExamEntity)
            .all(self.read_conn())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(result, exam)| exam.map(|exam| (exam, result)))
            .collect())
    }
}

/// Insert for one session row. On conflict only the shared columns and the
/// selected homework slot are overwritten; the other slots are never named.
fn session_upsert(session: &SessionUpsert) -> Insert<SessionActiveModel> {
    let now = chrono::Utc::now();

    let mut model = SessionActiveModel {
        id: Set(Uuid::new_v4()),
        student_id: Set(session.student_id),
        session_number: Set(session.session_number),
        attended: Set(Some(session.attended)),
        payment: Set(Some(session.payment)),
        quiz_mark: Set(session.quiz_mark),
        time: Set(session.time.clone()),
        finish_time: Set(session.finish_time.clone()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    };
    model.set_homework(session.homework_slot, session.homework);

    let update_columns = [
        SessionColumn::Attended,
        SessionColumn::Payment,
        SessionColumn::QuizMark,
        SessionColumn::Time,
        SessionColumn::FinishTime,
        SessionColumn::UpdatedAt,
        session.homework_slot.column(),
    ];

    SessionEntity::insert(model).on_conflict(
        OnConflict::columns([SessionColumn::StudentId, SessionColumn::SessionNumber])
            .update_columns(update_columns)
            .to_owned(),
    )
}

// Raw SQL: `xmax = 0` tells a fresh insert apart from a conflict update
fn user_upsert(phone_or_username: &str) -> Statement {
    Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        INSERT INTO users (id, phone_or_username, must_change_password, created_at)
        VALUES ($1, $2, TRUE, NOW())
        ON CONFLICT (phone_or_username) DO UPDATE SET
            phone_or_username = EXCLUDED.phone_or_username
        RETURNING *, (xmax = 0) AS inserted
        "#,
        vec![Uuid::new_v4().into(), phone_or_username.into()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::QueryTrait;

    fn session(slot: u8) -> SessionUpsert {
        SessionUpsert {
            student_id: Uuid::new_v4(),
            session_number: 3,
            attended: true,
            payment: 50.0,
            quiz_mark: Some(8.0),
            time: Some("17:00".into()),
            finish_time: None,
            homework_slot: HomeworkSlot::new(slot).unwrap(),
            homework: HomeworkStatus::Partial,
        }
    }

    #[test]
    fn test_session_upsert_names_only_the_selected_slot() {
        let sql = session_upsert(&session(3)).build(DbBackend::Postgres).to_string();

        assert!(sql.contains(r#"ON CONFLICT ("student_id", "session_number") DO UPDATE SET"#));
        assert!(sql.contains(r#""hw3_status" = "excluded"."hw3_status""#));
        assert!(sql.contains(r#""attended" = "excluded"."attended""#));
        assert_eq!(sql.matches(r#""hw3_status""#).count(), 3);

        for other in (1..=8).filter(|n| *n != 3) {
            let column = format!("\"hw{}_status\"", other);
            assert!(!sql.contains(&column), "{} leaked into {}", column, sql);
        }

        // Identity and creation time survive a conflict
        assert!(!sql.contains(r#""id" = "excluded"."id""#));
        assert!(!sql.contains(r#""created_at" = "excluded"."created_at""#));
    }

    #[test]
    fn test_session_upsert_follows_the_slot() {
        let sql = session_upsert(&session(8)).build(DbBackend::Postgres).to_string();
        assert!(sql.contains(r#""hw8_status" = "excluded"."hw8_status""#));
        assert!(!sql.contains(r#""hw3_status""#));
    }

    #[test]
    fn test_user_upsert_reports_creation() {
        let stmt = user_upsert("0100");
        assert_eq!(stmt.db_backend, DbBackend::Postgres);
        assert!(stmt.sql.contains("ON CONFLICT (phone_or_username) DO UPDATE"));
        assert!(stmt.sql.contains("RETURNING *, (xmax = 0) AS inserted"));
        assert!(stmt.sql.contains("must_change_password"));

        let values = stmt.values.unwrap();
        assert_eq!(values.0.len(), 2);
        assert_eq!(values.0[1], sea_orm::Value::from("0100"));
    }
}

//! Parent portal handlers

use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use followup_common::{
    auth::AuthContext,
    db::models::{ExamType, HomeworkStatus, Session},
    errors::Result,
    SESSION_COUNT,
};

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub students: Vec<StudentResults>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResults {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub sheet: Option<String>,
    pub attended_count: usize,
    pub total_payment: f64,
    pub sessions: Vec<SessionView>,
    pub exams: Vec<ExamView>,
}

/// One of the numbered sessions; `recorded` is false until an upload touches it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub number: i32,
    pub recorded: bool,
    pub attended: Option<bool>,
    pub payment: Option<f64>,
    pub quiz_mark: Option<f64>,
    pub time: Option<String>,
    pub finish_time: Option<String>,
    pub homework: [Option<HomeworkStatus>; 8],
}

impl SessionView {
    fn empty(number: i32) -> Self {
        Self {
            number,
            recorded: false,
            attended: None,
            payment: None,
            quiz_mark: None,
            time: None,
            finish_time: None,
            homework: [None; 8],
        }
    }

    fn from_session(session: &Session) -> Self {
        Self {
            number: session.session_number,
            recorded: true,
            attended: session.attended,
            payment: session.payment,
            quiz_mark: session.quiz_mark,
            time: session.time.clone(),
            finish_time: session.finish_time.clone(),
            homework: session.homework_slots(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamView {
    pub name: String,
    pub exam_type: ExamType,
    pub attended: Option<bool>,
    pub payment: Option<f64>,
    pub quiz_mark: Option<f64>,
}

/// Results for every student linked to the calling parent
pub async fn my_results(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ResultsResponse>> {
    auth.require_active_parent()?;

    let students = state.store.students_for_user(auth.user_id).await?;
    let mut results = Vec::with_capacity(students.len());

    for student in students {
        let sheet = state.store.find_sheet_by_id(student.sheet_id).await?;
        let sessions = state.store.sessions_for_student(student.id).await?;
        let exams = state.store.exam_results_for_student(student.id).await?;

        let attended_count = sessions.iter().filter(|s| s.attended == Some(true)).count();
        let total_payment = sessions.iter().filter_map(|s| s.payment).sum::<f64>()
            + exams.iter().filter_map(|(_, r)| r.payment).sum::<f64>();

        let sessions = (1..=SESSION_COUNT)
            .map(|number| {
                sessions
                    .iter()
                    .find(|s| s.session_number == number)
                    .map(SessionView::from_session)
                    .unwrap_or_else(|| SessionView::empty(number))
            })
            .collect();

        let exams = exams
            .into_iter()
            .map(|(exam, result)| ExamView {
                name: exam.name,
                exam_type: exam.exam_type,
                attended: result.attendance,
                payment: result.payment,
                quiz_mark: result.quiz_mark,
            })
            .collect();

        results.push(StudentResults {
            id: student.id,
            code: student.student_code,
            name: student.name,
            sheet: sheet.map(|s| s.name),
            attended_count,
            total_payment,
            sessions,
            exams,
        });
    }

    Ok(Json(ResultsResponse { students: results }))
}

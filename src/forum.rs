use std::sync::Arc;

use axum::extract::Path;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::fetch_course;
use crate::models::{AnswerData, QuestionData};
use crate::state::AppState;
use crate::students::fetch_student;
use crate::{breaks, proceeds, Error, Payload};

pub async fn fetch_question(pg: &PgPool, uuid: Uuid) -> Result<QuestionData, Error> {
    sqlx::query_as::<_, QuestionData>("SELECT * FROM questions WHERE uuid = $1 LIMIT 1")
        .bind(uuid)
        .fetch_optional(pg)
        .await?
        .ok_or_else(|| Error::NotFound {
            message: format!("Question with uuid `{}` does not exist!", uuid),
        })
}

pub async fn ask_question(
    Extension(state): Extension<Arc<AppState>>,
    Path(course): Path<Uuid>,
    Json(body): Json<AskQuestion>,
) -> Payload<QuestionData> {
    if let Err(err) = body.validate() {
        return breaks(err);
    }
    fetch_course(&state.pg, course).await?;
    fetch_student(&state.pg, body.student_id).await?;

    let question = QuestionData {
        uuid: Uuid::new_v4(),
        course_id: course,
        student_id: body.student_id,
        title: body.title,
        body: body.body,
        created_at: Utc::now(),
    };
    sqlx::query("INSERT INTO questions VALUES ($1, $2, $3, $4, $5, $6)")
        .bind(question.uuid)
        .bind(question.course_id)
        .bind(question.student_id)
        .bind(&question.title)
        .bind(&question.body)
        .bind(question.created_at)
        .execute(&state.pg)
        .await?;
    log::debug!("Question {} asked on course {}", question.uuid, course);
    proceeds(question)
}

pub async fn list_questions(
    Extension(state): Extension<Arc<AppState>>,
    Path(course): Path<Uuid>,
) -> Payload<QuestionList> {
    fetch_course(&state.pg, course).await?;
    let questions = sqlx::query_as::<_, QuestionData>(
        "SELECT * FROM questions WHERE course_id = $1 ORDER BY created_at DESC",
    )
    .bind(course)
    .fetch_all(&state.pg)
    .await?;
    proceeds(QuestionList { questions })
}

pub async fn read_question(
    Extension(state): Extension<Arc<AppState>>,
    Path(question): Path<Uuid>,
) -> Payload<QuestionThread> {
    let data = fetch_question(&state.pg, question).await?;
    let answers = sqlx::query_as::<_, AnswerData>(
        "SELECT * FROM answers WHERE question_id = $1 ORDER BY created_at",
    )
    .bind(question)
    .fetch_all(&state.pg)
    .await?;
    proceeds(QuestionThread {
        question: data,
        answers,
    })
}

pub async fn answer_question(
    Extension(state): Extension<Arc<AppState>>,
    Path(question): Path<Uuid>,
    Json(body): Json<PostAnswer>,
) -> Payload<AnswerData> {
    if body.body.trim().is_empty() {
        return breaks(Error::invalid("`body` is required"));
    }
    fetch_question(&state.pg, question).await?;
    fetch_student(&state.pg, body.student_id).await?;

    let answer = AnswerData {
        uuid: Uuid::new_v4(),
        question_id: question,
        student_id: body.student_id,
        body: body.body,
        created_at: Utc::now(),
    };
    sqlx::query("INSERT INTO answers VALUES ($1, $2, $3, $4, $5)")
        .bind(answer.uuid)
        .bind(answer.question_id)
        .bind(answer.student_id)
        .bind(&answer.body)
        .bind(answer.created_at)
        .execute(&state.pg)
        .await?;
    proceeds(answer)
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionList {
    pub questions: Vec<QuestionData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionThread {
    #[serde(flatten)]
    pub question: QuestionData,
    pub answers: Vec<AnswerData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskQuestion {
    pub student_id: Uuid,
    pub title: String,
    pub body: String,
}

impl AskQuestion {
    fn validate(&self) -> Result<(), Error> {
        if self.title.trim().is_empty() || self.body.trim().is_empty() {
            return Err(Error::invalid("`title` and `body` are required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostAnswer {
    pub student_id: Uuid,
    pub body: String,
}

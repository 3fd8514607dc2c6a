use std::sync::Arc;

use axum::extract::Path;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CourseCounts, CourseData, ExamData, LessonData};
use crate::state::AppState;
use crate::{breaks, proceeds, Error, Payload};

pub async fn fetch_course(pg: &PgPool, uuid: Uuid) -> Result<CourseData, Error> {
    sqlx::query_as::<_, CourseData>("SELECT * FROM courses WHERE uuid = $1 LIMIT 1")
        .bind(uuid)
        .fetch_optional(pg)
        .await?
        .ok_or_else(|| Error::CourseDoesNotExist {
            message: format!("Course with uuid `{}` does not exist!", uuid),
        })
}

pub async fn course_counts(pg: &PgPool, course: Uuid) -> Result<CourseCounts, Error> {
    let (lessons, exams) = sqlx::query_as::<_, (i64, i64)>(
        "SELECT (SELECT COUNT(*) FROM lessons WHERE course_id = $1), \
                (SELECT COUNT(*) FROM exams WHERE course_id = $1)",
    )
    .bind(course)
    .fetch_one(pg)
    .await?;
    Ok(CourseCounts {
        lessons: lessons.max(0) as usize,
        exams: exams.max(0) as usize,
    })
}

pub async fn ensure_lesson(pg: &PgPool, course: Uuid, lesson: Uuid) -> Result<LessonData, Error> {
    sqlx::query_as::<_, LessonData>(
        "SELECT * FROM lessons WHERE uuid = $1 AND course_id = $2 LIMIT 1",
    )
    .bind(lesson)
    .bind(course)
    .fetch_optional(pg)
    .await?
    .ok_or_else(|| Error::NotFound {
        message: format!("Lesson `{}` is not part of course `{}`", lesson, course),
    })
}

pub async fn ensure_exam(pg: &PgPool, course: Uuid, exam: Uuid) -> Result<ExamData, Error> {
    sqlx::query_as::<_, ExamData>("SELECT * FROM exams WHERE uuid = $1 AND course_id = $2 LIMIT 1")
        .bind(exam)
        .bind(course)
        .fetch_optional(pg)
        .await?
        .ok_or_else(|| Error::NotFound {
            message: format!("Exam `{}` is not part of course `{}`", exam, course),
        })
}

pub async fn create_course(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CreateCourse>,
) -> Payload<CourseData> {
    if body.title.trim().is_empty() || body.instructor.trim().is_empty() {
        return breaks(Error::invalid("`title` and `instructor` are required"));
    }
    if body.price < 0 {
        return breaks(Error::invalid("`price` cannot be negative"));
    }

    let course = CourseData {
        uuid: Uuid::new_v4(),
        title: body.title,
        instructor: body.instructor,
        price: body.price,
        created_at: Utc::now(),
    };
    sqlx::query("INSERT INTO courses VALUES ($1, $2, $3, $4, $5)")
        .bind(course.uuid)
        .bind(&course.title)
        .bind(&course.instructor)
        .bind(course.price)
        .bind(course.created_at)
        .execute(&state.pg)
        .await?;
    log::info!("Created course `{}` ({})", course.title, course.uuid);
    proceeds(course)
}

pub async fn read_course(
    Extension(state): Extension<Arc<AppState>>,
    Path(course): Path<Uuid>,
) -> Payload<CourseOverview> {
    let data = fetch_course(&state.pg, course).await?;
    let counts = course_counts(&state.pg, course).await?;
    proceeds(CourseOverview {
        course: data,
        counts,
    })
}

pub async fn add_lesson(
    Extension(state): Extension<Arc<AppState>>,
    Path(course): Path<Uuid>,
    Json(body): Json<CreateLesson>,
) -> Payload<LessonData> {
    if body.title.trim().is_empty() {
        return breaks(Error::invalid("`title` is required"));
    }
    fetch_course(&state.pg, course).await?;

    let lesson = sqlx::query_as::<_, LessonData>(
        "INSERT INTO lessons (uuid, course_id, title, position) \
         VALUES ($1, $2, $3, (SELECT COALESCE(MAX(position), 0) + 1 FROM lessons WHERE course_id = $2)) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(course)
    .bind(&body.title)
    .fetch_one(&state.pg)
    .await?;
    proceeds(lesson)
}

pub async fn add_exam(
    Extension(state): Extension<Arc<AppState>>,
    Path(course): Path<Uuid>,
    Json(body): Json<CreateExam>,
) -> Payload<ExamData> {
    if body.title.trim().is_empty() {
        return breaks(Error::invalid("`title` is required"));
    }
    fetch_course(&state.pg, course).await?;

    let exam = ExamData {
        uuid: Uuid::new_v4(),
        course_id: course,
        title: body.title,
    };
    sqlx::query("INSERT INTO exams VALUES ($1, $2, $3)")
        .bind(exam.uuid)
        .bind(exam.course_id)
        .bind(&exam.title)
        .execute(&state.pg)
        .await?;
    proceeds(exam)
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseOverview {
    #[serde(flatten)]
    pub course: CourseData,
    pub counts: CourseCounts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourse {
    pub title: String,
    pub instructor: String,
    #[serde(default)]
    pub price: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLesson {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExam {
    pub title: String,
}

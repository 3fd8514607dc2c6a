use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudentData {
    pub uuid: Uuid,
    pub username: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CourseData {
    pub uuid: Uuid,
    pub title: String,
    pub instructor: String,
    /// Minor currency units.
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LessonData {
    pub uuid: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExamData {
    pub uuid: Uuid,
    pub course_id: Uuid,
    pub title: String,
}

/// Denominator of the progress formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CourseCounts {
    pub lessons: usize,
    pub exams: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "enrollment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamProgress {
    pub exam_id: Uuid,
    pub attempts: u32,
    pub best_score: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Enrollment {
    pub uuid: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub amount: i64,
    pub status: EnrollmentStatus,
    pub expires_at: DateTime<Utc>,
    pub progress: i32,
    pub completed_lessons: Vec<Uuid>,
    pub exam_progress: Json<Vec<ExamProgress>>,
    pub certificate_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CourseReport {
    pub course_id: Uuid,
    pub title: String,
    pub active: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub average_progress: f64,
    pub revenue: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuestionData {
    pub uuid: Uuid,
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnswerData {
    pub uuid: Uuid,
    pub question_id: Uuid,
    pub student_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

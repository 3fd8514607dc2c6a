//! Enrollment handlers.
//!
//! Every mutation is a read-modify-write of one `enrollments` row inside a
//! transaction that holds the row lock (`FOR UPDATE`), so concurrent lesson
//! and exam events for the same student/course serialize instead of
//! overwriting each other.

use std::sync::Arc;

use axum::extract::Path;
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::catalog::{course_counts, ensure_exam, ensure_lesson, fetch_course};
use crate::certificate::{certificate_id_for, CertificateDetails, Certificates};
use crate::err::is_unique_violation;
use crate::io::read_io_file;
use crate::lifecycle::{PaymentFields, MAX_SCORE};
use crate::models::{CourseData, Enrollment, ExamProgress, PaymentStatus, StudentData};
use crate::notify::{notify_completion, CompletionNotice};
use crate::payment::{self, PaymentConfirmation};
use crate::state::AppState;
use crate::students::fetch_student;
use crate::{breaks, proceeds, Error, Payload};

async fn lock_enrollment(
    tx: &mut Transaction<'_, Postgres>,
    student: Uuid,
    course: Uuid,
) -> Result<Option<Enrollment>, Error> {
    let enrollment = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE student_id = $1 AND course_id = $2 LIMIT 1 FOR UPDATE",
    )
    .bind(student)
    .bind(course)
    .fetch_optional(&mut *tx)
    .await?;
    Ok(enrollment)
}

async fn require_enrollment(
    tx: &mut Transaction<'_, Postgres>,
    student: Uuid,
    course: Uuid,
) -> Result<Enrollment, Error> {
    lock_enrollment(tx, student, course)
        .await?
        .ok_or_else(|| Error::EnrollmentDoesNotExist {
            message: format!(
                "Student `{}` is not enrolled in course `{}`",
                student, course
            ),
        })
}

async fn store_enrollment(
    tx: &mut Transaction<'_, Postgres>,
    e: &Enrollment,
) -> Result<(), Error> {
    sqlx::query(
        "INSERT INTO enrollments (uuid, student_id, course_id, payment_status, payment_id, amount, \
         status, expires_at, progress, completed_lessons, exam_progress, certificate_path, \
         created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (uuid) DO UPDATE SET \
         payment_status = EXCLUDED.payment_status, payment_id = EXCLUDED.payment_id, \
         amount = EXCLUDED.amount, status = EXCLUDED.status, expires_at = EXCLUDED.expires_at, \
         progress = EXCLUDED.progress, completed_lessons = EXCLUDED.completed_lessons, \
         exam_progress = EXCLUDED.exam_progress, certificate_path = EXCLUDED.certificate_path, \
         updated_at = EXCLUDED.updated_at",
    )
    .bind(e.uuid)
    .bind(e.student_id)
    .bind(e.course_id)
    .bind(e.payment_status)
    .bind(&e.payment_id)
    .bind(e.amount)
    .bind(e.status)
    .bind(e.expires_at)
    .bind(e.progress)
    .bind(&e.completed_lessons)
    .bind(&e.exam_progress)
    .bind(&e.certificate_path)
    .bind(e.created_at)
    .bind(e.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            Error::AlreadyEnrolled {
                message: format!(
                    "Student `{}` is already enrolled in course `{}`",
                    e.student_id, e.course_id
                ),
            }
        } else {
            Error::from(err)
        }
    })?;
    Ok(())
}

/// Issues the certificate and flips the enrollment to `completed` when
/// progress reached 100. Returns the notice to send once the row is
/// committed. Student and course are loaded by the caller before the row
/// lock is taken, so nothing here needs a second pooled connection.
async fn complete_if_ready(
    certificates: &Certificates,
    enrollment: &mut Enrollment,
    student: &StudentData,
    course: &CourseData,
    now: DateTime<Utc>,
) -> Result<Option<CompletionNotice>, Error> {
    if !enrollment.is_ready_to_complete() {
        return Ok(None);
    }

    let path = match &enrollment.certificate_path {
        Some(path) => path.clone(),
        None => {
            // keyed by the enrollment so a rolled back attempt reuses its file
            let details = CertificateDetails {
                student_name: student.name.clone(),
                course_title: course.title.clone(),
                instructor: course.instructor.clone(),
                certificate_id: certificate_id_for(enrollment.uuid),
            };
            certificates.issue(&details, now).await?
        }
    };
    enrollment.mark_completed(path, now);
    log::info!(
        "Enrollment {} completed course `{}`",
        enrollment.uuid,
        course.title
    );

    Ok(Some(CompletionNotice {
        recipient: student.email.clone(),
        student_name: student.name.clone(),
        course_title: course.title.clone(),
        artifact_path: enrollment.certificate_path.clone(),
    }))
}

pub async fn enroll(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<EnrollRequest>,
) -> Payload<Enrollment> {
    fetch_student(&state.pg, body.student_id).await?;
    let course = fetch_course(&state.pg, body.course_id).await?;

    let payment = if course.price > 0 {
        let confirmation = match &body.payment {
            Some(confirmation) => confirmation,
            None => {
                return breaks(Error::PaymentRejected {
                    message: format!("Course `{}` requires a payment", course.title),
                })
            }
        };
        payment::verify(&state.config.payment_secret, confirmation, course.price)?;
        PaymentFields {
            status: PaymentStatus::Paid,
            payment_id: Some(confirmation.payment_id.clone()),
            amount: confirmation.amount,
        }
    } else {
        PaymentFields {
            status: PaymentStatus::Free,
            payment_id: None,
            amount: 0,
        }
    };

    let now = Utc::now();
    let period = state.config.enrollment_period();
    let mut tx = state.pg.begin().await?;
    let enrollment = match lock_enrollment(&mut tx, body.student_id, body.course_id).await? {
        Some(mut existing) => {
            existing.reactivate(payment, now, period)?;
            log::info!("Reactivated enrollment {}", existing.uuid);
            existing
        }
        None => {
            let created = Enrollment::new(body.student_id, body.course_id, payment, now, period)?;
            log::info!(
                "Enrolled student {} in course {} ({})",
                created.student_id,
                created.course_id,
                created.uuid
            );
            created
        }
    };
    store_enrollment(&mut tx, &enrollment).await?;
    tx.commit().await?;
    proceeds(enrollment)
}

pub async fn unenroll(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<StudentCourse>,
) -> Payload<Enrollment> {
    let mut tx = state.pg.begin().await?;
    let mut enrollment = require_enrollment(&mut tx, body.student_id, body.course_id).await?;
    if enrollment.cancel(Utc::now())? {
        store_enrollment(&mut tx, &enrollment).await?;
        log::info!("Cancelled enrollment {}", enrollment.uuid);
    }
    tx.commit().await?;
    proceeds(enrollment)
}

pub async fn read_enrollment(
    Extension(state): Extension<Arc<AppState>>,
    Path((student, course)): Path<(Uuid, Uuid)>,
) -> Payload<Enrollment> {
    let enrollment = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE student_id = $1 AND course_id = $2 LIMIT 1",
    )
    .bind(student)
    .bind(course)
    .fetch_optional(&state.pg)
    .await?;
    match enrollment {
        Some(mut enrollment) => {
            enrollment.expire(Utc::now());
            proceeds(enrollment)
        }
        None => breaks(Error::EnrollmentDoesNotExist {
            message: format!(
                "Student `{}` is not enrolled in course `{}`",
                student, course
            ),
        }),
    }
}

pub async fn list_enrollments(
    Extension(state): Extension<Arc<AppState>>,
    Path(student): Path<Uuid>,
) -> Payload<EnrollmentList> {
    fetch_student(&state.pg, student).await?;
    let mut enrollments = sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE student_id = $1 ORDER BY created_at DESC",
    )
    .bind(student)
    .fetch_all(&state.pg)
    .await?;
    // lapsed rows the sweep has not reached yet are reported as cancelled
    let now = Utc::now();
    for enrollment in enrollments.iter_mut() {
        enrollment.expire(now);
    }
    proceeds(EnrollmentList { enrollments })
}

pub async fn watch_lesson(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<LessonWatched>,
) -> Payload<ProgressUpdate> {
    ensure_lesson(&state.pg, body.course_id, body.lesson_id).await?;
    let counts = course_counts(&state.pg, body.course_id).await?;
    let student = fetch_student(&state.pg, body.student_id).await?;
    let course = fetch_course(&state.pg, body.course_id).await?;

    let now = Utc::now();
    let mut tx = state.pg.begin().await?;
    let mut enrollment = require_enrollment(&mut tx, body.student_id, body.course_id).await?;
    enrollment.record_lesson(body.lesson_id, counts, now)?;
    let notice =
        complete_if_ready(&state.certificates, &mut enrollment, &student, &course, now).await?;
    store_enrollment(&mut tx, &enrollment).await?;
    tx.commit().await?;

    let completed_now = notice.is_some();
    if let Some(notice) = notice {
        notify_completion(&state.pg, notice).await;
    }
    proceeds(ProgressUpdate {
        enrollment,
        completed_now,
        attempt: None,
    })
}

pub async fn submit_exam(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<ExamSubmission>,
) -> Payload<ProgressUpdate> {
    if body.score > MAX_SCORE {
        return breaks(Error::invalid(format!(
            "`score` must be within 0..={}, got {}",
            MAX_SCORE, body.score
        )));
    }
    ensure_exam(&state.pg, body.course_id, body.exam_id).await?;
    let counts = course_counts(&state.pg, body.course_id).await?;
    let student = fetch_student(&state.pg, body.student_id).await?;
    let course = fetch_course(&state.pg, body.course_id).await?;

    let now = Utc::now();
    let mut tx = state.pg.begin().await?;
    let mut enrollment = require_enrollment(&mut tx, body.student_id, body.course_id).await?;
    let attempt = enrollment.record_exam(body.exam_id, body.score, counts, now)?;
    log::debug!(
        "Exam {} attempt {} scored {} (best {})",
        attempt.exam_id,
        attempt.attempts,
        body.score,
        attempt.best_score
    );
    let notice =
        complete_if_ready(&state.certificates, &mut enrollment, &student, &course, now).await?;
    store_enrollment(&mut tx, &enrollment).await?;
    tx.commit().await?;

    let completed_now = notice.is_some();
    if let Some(notice) = notice {
        notify_completion(&state.pg, notice).await;
    }
    proceeds(ProgressUpdate {
        enrollment,
        completed_now,
        attempt: Some(attempt),
    })
}

pub async fn download_certificate(
    Extension(state): Extension<Arc<AppState>>,
    Path((student, course)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, Error> {
    let path = sqlx::query_as::<_, (Option<String>,)>(
        "SELECT certificate_path FROM enrollments WHERE student_id = $1 AND course_id = $2 LIMIT 1",
    )
    .bind(student)
    .bind(course)
    .fetch_optional(&state.pg)
    .await?
    .and_then(|(path,)| path)
    .ok_or_else(|| Error::NotFound {
        message: format!(
            "No certificate for student `{}` in course `{}`",
            student, course
        ),
    })?;

    let bytes = read_io_file(path).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        bytes,
    ))
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollRequest {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub payment: Option<PaymentConfirmation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentCourse {
    pub student_id: Uuid,
    pub course_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LessonWatched {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub lesson_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExamSubmission {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub exam_id: Uuid,
    pub score: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentList {
    pub enrollments: Vec<Enrollment>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub enrollment: Enrollment,
    pub completed_now: bool,
    pub attempt: Option<ExamProgress>,
}

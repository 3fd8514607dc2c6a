//! Enrollment lifecycle rules.
//!
//! Everything in here is pure: handlers load an [`Enrollment`] under a row
//! lock, apply one of these transitions and write the row back.

use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{CourseCounts, Enrollment, EnrollmentStatus, ExamProgress, PaymentStatus};
use crate::Error;

pub const MAX_EXAM_ATTEMPTS: u32 = 3;
pub const PASSING_SCORE: u32 = 60;
pub const MAX_SCORE: u32 = 100;

/// Payment fields written on enroll and on reactivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFields {
    pub status: PaymentStatus,
    pub payment_id: Option<String>,
    pub amount: i64,
}

/// Rounded percentage of finished items, capped at 100. A course with
/// neither lessons nor exams has no progress.
pub fn progress_percent(completed: usize, counts: CourseCounts) -> i32 {
    let total = counts.lessons + counts.exams;
    if total == 0 {
        return 0;
    }
    // round half up without going through floats
    let rounded = (completed * 200 + total) / (2 * total);
    rounded.min(100) as i32
}

fn expiry_after(now: DateTime<Utc>, period: Duration) -> Result<DateTime<Utc>, Error> {
    match now.checked_add_signed(period) {
        Some(expires_at) if expires_at > now => Ok(expires_at),
        _ => Err(Error::InternalError {
            kind: "ConfigError",
            message: format!("Enrollment period of {} days is unusable", period.num_days()),
        }),
    }
}

impl Enrollment {
    pub fn new(
        student_id: Uuid,
        course_id: Uuid,
        payment: PaymentFields,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<Self, Error> {
        let expires_at = expiry_after(now, period)?;
        Ok(Self {
            uuid: Uuid::new_v4(),
            student_id,
            course_id,
            payment_status: payment.status,
            payment_id: payment.payment_id,
            amount: payment.amount,
            status: EnrollmentStatus::Active,
            expires_at,
            progress: 0,
            completed_lessons: Vec::new(),
            exam_progress: Json(Vec::new()),
            certificate_path: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Active enrollment whose expiry has passed but which the sweep has not
    /// cancelled yet.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == EnrollmentStatus::Active && self.expires_at <= now
    }

    /// Re-enroll over an existing record. Only cancelled or lapsed
    /// enrollments come back; progress and certificate are kept.
    pub fn reactivate(
        &mut self,
        payment: PaymentFields,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<(), Error> {
        match self.status {
            EnrollmentStatus::Completed => {
                return Err(Error::AlreadyEnrolled {
                    message: format!("Course `{}` is already completed", self.course_id),
                })
            }
            EnrollmentStatus::Active if !self.is_lapsed(now) => {
                return Err(Error::AlreadyEnrolled {
                    message: format!(
                        "Student is already enrolled in course `{}` until {}",
                        self.course_id, self.expires_at
                    ),
                })
            }
            _ => {}
        }
        let expires_at = expiry_after(now, period)?;
        self.status = EnrollmentStatus::Active;
        self.expires_at = expires_at;
        self.payment_status = payment.status;
        self.payment_id = payment.payment_id;
        self.amount = payment.amount;
        self.updated_at = now;
        Ok(())
    }

    /// Explicit unenroll. Completed enrollments stay completed.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<bool, Error> {
        match self.status {
            EnrollmentStatus::Completed => Err(Error::EnrollmentInactive {
                message: "Completed enrollments cannot be cancelled".to_string(),
            }),
            EnrollmentStatus::Cancelled => Ok(false),
            EnrollmentStatus::Active => {
                self.status = EnrollmentStatus::Cancelled;
                self.updated_at = now;
                Ok(true)
            }
        }
    }

    /// Expiry sweep transition for one record: a lapsed active enrollment
    /// becomes `cancelled`. Completed and cancelled ones are left alone.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_lapsed(now) {
            return false;
        }
        self.status = EnrollmentStatus::Cancelled;
        self.updated_at = now;
        true
    }

    fn ensure_open(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.status == EnrollmentStatus::Cancelled || self.is_lapsed(now) {
            return Err(Error::EnrollmentInactive {
                message: format!("Enrollment `{}` is not active", self.uuid),
            });
        }
        Ok(())
    }

    pub fn record_lesson(
        &mut self,
        lesson_id: Uuid,
        counts: CourseCounts,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.ensure_open(now)?;
        if !self.completed_lessons.contains(&lesson_id) {
            self.completed_lessons.push(lesson_id);
        }
        self.refresh_progress(counts);
        self.updated_at = now;
        Ok(())
    }

    pub fn record_exam(
        &mut self,
        exam_id: Uuid,
        score: u32,
        counts: CourseCounts,
        now: DateTime<Utc>,
    ) -> Result<ExamProgress, Error> {
        self.ensure_open(now)?;
        if score > MAX_SCORE {
            return Err(Error::invalid(format!(
                "`score` must be within 0..={}, got {}",
                MAX_SCORE, score
            )));
        }

        let entries = &mut self.exam_progress.0;
        let idx = match entries.iter().position(|p| p.exam_id == exam_id) {
            Some(idx) => idx,
            None => {
                entries.push(ExamProgress {
                    exam_id,
                    attempts: 0,
                    best_score: 0,
                    last_attempt_at: now,
                    is_completed: false,
                });
                entries.len() - 1
            }
        };
        let entry = &mut entries[idx];
        if entry.attempts >= MAX_EXAM_ATTEMPTS {
            return Err(Error::AttemptLimitReached {
                message: format!(
                    "Exam `{}` was already attempted {} times",
                    exam_id, entry.attempts
                ),
            });
        }
        entry.attempts += 1;
        entry.best_score = entry.best_score.max(score);
        entry.last_attempt_at = now;
        if score >= PASSING_SCORE {
            entry.is_completed = true;
        }
        let attempt = entry.clone();

        self.refresh_progress(counts);
        self.updated_at = now;
        Ok(attempt)
    }

    fn refresh_progress(&mut self, counts: CourseCounts) {
        let passed = self.exam_progress.0.iter().filter(|p| p.is_completed).count();
        let computed = progress_percent(self.completed_lessons.len() + passed, counts);
        // catalog changes must not take progress away
        self.progress = self.progress.max(computed);
    }

    /// Progress hit 100 and completion has not been recorded yet.
    pub fn is_ready_to_complete(&self) -> bool {
        self.progress >= 100 && self.status != EnrollmentStatus::Completed
    }

    /// One-way transition to `completed`. The certificate path is only
    /// written if none is stored yet.
    pub fn mark_completed(&mut self, certificate_path: String, now: DateTime<Utc>) -> bool {
        if !self.is_ready_to_complete() {
            return false;
        }
        self.status = EnrollmentStatus::Completed;
        if self.certificate_path.is_none() {
            self.certificate_path = Some(certificate_path);
        }
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COURSE: CourseCounts = CourseCounts {
        lessons: 4,
        exams: 1,
    };

    fn paid() -> PaymentFields {
        PaymentFields {
            status: PaymentStatus::Paid,
            payment_id: Some("pay_1".to_string()),
            amount: 49_900,
        }
    }

    fn fresh(now: DateTime<Utc>) -> Enrollment {
        Enrollment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            paid(),
            now,
            Duration::days(180),
        )
        .unwrap()
    }

    #[test]
    fn progress_formula() {
        assert_eq!(progress_percent(4, COURSE), 80);
        assert_eq!(progress_percent(5, COURSE), 100);
        assert_eq!(progress_percent(9, COURSE), 100);
        assert_eq!(progress_percent(1, CourseCounts { lessons: 2, exams: 1 }), 33);
        assert_eq!(progress_percent(2, CourseCounts { lessons: 2, exams: 1 }), 67);
        assert_eq!(progress_percent(1, CourseCounts { lessons: 7, exams: 1 }), 13);
        assert_eq!(progress_percent(3, CourseCounts { lessons: 0, exams: 0 }), 0);
    }

    #[test]
    fn new_enrollment_expires_in_180_days() {
        let now = Utc::now();
        let e = fresh(now);
        assert_eq!(e.status, EnrollmentStatus::Active);
        assert_eq!(e.expires_at - now, Duration::days(180));
        assert_eq!(e.progress, 0);
        assert!(e.certificate_path.is_none());
    }

    #[test]
    fn three_lessons_and_passed_exam_is_80() {
        let now = Utc::now();
        let mut e = fresh(now);
        for _ in 0..3 {
            e.record_lesson(Uuid::new_v4(), COURSE, now).unwrap();
        }
        let exam = e.record_exam(Uuid::new_v4(), 75, COURSE, now).unwrap();
        assert!(exam.is_completed);
        assert_eq!(e.progress, 80);
        assert_eq!(e.status, EnrollmentStatus::Active);
        assert!(!e.is_ready_to_complete());

        e.record_lesson(Uuid::new_v4(), COURSE, now).unwrap();
        assert_eq!(e.progress, 100);
        assert!(e.is_ready_to_complete());
        assert!(e.mark_completed("certificates/a.txt".to_string(), now));
        assert_eq!(e.status, EnrollmentStatus::Completed);
        assert_eq!(e.certificate_path.as_deref(), Some("certificates/a.txt"));

        // further events do not re-issue
        e.record_lesson(Uuid::new_v4(), COURSE, now).unwrap();
        assert!(!e.is_ready_to_complete());
        assert!(!e.mark_completed("certificates/b.txt".to_string(), now));
        assert_eq!(e.certificate_path.as_deref(), Some("certificates/a.txt"));
    }

    #[test]
    fn watching_a_lesson_twice_counts_once() {
        let now = Utc::now();
        let mut e = fresh(now);
        let lesson = Uuid::new_v4();
        e.record_lesson(lesson, COURSE, now).unwrap();
        e.record_lesson(lesson, COURSE, now).unwrap();
        assert_eq!(e.completed_lessons, vec![lesson]);
        assert_eq!(e.progress, 20);
    }

    #[test]
    fn fourth_attempt_is_rejected() {
        let now = Utc::now();
        let mut e = fresh(now);
        let exam = Uuid::new_v4();
        for score in [40, 55, 58] {
            e.record_exam(exam, score, COURSE, now).unwrap();
        }
        let err = e.record_exam(exam, 90, COURSE, now).unwrap_err();
        assert!(matches!(err, Error::AttemptLimitReached { .. }));

        let entry = &e.exam_progress.0[0];
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.best_score, 58);
        assert!(!entry.is_completed);
        assert_eq!(e.progress, 0);
    }

    #[test]
    fn best_score_never_drops_and_pass_sticks() {
        let now = Utc::now();
        let mut e = fresh(now);
        let exam = Uuid::new_v4();
        e.record_exam(exam, 80, COURSE, now).unwrap();
        let second = e.record_exam(exam, 10, COURSE, now).unwrap();
        assert_eq!(second.best_score, 80);
        assert!(second.is_completed);
        assert_eq!(e.progress, 20);
    }

    #[test]
    fn scores_above_100_are_invalid() {
        let now = Utc::now();
        let mut e = fresh(now);
        let err = e.record_exam(Uuid::new_v4(), 101, COURSE, now).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { .. }));
        assert!(e.exam_progress.0.is_empty());
    }

    #[test]
    fn progress_is_monotonic_when_catalog_grows() {
        let now = Utc::now();
        let mut e = fresh(now);
        let small = CourseCounts {
            lessons: 2,
            exams: 0,
        };
        e.record_lesson(Uuid::new_v4(), small, now).unwrap();
        assert_eq!(e.progress, 50);
        let bigger = CourseCounts {
            lessons: 10,
            exams: 0,
        };
        e.record_lesson(Uuid::new_v4(), bigger, now).unwrap();
        assert_eq!(e.progress, 50);
    }

    #[test]
    fn active_unexpired_reenroll_is_rejected() {
        let now = Utc::now();
        let mut e = fresh(now);
        let err = e
            .reactivate(paid(), now + Duration::days(1), Duration::days(180))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyEnrolled { .. }));
    }

    #[test]
    fn cancelled_or_lapsed_reenroll_resets_expiry() {
        let now = Utc::now();
        let mut e = fresh(now);
        e.cancel(now).unwrap();
        let later = now + Duration::days(3);
        e.reactivate(paid(), later, Duration::days(180)).unwrap();
        assert_eq!(e.status, EnrollmentStatus::Active);
        assert_eq!(e.expires_at, later + Duration::days(180));

        let much_later = e.expires_at + Duration::seconds(1);
        let payment = PaymentFields {
            status: PaymentStatus::Paid,
            payment_id: Some("pay_2".to_string()),
            amount: 39_900,
        };
        e.reactivate(payment, much_later, Duration::days(180)).unwrap();
        assert_eq!(e.expires_at, much_later + Duration::days(180));
        assert_eq!(e.payment_id.as_deref(), Some("pay_2"));
        assert_eq!(e.amount, 39_900);
    }

    #[test]
    fn completed_cannot_be_reenrolled_or_cancelled() {
        let now = Utc::now();
        let mut e = fresh(now);
        let tiny = CourseCounts {
            lessons: 1,
            exams: 0,
        };
        e.record_lesson(Uuid::new_v4(), tiny, now).unwrap();
        assert!(e.mark_completed("c.txt".to_string(), now));
        assert!(e.reactivate(paid(), now, Duration::days(180)).is_err());
        assert!(e.cancel(now).is_err());
    }

    #[test]
    fn lapse_starts_at_expiry() {
        let now = Utc::now();
        let mut e = fresh(now);
        assert!(!e.is_lapsed(now));
        assert!(e.is_lapsed(e.expires_at));
        e.status = EnrollmentStatus::Completed;
        assert!(!e.is_lapsed(e.expires_at + Duration::days(1)));
    }

    #[test]
    fn expire_cancels_only_lapsed_active() {
        let now = Utc::now();
        let mut active = fresh(now);
        assert!(!active.expire(now));
        assert_eq!(active.status, EnrollmentStatus::Active);
        let after = active.expires_at;
        assert!(active.expire(after));
        assert_eq!(active.status, EnrollmentStatus::Cancelled);
        assert_eq!(active.updated_at, after);
        assert!(!active.expire(after));

        let mut completed = fresh(now);
        completed.status = EnrollmentStatus::Completed;
        assert!(!completed.expire(after + Duration::days(1)));
        assert_eq!(completed.status, EnrollmentStatus::Completed);

        let mut cancelled = fresh(now);
        cancelled.cancel(now).unwrap();
        let touched = cancelled.updated_at;
        assert!(!cancelled.expire(after));
        assert_eq!(cancelled.updated_at, touched);
    }

    #[test]
    fn unusable_periods_are_refused() {
        let now = Utc::now();
        let payment = paid();
        let err = Enrollment::new(Uuid::new_v4(), Uuid::new_v4(), payment, now, Duration::days(-1))
            .unwrap_err();
        assert!(matches!(err, Error::InternalError { .. }));

        let mut e = fresh(now);
        e.cancel(now).unwrap();
        let expires_at = e.expires_at;
        assert!(e.reactivate(paid(), now, Duration::zero()).is_err());
        assert_eq!(e.status, EnrollmentStatus::Cancelled);
        assert_eq!(e.expires_at, expires_at);
    }

    #[test]
    fn inactive_enrollments_reject_progress() {
        let now = Utc::now();
        let mut e = fresh(now);
        let after = e.expires_at;
        let err = e.record_lesson(Uuid::new_v4(), COURSE, after).unwrap_err();
        assert!(matches!(err, Error::EnrollmentInactive { .. }));

        e.cancel(now).unwrap();
        let err = e.record_exam(Uuid::new_v4(), 70, COURSE, now).unwrap_err();
        assert!(matches!(err, Error::EnrollmentInactive { .. }));
    }

    #[test]
    fn attempts_never_exceed_limit() {
        let now = Utc::now();
        let mut e = fresh(now);
        let exam = Uuid::new_v4();
        for score in 0..10 {
            let _ = e.record_exam(exam, score * 5, COURSE, now);
        }
        assert!(e.exam_progress.0.iter().all(|p| p.attempts <= MAX_EXAM_ATTEMPTS));
        assert!((0..=100).contains(&e.progress));
    }
}

use std::sync::Arc;

use axum::Extension;
use serde::Serialize;

use crate::models::CourseReport;
use crate::state::AppState;
use crate::{proceeds, Payload};

pub async fn course_report(Extension(state): Extension<Arc<AppState>>) -> Payload<CourseReports> {
    let courses = sqlx::query_as::<_, CourseReport>(
        "SELECT c.uuid AS course_id, c.title, \
            COUNT(e.uuid) FILTER (WHERE e.status = 'active') AS active, \
            COUNT(e.uuid) FILTER (WHERE e.status = 'completed') AS completed, \
            COUNT(e.uuid) FILTER (WHERE e.status = 'cancelled') AS cancelled, \
            COALESCE(AVG(e.progress), 0)::FLOAT8 AS average_progress, \
            COALESCE(SUM(e.amount) FILTER (WHERE e.payment_status = 'paid'), 0)::BIGINT AS revenue \
         FROM courses c LEFT JOIN enrollments e ON e.course_id = c.uuid \
         GROUP BY c.uuid, c.title \
         ORDER BY revenue DESC, c.title",
    )
    .fetch_all(&state.pg)
    .await?;
    proceeds(CourseReports { courses })
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseReports {
    pub courses: Vec<CourseReport>,
}

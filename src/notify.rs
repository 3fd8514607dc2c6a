use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::Error;

#[derive(Debug, Clone)]
pub struct CompletionNotice {
    pub recipient: String,
    pub student_name: String,
    pub course_title: String,
    pub artifact_path: Option<String>,
}

impl CompletionNotice {
    pub fn subject(&self) -> String {
        format!("You completed {}", self.course_title)
    }

    pub fn body(&self) -> String {
        let mut body = format!(
            "Congratulations {}!\n\nYou have completed \"{}\".\n",
            self.student_name, self.course_title
        );
        if let Some(path) = &self.artifact_path {
            body.push_str(&format!("Your certificate is attached: {}\n", path));
        }
        body
    }
}

/// Queues the completion mail in the outbox table.
pub async fn queue_completion(pg: &PgPool, notice: &CompletionNotice) -> Result<Uuid, Error> {
    let uuid = Uuid::new_v4();
    sqlx::query("INSERT INTO notifications VALUES ($1, $2, $3, $4, $5, $6)")
        .bind(uuid)
        .bind(&notice.recipient)
        .bind(notice.subject())
        .bind(notice.body())
        .bind(&notice.artifact_path)
        .bind(Utc::now())
        .execute(pg)
        .await?;
    Ok(uuid)
}

/// Completion has already been committed when this runs, so failures only
/// get logged.
pub async fn notify_completion(pg: &PgPool, notice: CompletionNotice) {
    match queue_completion(pg, &notice).await {
        Ok(id) => log::info!("Queued completion notice {} for {}", id, notice.recipient),
        Err(err) => log::warn!(
            "Could not queue completion notice for {}: {:?}",
            notice.recipient,
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_mentions_certificate() {
        let notice = CompletionNotice {
            recipient: "ada@example.com".to_string(),
            student_name: "Ada".to_string(),
            course_title: "Rust for Engines".to_string(),
            artifact_path: Some("certificates/1.txt".to_string()),
        };
        assert_eq!(notice.subject(), "You completed Rust for Engines");
        assert!(notice.body().contains("certificates/1.txt"));

        let bare = CompletionNotice {
            artifact_path: None,
            ..notice
        };
        assert!(!bare.body().contains("certificate"));
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::Error;

/// Cancels every active enrollment whose expiry has passed. Same rule as
/// `Enrollment::expire`, applied as one conditional update.
pub async fn expire_lapsed(pg: &PgPool, now: DateTime<Utc>) -> Result<u64, Error> {
    let res = sqlx::query(
        "UPDATE enrollments SET status = 'cancelled', updated_at = $1 \
         WHERE status = 'active' AND expires_at <= $1",
    )
    .bind(now)
    .execute(pg)
    .await?;
    Ok(res.rows_affected())
}

pub fn spawn_expiry_sweep(pg: PgPool, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match expire_lapsed(&pg, Utc::now()).await {
                Ok(0) => log::debug!("Expiry sweep found nothing to cancel"),
                Ok(n) => log::info!("Expiry sweep cancelled {} enrollments", n),
                Err(err) => log::error!("Expiry sweep failed: {:?}", err),
            }
        }
    })
}

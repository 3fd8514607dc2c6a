pub mod catalog;
pub mod certificate;
pub mod config;
pub mod enrollment;
pub mod err;
pub mod forum;
pub mod io;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod payment;
pub mod reports;
pub mod state;
pub mod students;
pub mod sweep;

use std::sync::Arc;
use std::time::Duration;

use axum::handler::Handler;
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;

use crate::config::CONFIG;
use crate::err::{Error, Fine, Maybe, Nothing};
use crate::state::AppState;

pub type Payload<T> = Result<Maybe<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Fine(value))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok(Nothing(err))
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/students", post(students::register_student))
        .route("/students/:student", get(students::read_student))
        .route("/usernames/:username", get(students::query_student_id))
        .route("/courses", post(catalog::create_course))
        .route("/courses/:course", get(catalog::read_course))
        .route("/courses/:course/lessons", post(catalog::add_lesson))
        .route("/courses/:course/exams", post(catalog::add_exam))
        .route(
            "/courses/:course/questions",
            get(forum::list_questions).post(forum::ask_question),
        )
        .route("/questions/:question", get(forum::read_question))
        .route("/questions/:question/answers", post(forum::answer_question))
        .route(
            "/enrollments",
            post(enrollment::enroll).delete(enrollment::unenroll),
        )
        .route("/enrollments/:student", get(enrollment::list_enrollments))
        .route(
            "/enrollments/:student/:course",
            get(enrollment::read_enrollment),
        )
        .route(
            "/enrollments/:student/:course/certificate",
            get(enrollment::download_certificate),
        )
        .route("/progress/lesson", post(enrollment::watch_lesson))
        .route("/progress/exam", post(enrollment::submit_exam))
        .route("/reports/courses", get(reports::course_report))
        .fallback(err::handler404.into_service())
        .layer(Extension(state))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = &*CONFIG;
    if config.payment_secret.is_empty() {
        log::warn!("OPENCOURSE_PAYMENT_SECRET is empty, paid enrollments will be refused");
    }
    io::prepare_io(&config.certificate_dir).await?;

    let pg = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pg).await?;

    sweep::spawn_expiry_sweep(pg.clone(), Duration::from_secs(config.sweep_secs));

    let app = app(AppState::new(pg, config));
    log::info!("Starting OpenCourse HTTP Server on http://{}", config.addr);
    axum::Server::bind(&config.addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

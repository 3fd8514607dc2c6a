use std::sync::Arc;

use axum::extract::Path;
use axum::{Extension, Json};
use chrono::Utc;
use pbkdf2::password_hash::{PasswordHasher, SaltString};
use pbkdf2::Pbkdf2;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::err::is_unique_violation;
use crate::models::StudentData;
use crate::state::AppState;
use crate::{breaks, proceeds, Error, Payload};

pub async fn fetch_student(pg: &PgPool, uuid: Uuid) -> Result<StudentData, Error> {
    sqlx::query_as::<_, StudentData>("SELECT * FROM students WHERE uuid = $1 LIMIT 1")
        .bind(uuid)
        .fetch_optional(pg)
        .await?
        .ok_or_else(|| Error::UserDoesNotExist {
            message: format!("Student with uuid `{}` does not exist!", uuid),
        })
}

pub async fn read_student(
    Extension(state): Extension<Arc<AppState>>,
    Path(student): Path<Uuid>,
) -> Payload<StudentData> {
    proceeds(fetch_student(&state.pg, student).await?)
}

pub async fn query_student_id(
    Extension(state): Extension<Arc<AppState>>,
    Path(username): Path<String>,
) -> Payload<CreatedStudent> {
    if username.is_empty() {
        return breaks(Error::invalid("`username` parameter was empty"));
    }

    let user = sqlx::query_as::<_, StudentData>(
        "SELECT * FROM students WHERE username = $1 LIMIT 1",
    )
    .bind(&username)
    .fetch_optional(&state.pg)
    .await?;

    if let Some(user) = user {
        proceeds(CreatedStudent {
            student_id: user.uuid,
        })
    } else {
        breaks(Error::UserDoesNotExist {
            message: format!("User with name `{}` does not exist!", username),
        })
    }
}

pub async fn register_student(
    Extension(state): Extension<Arc<AppState>>,
    Json(student): Json<CreateStudent>,
) -> Payload<CreatedStudent> {
    if let Err(err) = student.validate() {
        return breaks(err);
    }

    let existing = sqlx::query_as::<_, StudentData>(
        "SELECT * FROM students WHERE username = $2 OR email = $1 LIMIT 1",
    )
    .bind(&student.email)
    .bind(&student.username)
    .fetch_optional(&state.pg)
    .await?;
    if existing.is_some() {
        return breaks(Error::UserAlreadyExists {
            message: "User with provided email/username already exists!".to_string(),
        });
    }

    let user = StudentData {
        uuid: Uuid::new_v4(),
        username: student.username,
        name: student.name,
        email: student.email,
        password_hash: Pbkdf2
            .hash_password(
                student.password.as_bytes(),
                &SaltString::generate(&mut OsRng),
            )?
            .to_string(),
        created_at: Utc::now(),
    };

    let res = sqlx::query("INSERT INTO students VALUES ($1, $2, $3, $4, $5, $6)")
        .bind(user.uuid)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&state.pg)
        .await
        .map_err(registration_error)?;

    if res.rows_affected() < 1 {
        return breaks(Error::InternalError {
            kind: "DatabaseError",
            message: "Could not save student to database!".to_string(),
        });
    }
    log::info!("Registered student {} ({})", user.username, user.uuid);
    proceeds(CreatedStudent {
        student_id: user.uuid,
    })
}

/// A concurrent registration can pass the lookup above and still lose on
/// the unique username/email constraint.
fn registration_error(err: sqlx::Error) -> Error {
    if is_unique_violation(&err) {
        Error::UserAlreadyExists {
            message: "User with provided email/username already exists!".to_string(),
        }
    } else {
        Error::from(err)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedStudent {
    pub student_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStudent {
    pub username: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

impl CreateStudent {
    fn validate(&self) -> Result<(), Error> {
        if self.username.trim().is_empty() || self.name.trim().is_empty() {
            return Err(Error::invalid("`username` and `name` are required"));
        }
        if !self.email.contains('@') {
            return Err(Error::invalid("`email` is not a valid address"));
        }
        if self.password.is_empty() {
            return Err(Error::invalid("Provided password was empty!"));
        }
        Ok(())
    }
}

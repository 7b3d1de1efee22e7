use axum::extract::Path;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::{authenticate, require_admin, TokenKeys};
use crate::credentials::{generate_password, CredentialStore};
use crate::models::{Event, Student};
use crate::{breaks, creates, proceeds, Error, Payload};

pub async fn find_student(
    pool: &SqlitePool,
    student_id: &str,
) -> Result<Option<Student>, Error> {
    sqlx::query_as::<_, Student>("SELECT * FROM students WHERE student_id = ? LIMIT 1")
        .bind(student_id)
        .fetch_optional(pool)
        .await
        .map_err(Error::from)
}

pub async fn student_exists(pool: &SqlitePool, student_id: &str) -> Result<bool, Error> {
    Ok(find_student(pool, student_id).await?.is_some())
}

pub async fn find_event(pool: &SqlitePool, event_id: &str) -> Result<Option<Event>, Error> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ? LIMIT 1")
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .map_err(Error::from)
}

pub async fn event_exists(pool: &SqlitePool, event_id: &str) -> Result<bool, Error> {
    Ok(find_event(pool, event_id).await?.is_some())
}

pub async fn list_all_events(pool: &SqlitePool) -> Result<Vec<Event>, Error> {
    sqlx::query_as::<_, Event>("SELECT * FROM events ORDER BY start_time")
        .fetch_all(pool)
        .await
        .map_err(Error::from)
}

// Registration writes the student row and its account row in one
// transaction; the generated plaintext is returned to the caller exactly
// once and only the ciphertext is stored.
pub async fn create_student(
    pool: &SqlitePool,
    credentials: &CredentialStore,
    body: &RegisterStudentRequest,
) -> Result<IssuedCredentials, Error> {
    let mut tx = pool.begin().await.map_err(Error::from)?;

    let existing =
        sqlx::query_as::<_, Student>("SELECT * FROM students WHERE student_id = ? LIMIT 1")
            .bind(&body.student_id)
            .fetch_optional(&mut tx)
            .await
            .map_err(Error::from)?;
    if existing.is_some() {
        return Err(Error::StudentAlreadyExists {
            message: "Student ID is already registered".to_string(),
        });
    }

    let password = generate_password(&body.firstname, &body.student_id, body.year);
    let encrypted = credentials.encrypt(&password).map_err(Error::from)?;
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO students
         (student_id, lastname, firstname, middlename, year, section, contact_number, gmail, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&body.student_id)
    .bind(&body.lastname)
    .bind(&body.firstname)
    .bind(&body.middlename)
    .bind(body.year)
    .bind(&body.section)
    .bind(&body.contact_number)
    .bind(&body.gmail)
    .bind(now)
    .execute(&mut tx)
    .await
    .map_err(Error::from)?;

    sqlx::query(
        "INSERT INTO student_accounts (student_id, username, password, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(&body.student_id)
    .bind(&body.student_id)
    .bind(&encrypted)
    .bind(now)
    .execute(&mut tx)
    .await
    .map_err(Error::from)?;

    tx.commit().await.map_err(Error::from)?;

    Ok(IssuedCredentials {
        username: body.student_id.clone(),
        password,
    })
}

pub async fn list_students_with_credentials(
    pool: &SqlitePool,
    credentials: &CredentialStore,
) -> Result<Vec<StudentEntry>, Error> {
    let rows = sqlx::query_as::<_, StudentAccountRow>(
        "SELECT s.student_id, s.lastname, s.firstname, s.middlename, s.year, s.section,
                s.contact_number, s.gmail, s.created_at, a.username, a.password
         FROM students s
         JOIN student_accounts a ON a.student_id = s.student_id
         ORDER BY s.lastname, s.firstname",
    )
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;

    let mut students = Vec::with_capacity(rows.len());
    for row in rows {
        let password = credentials.decrypt(&row.password).map_err(Error::from)?;
        students.push(StudentEntry {
            student: Student {
                student_id: row.student_id,
                lastname: row.lastname,
                firstname: row.firstname,
                middlename: row.middlename,
                year: row.year,
                section: row.section,
                contact_number: row.contact_number,
                gmail: row.gmail,
                created_at: row.created_at,
            },
            credentials: IssuedCredentials {
                username: row.username,
                password,
            },
        });
    }
    Ok(students)
}

pub async fn apply_student_update(
    pool: &SqlitePool,
    student_id: &str,
    body: &UpdateStudentRequest,
) -> Result<(), Error> {
    let res = sqlx::query(
        "UPDATE students
         SET lastname = ?, firstname = ?, middlename = ?, year = ?, section = ?,
             contact_number = ?, gmail = ?
         WHERE student_id = ?",
    )
    .bind(&body.lastname)
    .bind(&body.firstname)
    .bind(&body.middlename)
    .bind(body.year)
    .bind(&body.section)
    .bind(&body.contact_number)
    .bind(&body.gmail)
    .bind(student_id)
    .execute(pool)
    .await
    .map_err(Error::from)?;

    if res.rows_affected() < 1 {
        return Err(Error::StudentDoesNotExist {
            message: format!("Student with id `{}` does not exist!", student_id),
        });
    }
    Ok(())
}

pub async fn remove_student(pool: &SqlitePool, student_id: &str) -> Result<(), Error> {
    let mut tx = pool.begin().await.map_err(Error::from)?;

    sqlx::query("DELETE FROM student_accounts WHERE student_id = ?")
        .bind(student_id)
        .execute(&mut tx)
        .await
        .map_err(Error::from)?;

    let res = sqlx::query("DELETE FROM students WHERE student_id = ?")
        .bind(student_id)
        .execute(&mut tx)
        .await
        .map_err(Error::from)?;

    if res.rows_affected() < 1 {
        return Err(Error::StudentDoesNotExist {
            message: format!("Student with id `{}` does not exist!", student_id),
        });
    }

    tx.commit().await.map_err(Error::from)?;
    Ok(())
}

pub async fn create_event_record(
    pool: &SqlitePool,
    body: &CreateEventRequest,
) -> Result<Event, Error> {
    if body.name.is_empty() {
        return Err(Error::InvalidPayload {
            message: "`name` is required".to_string(),
        });
    }
    if body.end <= body.start {
        return Err(Error::InvalidPayload {
            message: "Event end must be after its start".to_string(),
        });
    }

    let event = Event {
        id: Uuid::new_v4().to_string(),
        name: body.name.clone(),
        description: body.description.clone(),
        start_time: body.start,
        end_time: body.end,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO events (id, name, description, start_time, end_time, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.id)
    .bind(&event.name)
    .bind(&event.description)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.created_at)
    .execute(pool)
    .await
    .map_err(Error::from)?;

    Ok(event)
}

pub async fn remove_event(pool: &SqlitePool, event_id: &str) -> Result<(), Error> {
    let res = sqlx::query("DELETE FROM events WHERE id = ?")
        .bind(event_id)
        .execute(pool)
        .await
        .map_err(Error::from)?;

    if res.rows_affected() < 1 {
        return Err(Error::EventDoesNotExist {
            message: format!("Event with id `{}` does not exist!", event_id),
        });
    }
    Ok(())
}

pub async fn register_student(
    Json(body): Json<RegisterStudentRequest>,
    Extension(pool): Extension<SqlitePool>,
    Extension(credentials): Extension<CredentialStore>,
) -> Payload<RegisteredStudent> {
    if let Err(err) = validate_student_fields(
        &body.student_id,
        &body.firstname,
        &body.lastname,
        &body.section,
        &body.contact_number,
        &body.gmail,
        body.year,
    ) {
        return breaks(err);
    }

    let issued = match create_student(&pool, &credentials, &body).await {
        Ok(issued) => issued,
        Err(err) => return breaks(err),
    };

    creates(RegisteredStudent {
        message: "Student registered successfully".to_string(),
        credentials: issued,
    })
}

pub async fn list_students(
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(credentials): Extension<CredentialStore>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<StudentList> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    if let Err(err) = require_admin(&claims) {
        return breaks(err);
    }

    let students = match list_students_with_credentials(&pool, &credentials).await {
        Ok(students) => students,
        Err(err) => return breaks(err),
    };
    proceeds(StudentList { students })
}

pub async fn get_student(
    Path(student_id): Path<String>,
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<Student> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    if let Err(err) = require_admin(&claims) {
        return breaks(err);
    }

    let student = match find_student(&pool, &student_id).await {
        Ok(student) => student,
        Err(err) => return breaks(err),
    };
    let student = if let Some(student) = student {
        student
    } else {
        return breaks(Error::StudentDoesNotExist {
            message: format!("Student with id `{}` does not exist!", student_id),
        });
    };

    proceeds(student)
}

pub async fn update_student(
    Path(student_id): Path<String>,
    Json(body): Json<UpdateStudentRequest>,
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<StudentUpdated> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    if let Err(err) = require_admin(&claims) {
        return breaks(err);
    }

    if let Err(err) = validate_student_fields(
        &student_id,
        &body.firstname,
        &body.lastname,
        &body.section,
        &body.contact_number,
        &body.gmail,
        body.year,
    ) {
        return breaks(err);
    }

    if let Err(err) = apply_student_update(&pool, &student_id, &body).await {
        return breaks(err);
    }

    proceeds(StudentUpdated {
        message: "Student updated successfully".to_string(),
    })
}

pub async fn delete_student(
    Path(student_id): Path<String>,
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<StudentDeleted> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    if let Err(err) = require_admin(&claims) {
        return breaks(err);
    }

    if let Err(err) = remove_student(&pool, &student_id).await {
        return breaks(err);
    }

    proceeds(StudentDeleted {
        message: "Student deleted successfully".to_string(),
    })
}

pub async fn list_events(
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<EventList> {
    if let Err(err) = authenticate(&headers, &keys) {
        return breaks(err);
    }

    let events = match list_all_events(&pool).await {
        Ok(events) => events,
        Err(err) => return breaks(err),
    };
    proceeds(EventList { events })
}

pub async fn create_event(
    Json(body): Json<CreateEventRequest>,
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<Event> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    if let Err(err) = require_admin(&claims) {
        return breaks(err);
    }

    let event = match create_event_record(&pool, &body).await {
        Ok(event) => event,
        Err(err) => return breaks(err),
    };
    creates(event)
}

pub async fn delete_event(
    Path(event_id): Path<String>,
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<EventDeleted> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    if let Err(err) = require_admin(&claims) {
        return breaks(err);
    }

    if let Err(err) = remove_event(&pool, &event_id).await {
        return breaks(err);
    }

    proceeds(EventDeleted {
        message: "Event deleted successfully".to_string(),
    })
}

fn validate_student_fields(
    student_id: &str,
    firstname: &str,
    lastname: &str,
    section: &str,
    contact_number: &str,
    gmail: &str,
    year: i64,
) -> Result<(), Error> {
    if student_id.is_empty()
        || firstname.is_empty()
        || lastname.is_empty()
        || section.is_empty()
        || contact_number.is_empty()
        || gmail.is_empty()
    {
        return Err(Error::InvalidPayload {
            message: "Missing required student fields".to_string(),
        });
    }
    if !(1..=4).contains(&year) {
        return Err(Error::InvalidPayload {
            message: "`year` must be between 1 and 4".to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StudentAccountRow {
    student_id: String,
    lastname: String,
    firstname: String,
    middlename: Option<String>,
    year: i64,
    section: String,
    contact_number: String,
    gmail: String,
    created_at: DateTime<Utc>,
    username: String,
    password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStudentRequest {
    pub student_id: String,
    pub lastname: String,
    pub firstname: String,
    pub middlename: Option<String>,
    pub year: i64,
    pub section: String,
    pub contact_number: String,
    pub gmail: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStudentRequest {
    pub lastname: String,
    pub firstname: String,
    pub middlename: Option<String>,
    pub year: i64,
    pub section: String,
    pub contact_number: String,
    pub gmail: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredStudent {
    message: String,
    credentials: IssuedCredentials,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentEntry {
    #[serde(flatten)]
    pub student: Student,
    pub credentials: IssuedCredentials,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentList {
    students: Vec<StudentEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentUpdated {
    message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentDeleted {
    message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventList {
    events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDeleted {
    message: String,
}

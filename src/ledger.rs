use axum::extract::Path;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::auth::{authenticate, require_admin, TokenKeys, UserType};
use crate::directory;
use crate::models::AttendanceRecord;
use crate::{breaks, creates, proceeds, Error, Payload};

// One attendance session per (student, event): a record is "open" while its
// check_out_time is still null, and a student may hold at most one open
// record per event at a time.

pub async fn find_open_record(
    pool: &SqlitePool,
    student_id: &str,
    event_id: &str,
) -> Result<Option<AttendanceRecord>, Error> {
    sqlx::query_as::<_, AttendanceRecord>(
        "SELECT * FROM attendance_records
         WHERE student_id = ? AND event_id = ? AND check_out_time IS NULL
         LIMIT 1",
    )
    .bind(student_id)
    .bind(event_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)
}

pub async fn record_check_in(
    pool: &SqlitePool,
    student_id: &str,
    event_id: &str,
) -> Result<DateTime<Utc>, Error> {
    let student = match directory::find_student(pool, student_id).await? {
        Some(student) => student,
        None => {
            return Err(Error::StudentDoesNotExist {
                message: format!("Student with id `{}` does not exist!", student_id),
            })
        }
    };

    let open = find_open_record(pool, student_id, event_id).await?;
    if open.is_some() {
        return Err(Error::AlreadyCheckedIn {
            message: "Student is already checked in for this event".to_string(),
        });
    }

    // the name fields are copied into the record so the log keeps the name
    // the student had at check-in time
    let check_in_time = Utc::now();
    sqlx::query(
        "INSERT INTO attendance_records
         (student_id, event_id, firstname, middlename, lastname, year, check_in_time)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(student_id)
    .bind(event_id)
    .bind(&student.firstname)
    .bind(&student.middlename)
    .bind(&student.lastname)
    .bind(student.year)
    .bind(check_in_time)
    .execute(pool)
    .await
    .map_err(Error::from)?;

    Ok(check_in_time)
}

pub async fn record_check_out(
    pool: &SqlitePool,
    student_id: &str,
    event_id: &str,
) -> Result<DateTime<Utc>, Error> {
    let check_out_time = Utc::now();
    let res = sqlx::query(
        "UPDATE attendance_records SET check_out_time = ?
         WHERE student_id = ? AND event_id = ? AND check_out_time IS NULL",
    )
    .bind(check_out_time)
    .bind(student_id)
    .bind(event_id)
    .execute(pool)
    .await
    .map_err(Error::from)?;

    if res.rows_affected() < 1 {
        return Err(Error::NotCheckedIn {
            message: "Student has no open check-in for this event".to_string(),
        });
    }

    Ok(check_out_time)
}

pub async fn list_records(pool: &SqlitePool) -> Result<Vec<AttendanceRecord>, Error> {
    sqlx::query_as::<_, AttendanceRecord>(
        "SELECT * FROM attendance_records ORDER BY check_in_time DESC",
    )
    .fetch_all(pool)
    .await
    .map_err(Error::from)
}

pub async fn records_for_event(
    pool: &SqlitePool,
    event_id: &str,
) -> Result<Vec<AttendanceRecord>, Error> {
    sqlx::query_as::<_, AttendanceRecord>(
        "SELECT * FROM attendance_records WHERE event_id = ? ORDER BY check_in_time DESC",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from)
}

pub async fn records_for_student(
    pool: &SqlitePool,
    student_id: &str,
) -> Result<Vec<AttendanceRecord>, Error> {
    sqlx::query_as::<_, AttendanceRecord>(
        "SELECT * FROM attendance_records WHERE student_id = ? ORDER BY check_in_time DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from)
}

pub async fn check_in(
    Json(body): Json<CheckRequest>,
    Extension(pool): Extension<SqlitePool>,
) -> Payload<CheckedIn> {
    if body.student_id.is_empty() || body.event_id.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`studentId` and `eventId` are required".to_string(),
        });
    }

    let check_in_time = match record_check_in(&pool, &body.student_id, &body.event_id).await {
        Ok(time) => time,
        Err(err) => return breaks(err),
    };

    creates(CheckedIn {
        message: "Checked in successfully".to_string(),
        check_in_time,
    })
}

pub async fn check_out(
    Json(body): Json<CheckRequest>,
    Extension(pool): Extension<SqlitePool>,
) -> Payload<CheckedOut> {
    if body.student_id.is_empty() || body.event_id.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`studentId` and `eventId` are required".to_string(),
        });
    }

    let check_out_time = match record_check_out(&pool, &body.student_id, &body.event_id).await {
        Ok(time) => time,
        Err(err) => return breaks(err),
    };

    proceeds(CheckedOut {
        message: "Checked out successfully".to_string(),
        check_out_time,
    })
}

pub async fn list_attendance(
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<AttendanceList> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    if let Err(err) = require_admin(&claims) {
        return breaks(err);
    }

    let records = match list_records(&pool).await {
        Ok(records) => records,
        Err(err) => return breaks(err),
    };
    proceeds(AttendanceList { records })
}

pub async fn attendance_for_event(
    Path(event_id): Path<String>,
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<AttendanceList> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    if let Err(err) = require_admin(&claims) {
        return breaks(err);
    }

    match directory::event_exists(&pool, &event_id).await {
        Ok(true) => {}
        Ok(false) => {
            return breaks(Error::EventDoesNotExist {
                message: format!("Event with id `{}` does not exist!", event_id),
            })
        }
        Err(err) => return breaks(err),
    }

    let records = match records_for_event(&pool, &event_id).await {
        Ok(records) => records,
        Err(err) => return breaks(err),
    };
    proceeds(AttendanceList { records })
}

pub async fn attendance_for_student(
    Path(student_id): Path<String>,
    headers: HeaderMap,
    Extension(pool): Extension<SqlitePool>,
    Extension(keys): Extension<TokenKeys>,
) -> Payload<AttendanceList> {
    let claims = match authenticate(&headers, &keys) {
        Ok(claims) => claims,
        Err(err) => return breaks(err),
    };
    // students may read their own history, everything else is admin-only
    if claims.user_type != UserType::Admin && claims.id != student_id {
        return breaks(Error::AuthenticationFailure {
            message: "Cannot view another student's attendance".to_string(),
        });
    }

    match directory::student_exists(&pool, &student_id).await {
        Ok(true) => {}
        Ok(false) => {
            return breaks(Error::StudentDoesNotExist {
                message: format!("Student with id `{}` does not exist!", student_id),
            })
        }
        Err(err) => return breaks(err),
    }

    let records = match records_for_student(&pool, &student_id).await {
        Ok(records) => records,
        Err(err) => return breaks(err),
    };
    proceeds(AttendanceList { records })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub student_id: String,
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedIn {
    message: String,
    check_in_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedOut {
    message: String,
    check_out_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceList {
    records: Vec<AttendanceRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn test_pool() -> SqlitePool {
        // a single connection keeps every query on the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_student(pool: &SqlitePool, student_id: &str, firstname: &str) {
        sqlx::query(
            "INSERT INTO students
             (student_id, lastname, firstname, middlename, year, section, contact_number, gmail, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(student_id)
        .bind("Reyes")
        .bind(firstname)
        .bind(Option::<String>::None)
        .bind(2i64)
        .bind("A")
        .bind("09170000000")
        .bind("student@gmail.com")
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn check_in_then_check_out_closes_the_record() {
        let pool = test_pool().await;
        seed_student(&pool, "S1", "Juan").await;

        let checked_in = record_check_in(&pool, "S1", "E1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let checked_out = record_check_out(&pool, "S1", "E1").await.unwrap();

        let records = records_for_student(&pool, "S1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].check_in_time, checked_in);
        assert_eq!(records[0].check_out_time, Some(checked_out));
        assert!(records[0].check_in_time < records[0].check_out_time.unwrap());
    }

    #[tokio::test]
    async fn double_check_in_is_rejected() {
        let pool = test_pool().await;
        seed_student(&pool, "S1", "Juan").await;

        record_check_in(&pool, "S1", "E1").await.unwrap();
        let second = record_check_in(&pool, "S1", "E1").await;
        assert!(matches!(second, Err(Error::AlreadyCheckedIn { .. })));

        let records = records_for_student(&pool, "S1").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn check_in_is_allowed_again_after_check_out() {
        let pool = test_pool().await;
        seed_student(&pool, "S1", "Juan").await;

        record_check_in(&pool, "S1", "E1").await.unwrap();
        record_check_out(&pool, "S1", "E1").await.unwrap();
        record_check_in(&pool, "S1", "E1").await.unwrap();

        let records = records_for_student(&pool, "S1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records.iter().filter(|r| r.check_out_time.is_none()).count(),
            1
        );
    }

    #[tokio::test]
    async fn check_out_without_open_record_fails() {
        let pool = test_pool().await;
        seed_student(&pool, "S1", "Juan").await;

        let result = record_check_out(&pool, "S1", "E1").await;
        assert!(matches!(result, Err(Error::NotCheckedIn { .. })));
    }

    #[tokio::test]
    async fn check_in_requires_a_registered_student() {
        let pool = test_pool().await;

        let result = record_check_in(&pool, "missing", "E1").await;
        assert!(matches!(result, Err(Error::StudentDoesNotExist { .. })));
    }

    #[tokio::test]
    async fn snapshot_keeps_the_name_at_check_in_time() {
        let pool = test_pool().await;
        seed_student(&pool, "S1", "Juan").await;

        record_check_in(&pool, "S1", "E1").await.unwrap();
        sqlx::query("UPDATE students SET firstname = ? WHERE student_id = ?")
            .bind("Renamed")
            .bind("S1")
            .execute(&pool)
            .await
            .unwrap();

        let records = records_for_student(&pool, "S1").await.unwrap();
        assert_eq!(records[0].firstname, "Juan");
    }

    #[tokio::test]
    async fn event_listing_filters_by_event() {
        let pool = test_pool().await;
        seed_student(&pool, "S1", "Juan").await;
        seed_student(&pool, "S2", "Maria").await;

        record_check_in(&pool, "S1", "E1").await.unwrap();
        record_check_in(&pool, "S2", "E1").await.unwrap();
        record_check_in(&pool, "S1", "E2").await.unwrap();

        let records = records_for_event(&pool, "E1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.event_id == "E1"));
    }

    #[tokio::test]
    async fn open_records_are_independent_per_event() {
        let pool = test_pool().await;
        seed_student(&pool, "S1", "Juan").await;

        record_check_in(&pool, "S1", "E1").await.unwrap();
        // a different event is a separate attendance session
        record_check_in(&pool, "S1", "E2").await.unwrap();

        assert!(find_open_record(&pool, "S1", "E1").await.unwrap().is_some());
        assert!(find_open_record(&pool, "S1", "E2").await.unwrap().is_some());
    }
}

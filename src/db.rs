use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    log::info!("Running database migrations...");

    create_students_table(pool).await?;
    create_student_accounts_table(pool).await?;
    create_admins_table(pool).await?;
    create_events_table(pool).await?;
    create_attendance_records_table(pool).await?;

    log::info!("Database migrations completed");
    Ok(())
}

async fn create_students_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            student_id TEXT PRIMARY KEY,
            lastname TEXT NOT NULL,
            firstname TEXT NOT NULL,
            middlename TEXT,
            year INTEGER NOT NULL,
            section TEXT NOT NULL,
            contact_number TEXT NOT NULL,
            gmail TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_student_accounts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS student_accounts (
            student_id TEXT PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            password TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (student_id) REFERENCES students (student_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_admins_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS admins (
            id INTEGER PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            start_time DATETIME NOT NULL,
            end_time DATETIME NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_attendance_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_records (
            id INTEGER PRIMARY KEY,
            student_id TEXT NOT NULL,
            event_id TEXT NOT NULL,
            firstname TEXT NOT NULL,
            middlename TEXT,
            lastname TEXT NOT NULL,
            year INTEGER NOT NULL,
            check_in_time DATETIME NOT NULL,
            check_out_time DATETIME
        )
        "#,
    )
    .execute(pool)
    .await?;

    // store-level backstop: at most one open check-in per (student, event)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_open
        ON attendance_records (student_id, event_id)
        WHERE check_out_time IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub mod auth;
pub mod config;
pub mod credentials;
pub mod db;
pub mod directory;
pub mod err;
pub mod ledger;
pub mod models;

use axum::handler::Handler;
use axum::http::{StatusCode, Uri};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::auth::TokenKeys;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::err::{Error, Fine, Maybe, Nothing};

pub type Payload<T> = Result<(StatusCode, Json<Maybe<T>>), Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok((StatusCode::OK, Json(Fine(value))))
}

pub fn creates<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok((StatusCode::CREATED, Json(Fine(value))))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok((err.status(), Json(Nothing(err))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env()?;

    let pool = db::connect(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let credentials = CredentialStore::new(&config.secret_key)?;
    let keys = TokenKeys::new(config.jwt_secret.clone());

    let app = Router::new()
        .route("/login", post(auth::login))
        .route("/registerAdmin", post(auth::register_admin))
        .route("/registerStudent", post(directory::register_student))
        .route("/students", get(directory::list_students))
        .route(
            "/students/:student_id",
            get(directory::get_student)
                .put(directory::update_student)
                .delete(directory::delete_student),
        )
        .route(
            "/events",
            get(directory::list_events).post(directory::create_event),
        )
        .route("/events/:event_id", delete(directory::delete_event))
        .route("/checkin", post(ledger::check_in))
        .route("/checkout", post(ledger::check_out))
        .route("/attendance", get(ledger::list_attendance))
        .route("/attendance/event/:event_id", get(ledger::attendance_for_event))
        .route(
            "/attendance/student/:student_id",
            get(ledger::attendance_for_student),
        )
        .fallback(err::handler404.into_service())
        // the SPA frontend is served from another origin
        .layer(CorsLayer::permissive())
        .layer(Extension(pool))
        .layer(Extension(credentials))
        .layer(Extension(keys));

    log::info!("Starting CodeTrace HTTP server on http://{}", config.bind_addr);
    axum::Server::bind(&config.bind_addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

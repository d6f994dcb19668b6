use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use people_api::{ApiError, ApiResult, PeopleApi};
use people_core::{ContactDetails, Page, Person};
use people_enrichment::{
    http_enricher, EnrichmentConfig, DEFAULT_AGIFY_URL, DEFAULT_GENDERIZE_URL,
    DEFAULT_NATIONALIZE_URL,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const USER_NOT_FOUND: &str = "User not found";

#[derive(Debug, Clone)]
struct ServiceState {
    api: PeopleApi,
}

#[derive(Debug, Clone, Serialize)]
struct UserEnvelope {
    message: &'static str,
    user: Person,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "people-service")]
#[command(about = "HTTP service for enriched people records")]
struct Args {
    #[arg(long, default_value = "./database.db")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
    #[arg(long, default_value = DEFAULT_AGIFY_URL)]
    agify_url: String,
    #[arg(long, default_value = DEFAULT_GENDERIZE_URL)]
    genderize_url: String,
    #[arg(long, default_value = DEFAULT_NATIONALIZE_URL)]
    nationalize_url: String,
    /// Connect, read and write timeout applied to every provider call.
    #[arg(long, default_value_t = 5_000, value_parser = clap::value_parser!(u64).range(1..))]
    provider_timeout_ms: u64,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, error: message.into() }
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound(detail) => {
                tracing::debug!(%detail, "user lookup missed");
                Self::new(StatusCode::NOT_FOUND, USER_NOT_FOUND)
            }
            ApiError::Enrichment(err) => {
                tracing::warn!(provider = err.provider(), error = %err, "enrichment provider failed");
                Self::new(StatusCode::BAD_GATEWAY, "enrichment provider failed")
            }
            ApiError::Store(err) => {
                tracing::error!(error = %format!("{err:#}"), "store operation failed");
                Self::internal()
            }
        }
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users/by-first-name/:first_name", get(user_by_first_name))
        .route("/users/", get(list_users).post(create_user))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:user_id", get(get_user).put(update_user))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let enricher = http_enricher(&EnrichmentConfig {
        agify_url: args.agify_url,
        genderize_url: args.genderize_url,
        nationalize_url: args.nationalize_url,
        timeout: Duration::from_millis(args.provider_timeout_ms),
    });
    let api = PeopleApi::new(args.db, enricher);
    let migration = api.migrate()?;
    tracing::info!(
        schema_version = migration.to_version,
        applied = ?migration.versions,
        adopted_legacy_table = migration.adopted_legacy_table,
        "database ready"
    );

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "people service listening");
    axum::serve(listener, app(ServiceState { api })).await?;
    Ok(())
}

/// Run one facade call off the async runtime; store and provider I/O both block.
async fn run_api<T, F>(state: &ServiceState, call: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce(&PeopleApi) -> ApiResult<T> + Send + 'static,
{
    let api = state.api.clone();
    match tokio::task::spawn_blocking(move || call(&api)).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(err) => {
            tracing::error!(error = %err, "api task did not complete");
            Err(ServiceError::internal())
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn user_by_first_name(
    State(state): State<ServiceState>,
    Path(first_name): Path<String>,
) -> Result<Json<Person>, ServiceError> {
    let person = run_api(&state, move |api| api.user_by_name_prefix(&first_name)).await?;
    Ok(Json(person))
}

async fn list_users(
    State(state): State<ServiceState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Person>>, ServiceError> {
    let people = run_api(&state, move |api| api.list_users(page)).await?;
    Ok(Json(people))
}

async fn create_user(
    State(state): State<ServiceState>,
    Json(contact): Json<ContactDetails>,
) -> Result<Json<UserEnvelope>, ServiceError> {
    let user = run_api(&state, move |api| api.create_user(contact)).await?;
    Ok(Json(UserEnvelope { message: "User created successfully", user }))
}

async fn get_user(
    State(state): State<ServiceState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Person>, ServiceError> {
    let person = run_api(&state, move |api| api.get_user(user_id)).await?;
    Ok(Json(person))
}

async fn update_user(
    State(state): State<ServiceState>,
    Path(user_id): Path<i64>,
    Json(contact): Json<ContactDetails>,
) -> Result<Json<UserEnvelope>, ServiceError> {
    let user = run_api(&state, move |api| api.update_user(user_id, contact)).await?;
    Ok(Json(UserEnvelope { message: "User updated successfully", user }))
}

/**
 * API REST CATALOG - Chemin synchrone d'enregistrement + requêtes
 *
 * RÔLE :
 * Expose le Catalog aux autres composants (convertisseurs, smart home,
 * réveil, bot Telegram) : découverte du broker, lecture et ajout de
 * devices / services / users.
 *
 * FONCTIONNEMENT :
 * - Un chemin par opération (getDevice, addDevice, ...), comme attendu par les clients existants
 * - Paramètres validés séparément pour chaque route (mauvais nombre/nom => 400)
 * - PUT add* : parse + validation avant toute mutation, puis upsert + snapshot avant de répondre
 * - Réponses d'erreur toujours {"result":"failure","reason":...}
 */

use crate::error::CatalogError;
use crate::health::{CatalogHealth, HealthTracker};
use crate::models::{parse_device, parse_service, parse_user, BrokerConfig, Device, Registered, Service, User};
use crate::state::SharedCatalog;
use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

type Params = HashMap<String, String>;

#[derive(Clone)]
pub struct AppState {
    pub catalog: SharedCatalog,
    pub health_tracker: HealthTracker,
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let status = match &self {
            CatalogError::MalformedRecord(_) | CatalogError::BadParameters(_) => StatusCode::BAD_REQUEST,
            CatalogError::NotFound { .. } => StatusCode::NOT_FOUND,
            CatalogError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(failure(&self.to_string()))).into_response()
    }
}

fn failure(reason: &str) -> Value {
    json!({ "result": "failure", "reason": reason })
}

fn success() -> Json<Value> {
    Json(json!({ "result": "success" }))
}

fn no_params(params: &Params) -> Result<(), CatalogError> {
    if !params.is_empty() {
        return Err(CatalogError::BadParameters("Too many parameters".into()));
    }
    Ok(())
}

fn id_param(params: &Params) -> Result<&str, CatalogError> {
    match params.get("id") {
        Some(id) if params.len() == 1 => Ok(id),
        _ => Err(CatalogError::BadParameters("Wrong parameters".into())),
    }
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let res = next.run(req).await;
    debug!(%method, %path, status = res.status().as_u16(), "request");
    res
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/getMQTTMessageBroker", get(get_broker))
        .route("/getUser", get(get_user))
        .route("/getUsers", get(get_users))
        .route("/getDevice", get(get_device))
        .route("/getDevices", get(get_devices))
        .route("/getService", get(get_service))
        .route("/getServices", get(get_services))
        .route("/addDevice", put(add_device))
        .route("/addService", put(add_service))
        .route("/addUser", put(add_user))
        .route("/removeUser", delete(remove_user))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(app_state)
        .layer(middleware::from_fn(log_request))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(failure("Not Found")))
}

async fn method_not_allowed() -> (StatusCode, Json<Value>) {
    (StatusCode::METHOD_NOT_ALLOWED, Json(failure("Method Not Allowed")))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<CatalogHealth> {
    Json(app.health_tracker.get_health(&app.catalog))
}

// GET /getMQTTMessageBroker
async fn get_broker(
    State(app): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<BrokerConfig>, CatalogError> {
    no_params(&params)?;
    Ok(Json(app.catalog.get_broker()))
}

// GET /getUser?id=
async fn get_user(State(app): State<AppState>, Query(params): Query<Params>) -> Result<Json<User>, CatalogError> {
    let id = id_param(&params)?;
    Ok(Json(app.catalog.get_user(id)?))
}

// GET /getUsers
async fn get_users(State(app): State<AppState>, Query(params): Query<Params>) -> Result<Json<Vec<User>>, CatalogError> {
    no_params(&params)?;
    Ok(Json(app.catalog.list_users()))
}

// GET /getDevice?id=
async fn get_device(
    State(app): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Registered<Device>>, CatalogError> {
    let id = id_param(&params)?;
    Ok(Json(app.catalog.get_device(id)?))
}

// GET /getDevices
async fn get_devices(
    State(app): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<Registered<Device>>>, CatalogError> {
    no_params(&params)?;
    Ok(Json(app.catalog.list_devices()))
}

// GET /getService?id=
async fn get_service(
    State(app): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Registered<Service>>, CatalogError> {
    let id = id_param(&params)?;
    Ok(Json(app.catalog.get_service(id)?))
}

// GET /getServices
async fn get_services(
    State(app): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<Registered<Service>>>, CatalogError> {
    no_params(&params)?;
    Ok(Json(app.catalog.list_services()))
}

// PUT /addDevice
async fn add_device(State(app): State<AppState>, body: Bytes) -> Result<Json<Value>, CatalogError> {
    app.catalog.register_device(parse_device(&body)?)?;
    Ok(success())
}

// PUT /addService
async fn add_service(State(app): State<AppState>, body: Bytes) -> Result<Json<Value>, CatalogError> {
    app.catalog.register_service(parse_service(&body)?)?;
    Ok(success())
}

// PUT /addUser
async fn add_user(State(app): State<AppState>, body: Bytes) -> Result<Json<Value>, CatalogError> {
    app.catalog.register_user(parse_user(&body)?)?;
    Ok(success())
}

// DELETE /removeUser?id=
async fn remove_user(State(app): State<AppState>, Query(params): Query<Params>) -> Result<Json<Value>, CatalogError> {
    let id = id_param(&params)?;
    app.catalog.unregister_user(id)?;
    Ok(success())
}

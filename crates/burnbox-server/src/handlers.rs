use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::CallerIdentity,
    store::{unix_now, NewSharedSecret, SharedSecretView, StoreError},
    AppState,
};

// ── Response shapes ──────────────────────────────────────────────────────────

/// One row of the owner's listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SharedSecretItem {
    pub id: Uuid,
    pub owner_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub single_use: bool,
    pub expired: bool,
    pub data: Option<String>,
}

impl From<SharedSecretView> for SharedSecretItem {
    fn from(view: SharedSecretView) -> Self {
        Self {
            id: view.id,
            expired: view.is_expired(),
            data: view.data().map(str::to_owned),
            owner_id: view.owner_id,
            created_at: view.created_at,
            expires_at: view.expires_at,
            single_use: view.single_use,
        }
    }
}

/// Anonymous point-read. Only ever sent for live records, so `expired` is
/// always false and `data` always present; the owner id is withheld.
#[derive(Debug, Serialize, Deserialize)]
pub struct SharedSecretBody {
    pub id: Uuid,
    pub expires_at: i64,
    pub single_use: bool,
    pub expired: bool,
    pub data: String,
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── List ──────────────────────────────────────────────────────────────────────

pub async fn list_shared_secrets(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> Response {
    match state.store.list_by_owner(caller.owner_id(), unix_now()) {
        Ok(views) => {
            info!(owner = %caller.owner_id(), count = views.len(), "audit: secret.list");
            let items: Vec<SharedSecretItem> = views.into_iter().map(Into::into).collect();
            Json(items).into_response()
        }
        Err(e) => store_error(e),
    }
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub data: String,
    /// Absolute Unix timestamp (seconds).
    pub expires_at: i64,
    pub single_use: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub id: Uuid,
}

pub async fn create_shared_secret(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let new = NewSharedSecret {
        owner_id: caller.owner_id().to_owned(),
        data: body.data,
        expires_at: body.expires_at,
        single_use: body.single_use,
    };

    match state.store.create(new, unix_now()) {
        Ok(id) => {
            info!(
                id = %id,
                owner = %caller.owner_id(),
                expires_at = body.expires_at,
                single_use = body.single_use,
                "audit: secret.create"
            );
            (StatusCode::CREATED, Json(CreateResponse { id })).into_response()
        }
        Err(e) => store_error(e),
    }
}

// ── Get ───────────────────────────────────────────────────────────────────────

/// Public point-read. Malformed, unknown, expired and consumed ids all produce
/// the same 404 so callers cannot tell them apart.
pub async fn get_shared_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return not_found();
    };

    match state.store.get_by_id(id, unix_now()) {
        Ok(view) => {
            let body = match view.data() {
                Some(data) => SharedSecretBody {
                    id: view.id,
                    expires_at: view.expires_at,
                    single_use: view.single_use,
                    expired: false,
                    data: data.to_owned(),
                },
                None => {
                    info!(id = %id, "audit: secret.read.expired");
                    return not_found();
                }
            };
            info!(id = %id, single_use = view.single_use, "audit: secret.read");
            Json(body).into_response()
        }
        Err(StoreError::NotFound) => not_found(),
        Err(e) => store_error(e),
    }
}

// ── Expire ────────────────────────────────────────────────────────────────────

pub async fn expire_shared_secret(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "id must be a UUID"})),
        )
            .into_response();
    };

    match state.store.expire_by_id(id, caller.owner_id()) {
        Ok(matched) => {
            info!(id = %id, owner = %caller.owner_id(), matched, "audit: secret.expire");
            Json(json!({"success": true})).into_response()
        }
        Err(e) => store_error(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not found or expired"})),
    )
        .into_response()
}

/// Malformed or incomplete JSON keeps axum's status but gets our error shape.
fn bad_body(rejection: JsonRejection) -> Response {
    (
        rejection.status(),
        Json(json!({"error": rejection.body_text()})),
    )
        .into_response()
}

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
        }
        StoreError::NotFound => not_found(),
        StoreError::Internal(e) => internal_error(e),
    }
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

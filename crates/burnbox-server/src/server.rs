use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::require_identity,
    config::{resolve_data_dir, ServerConfig},
    handlers::{
        create_shared_secret, expire_shared_secret, get_shared_secret, health,
        list_shared_secrets,
    },
    store::{Store, MAX_PAYLOAD_BYTES},
    AppState,
};

/// Headroom over the payload cap for the JSON envelope around it.
const BODY_LIMIT: usize = MAX_PAYLOAD_BYTES + 64 * 1024;

/// Build the HTTP surface over `state`.
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    // Public routes (no identity required).
    let public = Router::new()
        .route("/health", get(health))
        .route("/secret-sharing/{id}", get(get_shared_secret));

    // Owner routes.
    let protected = Router::new()
        .route(
            "/secret-sharing",
            get(list_shared_secrets).post(create_shared_secret),
        )
        .route("/secret-sharing/expire/{id}", patch(expire_shared_secret))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_identity,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_deref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let db_path = data_dir.join("burnbox.db");
    let store = Store::open(&db_path).context("open store")?;

    if cfg.retention_days > 0 {
        let retention_secs = cfg.retention_secs()?;
        store
            .clone()
            .spawn_retention_sweep(cfg.sweep_interval, retention_secs);
        info!(retention_days = cfg.retention_days, "retention sweep enabled");
    }

    let tokens = cfg.load_tokens()?;
    info!(owners = tokens.len(), "loaded owner tokens");

    let state = AppState {
        store,
        identity: Arc::new(tokens),
    };
    let app = router(state, build_cors(cfg.cors_origins.as_deref()));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "burnbox server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

pub fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PATCH,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::StaticTokens;
    use crate::store::{unix_now, NewSharedSecret};

    const ALICE: &str = "alice-token";
    const BOB: &str = "bob-token";

    fn make_app() -> (Router, Store, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        let tokens = StaticTokens::parse(&format!("alice:{ALICE},bob:{BOB}")).unwrap();
        let state = AppState {
            store: store.clone(),
            identity: Arc::new(tokens),
        };
        (router(state, build_cors(None)), store, dir)
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        match body {
            Some(b) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create(app: &Router, data: &str, single_use: bool) -> String {
        let body = json!({
            "data": data,
            "expires_at": unix_now() + 3600,
            "single_use": single_use,
        });
        let (status, json) = send(app, request(Method::POST, "/secret-sharing", Some(ALICE), Some(body))).await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _store, _dir) = make_app();
        let (status, json) = send(&app, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn owner_routes_require_token() {
        let (app, _store, _dir) = make_app();
        let (status, _) = send(&app, request(Method::GET, "/secret-sharing", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(
            &app,
            request(Method::GET, "/secret-sharing", Some("wrong"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn single_use_secret_is_readable_once_anonymously() {
        let (app, _store, _dir) = make_app();
        let id = create(&app, "blob", true).await;
        let uri = format!("/secret-sharing/{id}");

        let (status, json) = send(&app, request(Method::GET, &uri, None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"], "blob");
        assert_eq!(json["expired"], false);
        assert!(json.get("owner_id").is_none());

        let (status, json) = send(&app, request(Method::GET, &uri, None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not found or expired");
    }

    #[tokio::test]
    async fn missing_and_malformed_ids_look_like_expired() {
        let (app, _store, _dir) = make_app();
        let unknown = format!("/secret-sharing/{}", uuid::Uuid::new_v4());
        let (s1, j1) = send(&app, request(Method::GET, &unknown, None, None)).await;
        let (s2, j2) = send(&app, request(Method::GET, "/secret-sharing/not-a-uuid", None, None)).await;
        assert_eq!(s1, StatusCode::NOT_FOUND);
        assert_eq!(s2, StatusCode::NOT_FOUND);
        assert_eq!(j1, j2);
    }

    #[tokio::test]
    async fn create_validation_errors_are_bad_requests() {
        let (app, _store, _dir) = make_app();
        let past = json!({"data": "blob", "expires_at": unix_now() - 1, "single_use": false});
        let (status, json) = send(&app, request(Method::POST, "/secret-sharing", Some(ALICE), Some(past))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("future"));

        let empty = json!({"data": "", "expires_at": unix_now() + 60, "single_use": false});
        let (status, _) = send(&app, request(Method::POST, "/secret-sharing", Some(ALICE), Some(empty))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_create_bodies_get_json_errors() {
        let (app, store, _dir) = make_app();

        let missing_field = json!({"data": "blob", "single_use": false});
        let (status, json) = send(&app, request(Method::POST, "/secret-sharing", Some(ALICE), Some(missing_field))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].as_str().unwrap().contains("expires_at"));

        let broken = Request::builder()
            .method(Method::POST)
            .uri("/secret-sharing")
            .header(header::AUTHORIZATION, format!("Bearer {ALICE}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(&app, broken).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());

        let untyped = Request::builder()
            .method(Method::POST)
            .uri("/secret-sharing")
            .header(header::AUTHORIZATION, format!("Bearer {ALICE}"))
            .body(Body::from("{}"))
            .unwrap();
        let (status, json) = send(&app, untyped).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(json["error"].is_string());

        assert!(store.list_by_owner("alice", unix_now()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_shows_own_records_without_consuming() {
        let (app, store, _dir) = make_app();
        let id = create(&app, "blob", true).await;
        store
            .create(
                NewSharedSecret {
                    owner_id: "bob".into(),
                    data: "other".into(),
                    expires_at: unix_now() + 60,
                    single_use: false,
                },
                unix_now(),
            )
            .unwrap();

        for _ in 0..3 {
            let (status, json) = send(&app, request(Method::GET, "/secret-sharing", Some(ALICE), None)).await;
            assert_eq!(status, StatusCode::OK);
            let items = json.as_array().unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0]["id"], id.as_str());
            assert_eq!(items[0]["owner_id"], "alice");
            assert_eq!(items[0]["expired"], false);
            assert_eq!(items[0]["data"], "blob");
        }

        let (status, _) = send(&app, request(Method::GET, &format!("/secret-sharing/{id}"), None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn expire_is_idempotent_and_owner_scoped() {
        let (app, _store, _dir) = make_app();
        let id = create(&app, "blob", false).await;
        let expire_uri = format!("/secret-sharing/expire/{id}");

        // Another owner gets the same acknowledgement but changes nothing.
        let (status, json) = send(&app, request(Method::PATCH, &expire_uri, Some(BOB), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        let (status, _) = send(&app, request(Method::GET, &format!("/secret-sharing/{id}"), None, None)).await;
        assert_eq!(status, StatusCode::OK);

        for _ in 0..2 {
            let (status, json) = send(&app, request(Method::PATCH, &expire_uri, Some(ALICE), None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["success"], true);
        }
        let (status, _) = send(&app, request(Method::GET, &format!("/secret-sharing/{id}"), None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, json) = send(&app, request(Method::GET, "/secret-sharing", Some(ALICE), None)).await;
        assert_eq!(json[0]["expired"], true);
        assert!(json[0]["data"].is_null());
    }

    #[tokio::test]
    async fn expire_rejects_malformed_id() {
        let (app, _store, _dir) = make_app();
        let (status, _) = send(
            &app,
            request(Method::PATCH, "/secret-sharing/expire/nope", Some(ALICE), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

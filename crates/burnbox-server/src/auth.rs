use std::path::Path;

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use constant_time_eq::constant_time_eq;
use serde_json::json;
use tracing::debug;

use crate::AppState;

/// Authenticated principal attached to protected requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

impl CallerIdentity {
    pub fn owner_id(&self) -> &str {
        &self.0
    }
}

/// Maps a bearer credential to the owner it authenticates.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, bearer: &str) -> Option<CallerIdentity>;
}

/// Fixed `owner:token` pairs loaded at startup.
#[derive(Default)]
pub struct StaticTokens {
    entries: Vec<(String, String)>,
}

impl StaticTokens {
    /// Parse comma- or newline-separated `owner:token` pairs.
    /// Blank entries and `#` comments are skipped.
    pub fn parse(pairs: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for raw in pairs.split([',', '\n']) {
            let entry = raw.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let (owner, token) = entry
                .split_once(':')
                .with_context(|| format!("expected owner:token, got {entry:?}"))?;
            let (owner, token) = (owner.trim(), token.trim());
            if owner.is_empty() || token.is_empty() {
                anyhow::bail!("owner and token must not be empty in {entry:?}");
            }
            entries.push((owner.to_owned(), token.to_owned()));
        }
        Ok(Self { entries })
    }

    /// Load pairs from a file, one per line.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read tokens file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IdentityProvider for StaticTokens {
    fn resolve(&self, bearer: &str) -> Option<CallerIdentity> {
        // Compare against every entry so timing does not reveal the match position.
        let mut found = None;
        for (owner, token) in &self.entries {
            if constant_time_eq(bearer.as_bytes(), token.as_bytes()) && found.is_none() {
                found = Some(CallerIdentity(owner.clone()));
            }
        }
        found
    }
}

/// Axum middleware that resolves `Authorization: Bearer <token>` into a
/// `CallerIdentity` request extension.
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let caller = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|t| state.identity.resolve(t));

    match caller {
        Some(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        None => {
            debug!("rejected request without valid bearer token");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response()
        }
    }
}

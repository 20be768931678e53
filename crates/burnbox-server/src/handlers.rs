use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::VaultError, AppState};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CreateRequest {
    pub passphrase: String,
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub token: String,
    pub expires_at: i64,
}

pub async fn create_secret(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateRequest>,
) -> Response {
    let vault = state.vault.clone();
    match blocking(move || vault.create(&body.passphrase, &body.secret)).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(CreateResponse {
                token: created.token,
                expires_at: created.expires_at,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

// ── Consume ───────────────────────────────────────────────────────────────────

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ConsumeRequest {
    pub passphrase: String,
}

/// Borrows the plaintext so it is serialized straight out of its zeroizing buffer.
#[derive(Serialize)]
struct ConsumeResponse<'a> {
    secret: &'a str,
}

pub async fn consume_secret(
    State(state): State<AppState>,
    Path(token): Path<String>,
    JsonBody(body): JsonBody<ConsumeRequest>,
) -> Response {
    let vault = state.vault.clone();
    match blocking(move || vault.consume(&token, &body.passphrase)).await {
        Ok(secret) => Json(ConsumeResponse {
            secret: secret.as_str(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

// ── Legacy ────────────────────────────────────────────────────────────────────
//
// Field names, bare-string bodies and `{"detail": {"error": ...}}` errors of
// the first public API, kept for existing clients. Malformed bodies answer
// 400 here too, where the first API answered 422.

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct LegacyCreateRequest {
    pub code_phrase: String,
    pub secret: String,
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct LegacyConsumeRequest {
    pub code_phrase: String,
}

pub async fn legacy_generate(
    State(state): State<AppState>,
    body: Result<JsonBody<LegacyCreateRequest>, VaultError>,
) -> Response {
    let JsonBody(body) = match body {
        Ok(body) => body,
        Err(e) => return LegacyError(e).into_response(),
    };
    let vault = state.vault.clone();
    match blocking(move || vault.create(&body.code_phrase, &body.secret)).await {
        Ok(created) => Json(created.token).into_response(),
        Err(e) => LegacyError(e).into_response(),
    }
}

pub async fn legacy_reveal(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Result<JsonBody<LegacyConsumeRequest>, VaultError>,
) -> Response {
    let JsonBody(body) = match body {
        Ok(body) => body,
        Err(e) => return LegacyError(e).into_response(),
    };
    let vault = state.vault.clone();
    match blocking(move || vault.consume(&token, &body.code_phrase)).await {
        Ok(secret) => Json(secret.as_str()).into_response(),
        Err(e) => LegacyError(e).into_response(),
    }
}

/// [`VaultError`] rendered in the first API's error shape.
struct LegacyError(VaultError);

impl IntoResponse for LegacyError {
    fn into_response(self) -> Response {
        self.0.report();
        let message = match &self.0 {
            VaultError::SecretNotFound => "No such secret key".to_owned(),
            VaultError::PassphraseMismatch => "Incorrect code phrase!".to_owned(),
            other => other.public_message(),
        };
        (
            self.0.status_code(),
            Json(json!({ "detail": { "error": message } })),
        )
            .into_response()
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// JSON request body whose rejections surface as [`VaultError`], so every
/// failure leaves with the same `{"error": ...}` shape and no parser detail.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = VaultError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(body_error(&rejection)),
        }
    }
}

fn body_error(rejection: &JsonRejection) -> VaultError {
    match rejection {
        JsonRejection::JsonDataError(_) => {
            VaultError::validation("request body has a missing or mistyped field")
        }
        JsonRejection::JsonSyntaxError(_) => VaultError::validation("request body is not valid JSON"),
        JsonRejection::MissingJsonContentType(_) => {
            VaultError::validation("expected content-type application/json")
        }
        _ if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => VaultError::PayloadTooLarge,
        _ => VaultError::validation("unreadable request body"),
    }
}

/// Run a vault call on the blocking pool; key derivation is CPU-bound.
async fn blocking<T, F>(f: F) -> Result<T, VaultError>
where
    F: FnOnce() -> Result<T, VaultError> + Send + 'static,
    T: Send + 'static,
{
    use anyhow::Context;

    tokio::task::spawn_blocking(f)
        .await
        .context("vault worker panicked")?
}

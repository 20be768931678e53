use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Every non-success outcome of a vault operation.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Bad input shape. Raised before storage or crypto is touched.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The request body exceeded the configured limit.
    #[error("request body too large")]
    PayloadTooLarge,

    /// Unknown, already consumed, or expired. Deliberately indistinguishable.
    #[error("secret not found")]
    SecretNotFound,

    /// The token existed but the passphrase was wrong. The token is now burned.
    #[error("incorrect passphrase")]
    PassphraseMismatch,

    /// Decryption or decoding failed after the passphrase matched.
    #[error("secret unavailable")]
    Integrity,

    /// Every generated token collided with a live one.
    #[error("could not allocate a unique token")]
    DuplicateToken,

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl VaultError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SecretNotFound => StatusCode::NOT_FOUND,
            Self::PassphraseMismatch => StatusCode::FORBIDDEN,
            Self::Integrity | Self::DuplicateToken | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand to the caller. Server-side failures collapse to
    /// one generic string.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(_)
            | Self::PayloadTooLarge
            | Self::SecretNotFound
            | Self::PassphraseMismatch => self.to_string(),
            Self::Integrity | Self::DuplicateToken | Self::Internal(_) => {
                "internal server error".to_owned()
            }
        }
    }
}

impl VaultError {
    /// Log server-side detail that the response body withholds.
    pub(crate) fn report(&self) {
        if let Self::Internal(e) = self {
            tracing::error!(error = %e, "internal error");
        }
    }
}

impl IntoResponse for VaultError {
    fn into_response(self) -> Response {
        self.report();
        (
            self.status_code(),
            Json(json!({ "error": self.public_message() })),
        )
            .into_response()
    }
}

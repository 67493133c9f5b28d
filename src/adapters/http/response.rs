//! JSON envelopes for the read API.
//!
//! Every body carries `success`. Failures add `error` (human text) and
//! `kind` (stable label from `EngineError::kind`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::domain::error::EngineError;

/// Wrap `body` under `key` in a success envelope.
pub fn success(key: &str, body: impl Serialize) -> Response {
  match serde_json::to_value(body) {
    Ok(value) => {
      let mut envelope = serde_json::Map::new();
      envelope.insert("success".into(), Value::Bool(true));
      envelope.insert(key.into(), value);
      Json(Value::Object(envelope)).into_response()
    }
    Err(e) => ApiError(EngineError::Remote(format!("failed to serialize response: {e}")))
      .into_response(),
  }
}

/// Success envelope whose top-level keys are the fields of `body`.
pub fn success_fields(body: impl Serialize) -> Response {
  match serde_json::to_value(body) {
    Ok(Value::Object(mut fields)) => {
      fields.insert("success".into(), Value::Bool(true));
      Json(Value::Object(fields)).into_response()
    }
    Ok(other) => ApiError(EngineError::Remote(format!(
      "response body is not an object: {other}"
    )))
    .into_response(),
    Err(e) => ApiError(EngineError::Remote(format!("failed to serialize response: {e}")))
      .into_response(),
  }
}

/// An engine error rendered as an HTTP failure.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
  fn from(err: EngineError) -> Self {
    Self(err)
  }
}

impl ApiError {
  pub const fn status(&self) -> StatusCode {
    match self.0 {
      EngineError::Validation(_) => StatusCode::BAD_REQUEST,
      EngineError::NotFound(_) | EngineError::MalformedAccount(_) => StatusCode::NOT_FOUND,
      EngineError::AlreadyExists(_)
      | EngineError::MarketClosed(_)
      | EngineError::InvalidTransition(_)
      | EngineError::StaleQuote(_)
      | EngineError::ClaimRejected(_) => StatusCode::CONFLICT,
      EngineError::Remote(_) => StatusCode::BAD_GATEWAY,
      EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = json!({
      "success": false,
      "error": self.0.to_string(),
      "kind": self.0.kind(),
    });
    (self.status(), Json(body)).into_response()
  }
}

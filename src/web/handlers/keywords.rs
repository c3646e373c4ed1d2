// POST /keywords/extract: extract key phrases from a text.
//
// 200 with the cleaned phrases, 400 when nothing usable was extracted,
// 422 for a malformed or out-of-range request, 500 when generation or
// post-processing failed, 504 when the request ran past its timeout.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::keywords::service::{
    Extraction, INSUFFICIENT_INPUT_MESSAGE, INTERNAL_ERROR_MESSAGE, TIMEOUT_MESSAGE,
};
use crate::web::{api_error, AppState};

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub keywords: Vec<String>,
}

/// Check the request text against the API's limits.
pub fn validate_text(text: &str, max_chars: usize) -> Result<(), String> {
    if text.trim().is_empty() {
        return Err("Входной текст не должен быть пустым.".to_string());
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(format!(
            "Входной текст слишком длинный: {len} символов (максимум {max_chars})."
        ));
    }
    Ok(())
}

pub async fn extract_keywords(
    State(state): State<AppState>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return api_error(StatusCode::UNPROCESSABLE_ENTITY, &rejection.body_text());
        }
    };

    if let Err(message) = validate_text(&request.text, state.max_text_chars) {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, &message);
    }

    let result = tokio::time::timeout(
        state.request_timeout,
        state.service.extract_keywords(&request.text),
    )
    .await;

    match result {
        Ok(Ok(Extraction::Keywords(keywords))) => {
            Json(ExtractResponse { keywords }).into_response()
        }
        Ok(Ok(Extraction::Insufficient)) => {
            api_error(StatusCode::BAD_REQUEST, INSUFFICIENT_INPUT_MESSAGE)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %format!("{e:#}"), "Keyword extraction failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = state.request_timeout.as_secs(),
                "Keyword extraction timed out"
            );
            api_error(StatusCode::GATEWAY_TIMEOUT, TIMEOUT_MESSAGE)
        }
    }
}

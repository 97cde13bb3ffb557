use serde::Serialize;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;

/// Envelope every endpoint responds with.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub meta: ResponseMeta,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    pub status: &'static str,
    pub status_code: u16,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseMeta {
    fn new(status: StatusCode, message: Option<String>) -> Self {
        Self {
            status: if status.is_success() { "success" } else { "error" },
            status_code: status.as_u16(),
            timestamp: Utc::now().to_rfc3339(),
            message,
        }
    }
}

pub fn success<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (
        StatusCode::OK,
        Json(ApiResponse {
            data: Some(data),
            meta: ResponseMeta::new(StatusCode::OK, None),
        }),
    )
}

pub fn error<T: Serialize>(status: StatusCode, message: String) -> (StatusCode, Json<ApiResponse<T>>) {
    (
        status,
        Json(ApiResponse {
            data: None,
            meta: ResponseMeta::new(status, Some(message)),
        }),
    )
}

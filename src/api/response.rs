use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::error::AppResult;

/// Success envelope: `{"success": true, "data": ..., "message"?: ...}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

pub type ApiResult<T> = AppResult<Json<ApiResponse<T>>>;
pub type Created<T> = AppResult<(StatusCode, Json<ApiResponse<T>>)>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        message: None,
        data,
    }))
}

pub fn ok_with_message<T: Serialize>(data: T, message: impl Into<String>) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        message: Some(message.into()),
        data,
    }))
}

pub fn created<T: Serialize>(data: T) -> Created<T> {
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            success: true,
            message: None,
            data,
        }),
    ))
}

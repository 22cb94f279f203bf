//! Response body shared by every route

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// `{ "data": ... }`, with `null` when there is nothing to return
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: Option<T>,
}

impl<T: Serialize> DataResponse<T> {
    pub fn new(data: Option<T>) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for DataResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

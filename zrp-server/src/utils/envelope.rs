//! Success response envelope.
//!
//! All successful responses are `{"data": …}`, with `meta` added on list
//! responses:
//!
//! ```json
//! { "data": [ … ], "meta": { "total": 128, "page": 2, "limit": 50 } }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ListMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMeta {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data, meta: None }
    }

    pub fn with_meta(data: T, total: i64, page: i64, limit: i64) -> Self {
        Self {
            data,
            meta: Some(ListMeta { total, page, limit }),
        }
    }
}

/// 200 with `{data}`.
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::new(data))
}

/// 201 with `{data}`.
pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::new(data))).into_response()
}

/// 200 with `{data, meta}`.
pub fn ok_list<T: Serialize>(data: T, total: i64, page: i64, limit: i64) -> Json<ApiResponse<T>> {
    Json(ApiResponse::with_meta(data, total, page, limit))
}

/// Query-string pagination. Defaults: page 1, limit 50, capped at 500.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    50
}

impl Default for PageQuery {
    fn default() -> Self {
        Self { page: 1, limit: 50 }
    }
}

impl PageQuery {
    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, 500),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let json = serde_json::to_string(&ApiResponse::new(42)).unwrap();
        assert_eq!(json, r#"{"data":42}"#);

        let json = serde_json::to_string(&ApiResponse::with_meta(vec![1, 2], 10, 1, 2)).unwrap();
        assert_eq!(json, r#"{"data":[1,2],"meta":{"total":10,"page":1,"limit":2}}"#);
    }

    #[test]
    fn page_query_clamps() {
        let q = PageQuery { page: 0, limit: 9999 }.clamped();
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, 500);
        assert_eq!(q.offset(), 0);

        let q = PageQuery { page: 3, limit: 20 }.clamped();
        assert_eq!(q.offset(), 40);
    }
}

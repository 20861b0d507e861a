use axum::{
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::web::GIT_COMMIT_HASH;

// axum handler for health
pub async fn health() -> impl IntoResponse {
    let body = Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "build": GIT_COMMIT_HASH,
    }));

    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )
    .parse()
    {
        headers.insert("X-App", value);
    }

    (headers, body)
}

#[cfg(test)]
mod tests {
    use super::health;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn health_sets_app_header() {
        let response = health().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let value = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(value.starts_with(env!("CARGO_PKG_NAME")));
    }
}

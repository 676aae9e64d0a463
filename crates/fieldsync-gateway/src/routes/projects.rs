//! Project registration and listing.
//!
//! Both routes sit behind the bearer middleware.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    middleware,
    routing::get,
    Json, Router,
};

use crate::admission::RegisterProject;
use crate::auth::require_bearer;
use crate::error::{GatewayError, Result};
use crate::json::{ProjectJson, RegisteredJson, SuccessResponse};
use crate::AppState;

/// Project routes.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).put(register_project))
        .route_layer(middleware::from_fn_with_state(state, require_bearer))
}

async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<ProjectJson>>>> {
    let projects = state.store.list_projects().await?;
    Ok(Json(SuccessResponse::new(
        projects.into_iter().map(ProjectJson::from).collect(),
    )))
}

async fn register_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<RegisterProject>, JsonRejection>,
) -> Result<Json<SuccessResponse<RegisteredJson>>> {
    let Json(request) =
        payload.map_err(|rejection| GatewayError::InvalidRequest(rejection.body_text()))?;

    let base_url = base_url_from_headers(&headers, &state.config.public_scheme);
    let outcome = state
        .admission
        .register(state.store.as_ref(), request, base_url.as_deref())
        .await?;

    Ok(Json(SuccessResponse::new(RegisteredJson {
        device_id: outcome.device_id,
    })))
}

fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// The URL a client used to reach this server, as reported by the request
/// headers. Proxy headers take precedence over `Host`.
pub fn base_url_from_headers(headers: &HeaderMap, default_scheme: &str) -> Option<String> {
    let host = first_value(headers, "x-forwarded-host").or_else(|| first_value(headers, "host"))?;
    if host.contains(['/', '\\', '@', ' ']) {
        return None;
    }

    let scheme = match first_value(headers, "x-forwarded-proto") {
        Some(proto @ ("http" | "https")) => proto,
        _ => default_scheme,
    };
    Some(format!("{scheme}://{host}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_base_url_from_host() {
        let mut headers = HeaderMap::new();
        assert_eq!(base_url_from_headers(&headers, "http"), None);

        headers.insert("host", HeaderValue::from_static("sync.local:8080"));
        assert_eq!(
            base_url_from_headers(&headers, "http").as_deref(),
            Some("http://sync.local:8080")
        );
    }

    #[test]
    fn test_base_url_prefers_proxy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("10.0.0.5:8080"));
        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("sync.example.org, proxy.internal"),
        );
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(
            base_url_from_headers(&headers, "http").as_deref(),
            Some("https://sync.example.org")
        );
    }

    #[test]
    fn test_base_url_rejects_odd_values() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("evil.example/path"));
        assert_eq!(base_url_from_headers(&headers, "http"), None);

        headers.insert("host", HeaderValue::from_static("ok.example"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("gopher"));
        assert_eq!(
            base_url_from_headers(&headers, "https").as_deref(),
            Some("https://ok.example")
        );
    }
}

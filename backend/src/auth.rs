use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::http::ApiError;
use crate::models::SharedState;

const SESSION_COOKIE_KEY: &str = "qrgen_admin";

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    let (scheme, token) = auth_header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

fn extract_cookie_value<'a>(cookie_header: &'a str, key: &str) -> Option<&'a str> {
    cookie_header
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(k, v)| k.trim() == key && !v.trim().is_empty())
        .map(|(_, v)| v.trim())
}

fn build_session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE_KEY}={token}; Path=/api; Max-Age=86400; SameSite=Strict; HttpOnly")
}

fn provided_token(req: &Request) -> Option<&str> {
    let headers = req.headers();
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .or_else(|| {
            headers
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .and_then(|c| extract_cookie_value(c, SESSION_COOKIE_KEY))
        })
}

/// Guards the admin API. Without a configured token the routes do not exist.
pub async fn require_admin_token(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return ApiError::not_found("Not found").into_response();
    };

    match provided_token(&req) {
        Some(token) if constant_time_eq(token, expected) => {
            let mut resp = next.run(req).await;
            if let Ok(cookie) = HeaderValue::from_str(&build_session_cookie(expected)) {
                resp.headers_mut().append(header::SET_COOKIE, cookie);
            }
            resp
        }
        _ => {
            let mut resp = ApiError::unauthorized("Unauthorized: missing or invalid admin token").into_response();
            resp.headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            resp
        }
    }
}

//! Bearer-token middleware for the private API.
//!
//! Accepts the token from the `Authorization: Bearer` header or, for
//! WebSocket clients that cannot set headers, a `?token=` query parameter.

use super::JwtService;
use crate::api::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Extract the bearer token from a request's header or query string.
pub fn bearer_token(headers: &axum::http::HeaderMap, query: Option<&str>) -> Option<String> {
    let from_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::to_string);
    if from_header.is_some() {
        return from_header;
    }

    query.and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("token="))
            .map(str::to_string)
    })
}

/// Validate the bearer token and stash the claims in request extensions.
pub async fn auth_middleware(
    State(jwt): State<Arc<JwtService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers(), req.uri().query())
        .ok_or_else(ApiError::auth_required)?;

    let claims = jwt.verify(&token).map_err(|_| ApiError::auth_required())?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn header_token_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(
            bearer_token(&headers, Some("token=xyz")).as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn query_token_used_when_header_missing() {
        let headers = HeaderMap::new();
        assert_eq!(
            bearer_token(&headers, Some("cursor=5&token=xyz")).as_deref(),
            Some("xyz")
        );
    }

    #[test]
    fn no_token_anywhere() {
        let headers = HeaderMap::new();
        assert!(bearer_token(&headers, Some("cursor=5")).is_none());
        assert!(bearer_token(&headers, None).is_none());
    }
}

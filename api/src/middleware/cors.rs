use std::time::Duration;

use axum::http::Method;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use tower_http::cors::{Any, CorsLayer};

/// CORS for the WebApp.
///
/// The WebApp is served from an origin the API does not control, and requests
/// carry the launch credential in `Authorization` rather than cookies, so any
/// origin is allowed and credentials are not. Browsers never let a wildcard
/// cover `Authorization`, so allowed headers are listed by name.
///
/// - Origins: any
/// - Methods: GET, POST, OPTIONS
/// - Headers: Authorization, Content-Type
/// - Exposed: `Retry-After`
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([RETRY_AFTER])
        .max_age(Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    use crate::routes::deals::tests::fixture;

    const ORIGIN: &str = "https://webapp.example.com";

    #[tokio::test]
    async fn preflight_allows_authorization_header_from_any_origin() {
        let fx = fixture().await;
        let response = fx
            .app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/deals")
                    .header("origin", ORIGIN)
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "authorization,content-type")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers
                .get("access-control-allow-origin")
                .expect("allow-origin header should exist"),
            "*"
        );
        let allowed = headers
            .get("access-control-allow-headers")
            .expect("allow-headers header should exist")
            .to_str()
            .expect("allow-headers should be ASCII")
            .to_ascii_lowercase();
        assert!(allowed.contains("authorization"), "allow-headers: {allowed}");
        assert!(allowed.contains("content-type"), "allow-headers: {allowed}");
        assert_ne!(allowed.trim(), "*");
    }

    #[tokio::test]
    async fn unauthorized_responses_carry_cors_headers() {
        let fx = fixture().await;
        let response = fx
            .app()
            .oneshot(
                Request::builder()
                    .uri("/api/deals")
                    .header("origin", ORIGIN)
                    .header("authorization", "tma user=%7B%22id%22%3A42%7D")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let headers = response.headers();
        assert_eq!(
            headers
                .get("access-control-allow-origin")
                .expect("allow-origin header should exist"),
            "*"
        );
    }

    #[tokio::test]
    async fn rate_limited_responses_expose_retry_after() {
        let fx = fixture().await;
        let create = || {
            Request::builder()
                .method(Method::POST)
                .uri("/api/deals")
                .header("origin", ORIGIN)
                .header("authorization", fx.credential(42))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"clientName":"Acme"}"#))
                .expect("request should build")
        };
        let first = fx.app().oneshot(create()).await.expect("request should succeed");
        assert_eq!(first.status(), StatusCode::OK);

        let second = fx.app().oneshot(create()).await.expect("request should succeed");
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let exposed = second
            .headers()
            .get("access-control-expose-headers")
            .expect("expose-headers header should exist")
            .to_str()
            .expect("expose-headers should be ASCII")
            .to_ascii_lowercase();
        assert!(exposed.contains("retry-after"), "expose-headers: {exposed}");
    }
}

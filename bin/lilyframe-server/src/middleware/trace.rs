use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Bodies at or above this size are summarized instead of logged.
const MAX_LOGGED_BODY: usize = 1024;

pub async fn trace_middleware(
    State(_state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start_time = Instant::now();

    // Reuse the caller's trace id when it is a valid UUID.
    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let trace_header = HeaderValue::from_str(&trace_id.to_string()).ok();

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
    );

    async move {
        info!("→ request started");
        let (parts, body) = req.into_parts();

        let body = buffer_and_log("request", &parts.headers, body).await;
        let mut req = Request::from_parts(parts, body);
        if let Some(value) = &trace_header {
            req.headers_mut().insert(X_TRACE_ID, value.clone());
        }

        let response = next.run(req).await;

        let (parts, body) = response.into_parts();
        let body = buffer_and_log("response", &parts.headers, body).await;
        let mut response = Response::from_parts(parts, body);

        if let Some(value) = trace_header {
            response.headers_mut().insert(X_TRACE_ID, value);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response finished"
        );

        response
    }
    .instrument(span)
    .await
}

/// Log a body on its way through. Small JSON bodies are buffered and
/// logged; everything else (images, static files) streams untouched.
async fn buffer_and_log(direction: &str, headers: &header::HeaderMap, body: Body) -> Body {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !content_type.contains("application/json") {
        if let Some(len) = headers.get(header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()) {
            info!("{} body: [streamed: type={}, size={}]", direction, content_type, len);
        }
        return body;
    }

    let bytes: Bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Body::empty(),
    };

    if bytes.len() < MAX_LOGGED_BODY {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            info!("{} body: {}", direction, text);
        }
    } else {
        info!("{} body: [skipped: type={}, size={}]", direction, content_type, bytes.len());
    }

    Body::from(bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::routes::test_support::{FakeLilypad, Harness};
    use tower::ServiceExt;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn echoes_incoming_trace_id() {
        let harness = Harness::new(FakeLilypad::Hang);
        let trace_id = Uuid::new_v4().to_string();
        let request = axum::http::Request::get("/health")
            .header(X_TRACE_ID, &trace_id)
            .body(Body::empty())
            .unwrap();

        let response = crate::routes::build(harness.state.clone())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.headers()[X_TRACE_ID], trace_id.as_str());
    }

    #[tokio::test]
    async fn assigns_trace_id_when_missing_or_invalid() {
        let harness = Harness::new(FakeLilypad::Hang);
        let request = axum::http::Request::get("/health")
            .header(X_TRACE_ID, "not-a-uuid")
            .body(Body::empty())
            .unwrap();

        let response = crate::routes::build(harness.state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let assigned = response.headers()[X_TRACE_ID].to_str().unwrap();
        assert!(Uuid::parse_str(assigned).is_ok());
    }

    #[tokio::test]
    #[traced_test]
    async fn static_files_stream_through_unbuffered() {
        let harness = Harness::new(FakeLilypad::Hang);
        let png = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];
        std::fs::write(harness.public.path().join("error.png"), &png).unwrap();

        let request = axum::http::Request::get("/error.png").body(Body::empty()).unwrap();
        let response = crate::routes::build(harness.state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(body.as_ref(), png.as_slice());
        assert!(logs_contain("response body: [streamed: type=image/png"));
    }

    #[tokio::test]
    #[traced_test]
    async fn small_json_bodies_are_logged() {
        let harness = Harness::new(FakeLilypad::Hang);
        let (_, html) = harness
            .post_frame("?action=submit", r#"{"untrustedData":{}}"#)
            .await;

        assert!(html.contains("Start Over"));
        assert!(logs_contain(r#"request body: {"untrustedData":{}}"#));
    }
}

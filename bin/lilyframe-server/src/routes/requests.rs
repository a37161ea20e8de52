//! JSON view of a tracked request, for operators and debugging.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use lilyframe_core::Request;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/requests/{id}", get(get_request))
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Request>, ServerError> {
    Ok(Json(state.tracker.get(&id).await?))
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};

    use crate::routes::test_support::{FakeLilypad, Harness};

    #[tokio::test]
    async fn returns_tracked_request_as_json() {
        let harness = Harness::new(FakeLilypad::Hang);
        let id = harness.state.tracker.create("moo").await;

        let (status, body) = harness
            .send(HttpRequest::get(format!("/api/requests/{id}")).body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["id"], id.as_str());
        assert_eq!(json["prompt"], "moo");
        assert_eq!(json["status"], "processing");
    }

    #[tokio::test]
    async fn unknown_request_is_404() {
        let harness = Harness::new(FakeLilypad::Hang);
        let (status, body) = harness
            .send(HttpRequest::get("/api/requests/missing").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("missing"));
    }
}

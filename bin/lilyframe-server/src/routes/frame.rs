//! The frame endpoint (`POST /api/frame`).
//!
//! `action=input` asks for a prompt, `action=submit` starts a generation and
//! `action=check&id=..` reports its progress. Every outcome, including bad
//! input, is answered with a frame page rather than an HTTP error.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info};

use lilyframe_core::RequestStatus;

use crate::error::ServerError;
use crate::frame::{FrameAction, FramePage};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/frame", post(frame))
}

#[derive(Debug, Deserialize)]
pub struct FrameQuery {
    pub action: Option<String>,
    pub id: Option<String>,
}

/// Body posted by frame clients; only the typed text is used.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FramePayload {
    untrusted_data: Option<UntrustedData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UntrustedData {
    input_text: Option<String>,
}

/// Extract the user's prompt, treating a missing or malformed body as no prompt.
fn prompt_from(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<FramePayload>(body)
        .ok()?
        .untrusted_data?
        .input_text
        .filter(|p| !p.is_empty())
}

pub async fn frame(
    State(state): State<Arc<AppState>>,
    query: Result<Query<FrameQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Html<String>, ServerError> {
    let q = match query {
        Ok(Query(q)) => q,
        Err(rejection) => {
            debug!(error = %rejection, "unparseable frame query");
            return Ok(Html(FramePage::Fallback.render_with(&state)?));
        }
    };

    // An empty `action=` means the same as no action at all.
    let action = match q.action.as_deref().filter(|a| !a.is_empty()) {
        None => Ok(FrameAction::default()),
        Some(raw) => raw.parse::<FrameAction>(),
    };

    let page = match action {
        Ok(FrameAction::Input) => FramePage::Input.render_with(&state)?,
        Ok(FrameAction::Submit) => match prompt_from(&body) {
            Some(prompt) => {
                let id = state.jobs.submit(prompt).await;
                info!(request_id = %id, "prompt submitted; generation started");
                FramePage::Submitted { id: &id }.render_with(&state)?
            }
            None => {
                debug!("submit without a prompt");
                FramePage::Fallback.render_with(&state)?
            }
        },
        Ok(FrameAction::Check) => match q.id.as_deref() {
            Some(id) => match state.tracker.get(id).await {
                Ok(request) => match request.status {
                    RequestStatus::Processing => FramePage::Processing { id },
                    RequestStatus::Completed => FramePage::Completed { id },
                    RequestStatus::Error => FramePage::Failed,
                }
                .render_with(&state)?,
                Err(e) => {
                    debug!(error = %e, "status check for unknown request");
                    FramePage::Fallback.render_with(&state)?
                }
            },
            None => FramePage::Fallback.render_with(&state)?,
        },
        Err(_) => {
            debug!(action = ?q.action, "unknown frame action");
            FramePage::Fallback.render_with(&state)?
        }
    };

    Ok(Html(page))
}

impl FramePage<'_> {
    fn render_with(self, state: &AppState) -> Result<String, minijinja::Error> {
        state.pages.render(self)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::routes::test_support::{FakeLilypad, Harness, check_id};
    use axum::http::StatusCode;
    use tracing_test::traced_test;

    async fn settle(harness: &Harness, id: &str) -> RequestStatus {
        for _ in 0..200 {
            let status = harness.state.tracker.get(id).await.unwrap().status;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("request {id} never settled");
    }

    #[test]
    fn prompt_is_read_from_untrusted_data() {
        assert_eq!(
            prompt_from(br#"{"untrustedData":{"inputText":"moo"}}"#).as_deref(),
            Some("moo")
        );
        assert_eq!(prompt_from(br#"{"untrustedData":{"inputText":""}}"#), None);
        assert_eq!(prompt_from(br#"{"untrustedData":{}}"#), None);
        assert_eq!(prompt_from(b"not json"), None);
        assert_eq!(prompt_from(b""), None);
    }

    #[tokio::test]
    async fn default_action_is_input() {
        let harness = Harness::new(FakeLilypad::Hang);
        let (status, html) = harness.post_frame("", "{}").await;

        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("https://frames.test/enter-prompt.png"));
        assert!(html.contains("https://frames.test/api/frame?action=submit"));

        let (_, html) = harness.post_frame("?action=", "{}").await;
        assert!(html.contains("https://frames.test/enter-prompt.png"));
    }

    #[tokio::test]
    #[traced_test]
    async fn submit_then_check_reports_processing() {
        let harness = Harness::new(FakeLilypad::Hang);
        let (_, html) = harness
            .post_frame("?action=submit", r#"{"untrustedData":{"inputText":"hello"}}"#)
            .await;
        assert!(html.contains("Check Status"));
        assert!(html.contains("https://frames.test/loading.gif"));

        let id = check_id(&html);
        let request = harness.state.tracker.get(&id).await.unwrap();
        assert_eq!(request.prompt, "hello");
        assert_eq!(request.status, RequestStatus::Processing);

        let (_, html) = harness.post_frame(&format!("?action=check&id={id}"), "{}").await;
        assert!(html.contains("Check Again"));
        assert!(html.contains("https://frames.test/loading.gif"));
        assert!(html.contains(&format!("action=check&amp;id={id}")));
        assert!(logs_contain("generation started"));
    }

    #[tokio::test]
    async fn completed_request_shows_its_result() {
        let harness = Harness::succeeding_with("hello\nworld");
        let (_, html) = harness
            .post_frame("?action=submit", r#"{"untrustedData":{"inputText":"hello"}}"#)
            .await;
        let id = check_id(&html);

        assert_eq!(settle(&harness, &id).await, RequestStatus::Completed);
        assert_eq!(harness.launches(), 1);

        let (_, html) = harness.post_frame(&format!("?action=check&id={id}"), "{}").await;
        assert!(html.contains(&format!("https://frames.test/results/{id}.png")));
        assert!(html.contains("New Request"));

        let png = std::fs::read(harness.public.path().join(format!("results/{id}.png"))).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn failed_request_shows_error_frame() {
        let harness = Harness::new(FakeLilypad::Fail(1));
        let (_, html) = harness
            .post_frame("?action=submit", r#"{"untrustedData":{"inputText":"hello"}}"#)
            .await;
        let id = check_id(&html);

        assert_eq!(settle(&harness, &id).await, RequestStatus::Error);

        let (_, html) = harness.post_frame(&format!("?action=check&id={id}"), "{}").await;
        assert!(html.contains("https://frames.test/error.png"));
        assert!(html.contains("Try Again"));
    }

    #[tokio::test]
    async fn submit_without_prompt_falls_back() {
        let harness = Harness::new(FakeLilypad::Hang);
        for body in ["{}", r#"{"untrustedData":{"inputText":""}}"#, "garbage"] {
            let (status, html) = harness.post_frame("?action=submit", body).await;
            assert_eq!(status, StatusCode::OK);
            assert!(html.contains("Start Over"), "{body}");
        }
        assert!(harness.state.tracker.is_empty().await);
        assert_eq!(harness.launches(), 0);
    }

    #[tokio::test]
    async fn unknown_id_and_action_fall_back() {
        let harness = Harness::new(FakeLilypad::Hang);

        let (_, html) = harness.post_frame("?action=check&id=nope", "{}").await;
        assert!(html.contains("Start Over"));

        let (_, html) = harness.post_frame("?action=check", "{}").await;
        assert!(html.contains("Start Over"));

        let (_, html) = harness.post_frame("?action=explode", "{}").await;
        assert!(html.contains("Start Over"));
        assert!(html.contains("https://frames.test/error.png"));
    }

    #[tokio::test]
    async fn malformed_query_still_answers_with_a_frame() {
        let harness = Harness::new(FakeLilypad::Hang);

        let (status, html) = harness.post_frame("?action=check&id=a&id=b", "{}").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("Start Over"));
    }
}

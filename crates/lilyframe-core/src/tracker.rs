//! In-memory request tracker.
//!
//! Maps an opaque request id to its prompt and generation status. A request
//! starts out `processing` and settles exactly once, to `completed` or
//! `error`, when its generation job finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle state of a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Processing,
    Completed,
    Error,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Processing)
    }
}

/// Snapshot of a tracked request.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: String,
    pub prompt: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("request {0} not found")]
    NotFound(String),

    /// Only terminal statuses may be assigned after creation.
    #[error("request {id} cannot transition to {to}")]
    InvalidTransition { id: String, to: RequestStatus },

    #[error("request {id} already settled as {status}")]
    AlreadySettled { id: String, status: RequestStatus },
}

/// Optional bounds on the tracker table.
///
/// Both limits only ever remove settled requests; a request that is still
/// `processing` stays in the table until its job reports back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionPolicy {
    /// Upper bound on the number of entries kept in the table.
    pub max_entries: Option<usize>,
    /// How long a settled request stays visible to `check`.
    pub ttl: Option<Duration>,
}

impl EvictionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
struct Entry {
    request: Request,
    touched: Instant,
}

/// Thread-safe request table shared by the HTTP handlers and generation jobs.
#[derive(Debug, Clone)]
pub struct RequestTracker {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    policy: EvictionPolicy,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(EvictionPolicy::unbounded())
    }
}

impl RequestTracker {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    /// Register a new `processing` request and return its id.
    pub async fn create(&self, prompt: impl Into<String>) -> String {
        self.create_evicting(prompt).await.0
    }

    /// Like [`create`](Self::create), also returning the ids evicted to make room.
    pub async fn create_evicting(&self, prompt: impl Into<String>) -> (String, Vec<String>) {
        let prompt = prompt.into();
        let now = Utc::now();
        let mut guard = self.inner.write().await;

        let evicted = self.evict(&mut guard);

        let mut id = Uuid::new_v4().to_string();
        while guard.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }

        guard.insert(
            id.clone(),
            Entry {
                request: Request {
                    id: id.clone(),
                    prompt,
                    status: RequestStatus::Processing,
                    created_at: now,
                    updated_at: now,
                },
                touched: Instant::now(),
            },
        );
        (id, evicted)
    }

    pub async fn get(&self, id: &str) -> Result<Request, TrackerError> {
        self.inner
            .read()
            .await
            .get(id)
            .map(|e| e.request.clone())
            .ok_or_else(|| TrackerError::NotFound(id.to_owned()))
    }

    /// Settle a request. Succeeds at most once per id.
    pub async fn set_status(&self, id: &str, status: RequestStatus) -> Result<(), TrackerError> {
        if !status.is_terminal() {
            return Err(TrackerError::InvalidTransition {
                id: id.to_owned(),
                to: status,
            });
        }

        let mut guard = self.inner.write().await;
        let entry = guard
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_owned()))?;

        if entry.request.status.is_terminal() {
            return Err(TrackerError::AlreadySettled {
                id: id.to_owned(),
                status: entry.request.status,
            });
        }

        entry.request.status = status;
        entry.request.updated_at = Utc::now();
        entry.touched = Instant::now();
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    fn evict(&self, table: &mut HashMap<String, Entry>) -> Vec<String> {
        let mut evicted = Vec::new();
        if let Some(ttl) = self.policy.ttl {
            table.retain(|id, e| {
                let keep = !e.request.status.is_terminal() || e.touched.elapsed() < ttl;
                if !keep {
                    evicted.push(id.clone());
                }
                keep
            });
            if !evicted.is_empty() {
                debug!(expired = evicted.len(), "evicted expired requests");
            }
        }

        let Some(max) = self.policy.max_entries else {
            return evicted;
        };
        // Make room for the entry about to be inserted.
        while table.len() >= max.max(1) {
            let oldest = table
                .iter()
                .filter(|(_, e)| e.request.status.is_terminal())
                .min_by_key(|(_, e)| e.touched)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    table.remove(&id);
                    debug!(request_id = %id, "evicted settled request to stay within capacity");
                    evicted.push(id);
                }
                None => break,
            }
        }
        evicted
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn create_starts_processing() {
        let tracker = RequestTracker::default();
        let id = tracker.create("hello").await;

        let request = tracker.get(&id).await.expect("request should exist");
        assert_eq!(request.prompt, "hello");
        assert_eq!(request.status, RequestStatus::Processing);
        assert_eq!(request.created_at, request.updated_at);
    }

    #[tokio::test]
    async fn create_returns_unique_ids() {
        let tracker = RequestTracker::default();
        let mut ids = HashSet::new();
        for i in 0..256 {
            assert!(ids.insert(tracker.create(format!("prompt {i}")).await));
        }
        assert_eq!(tracker.len().await, 256);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let tracker = RequestTracker::default();
        let err = tracker.get("never-issued").await.unwrap_err();
        assert_eq!(err, TrackerError::NotFound("never-issued".into()));
    }

    #[tokio::test]
    async fn set_status_is_one_shot() {
        let tracker = RequestTracker::default();
        let id = tracker.create("hello").await;

        tracker
            .set_status(&id, RequestStatus::Completed)
            .await
            .expect("first transition succeeds");

        let err = tracker.set_status(&id, RequestStatus::Error).await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::AlreadySettled { status: RequestStatus::Completed, .. }
        ));

        let err = tracker
            .set_status(&id, RequestStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition { .. }));

        assert_eq!(
            tracker.get(&id).await.unwrap().status,
            RequestStatus::Completed
        );
    }

    #[tokio::test]
    async fn set_status_unknown_id_is_not_found() {
        let tracker = RequestTracker::default();
        let err = tracker
            .set_status("missing", RequestStatus::Error)
            .await
            .unwrap_err();
        assert_eq!(err, TrackerError::NotFound("missing".into()));
        assert!(tracker.is_empty().await);
    }

    #[tokio::test]
    async fn capacity_evicts_settled_but_keeps_processing() {
        let tracker = RequestTracker::new(EvictionPolicy {
            max_entries: Some(2),
            ttl: None,
        });
        let settled = tracker.create("a").await;
        tracker
            .set_status(&settled, RequestStatus::Error)
            .await
            .unwrap();
        let running = tracker.create("b").await;

        let (newest, evicted) = tracker.create_evicting("c").await;
        assert_eq!(evicted, vec![settled.clone()]);
        assert!(tracker.get(&settled).await.is_err());
        assert!(tracker.get(&running).await.is_ok());
        assert!(tracker.get(&newest).await.is_ok());

        // Nothing settled is left to evict, so the table grows past the bound.
        let overflow = tracker.create("d").await;
        assert!(tracker.get(&overflow).await.is_ok());
        assert_eq!(tracker.len().await, 3);
    }

    #[tokio::test]
    async fn ttl_expires_only_settled_requests() {
        let tracker = RequestTracker::new(EvictionPolicy {
            max_entries: None,
            ttl: Some(Duration::ZERO),
        });
        let settled = tracker.create("a").await;
        let running = tracker.create("b").await;
        tracker
            .set_status(&settled, RequestStatus::Completed)
            .await
            .unwrap();

        let (_, evicted) = tracker.create_evicting("c").await;
        assert_eq!(evicted, vec![settled.clone()]);
        assert!(tracker.get(&settled).await.is_err());
        assert!(tracker.get(&running).await.is_ok());
    }

    #[tokio::test]
    async fn request_serializes_with_lowercase_status() {
        let tracker = RequestTracker::default();
        let id = tracker.create("moo").await;
        let json = serde_json::to_value(tracker.get(&id).await.unwrap()).unwrap();
        assert_eq!(json["id"], id.as_str());
        assert_eq!(json["status"], "processing");
    }

    #[test]
    fn status_strings_are_lowercase() {
        assert_eq!(RequestStatus::Processing.to_string(), "processing");
        assert_eq!(RequestStatus::Completed.as_ref(), "completed");
        assert_eq!("error".parse::<RequestStatus>().unwrap(), RequestStatus::Error);
    }
}

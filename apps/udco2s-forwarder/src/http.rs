use crate::flusher::Flusher;
use crate::sink::MetricSink;
use crate::stats::StatsSnapshot;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

pub struct HttpState<S> {
    pub flusher: Arc<Flusher<S>>,
}

impl<S> Clone for HttpState<S> {
    fn clone(&self) -> Self {
        Self {
            flusher: self.flusher.clone(),
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_status<S: MetricSink>(State(state): State<HttpState<S>>) -> Json<StatsSnapshot> {
    Json(state.flusher.snapshot())
}

pub fn router<S: MetricSink>(state: HttpState<S>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flusher::tests::{flusher, sample, RecordingSink};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_answers_ok() {
        let app = router(HttpState {
            flusher: flusher(RecordingSink::default(), 10),
        });
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn status_reports_buffer_and_counters() {
        let flusher = flusher(RecordingSink::default(), 10);
        for t in 0..3 {
            flusher.submit(sample(t));
        }
        let app = router(HttpState {
            flusher: flusher.clone(),
        });

        let resp = app
            .oneshot(Request::builder().uri("/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["buffered_samples"], 3);
        assert_eq!(status["samples_parsed"], 3);
        assert_eq!(status["flushes_ok"], 0);
        assert_eq!(status["flush_in_flight"], false);
        assert!(status["last_flush_at"].is_null());
    }
}

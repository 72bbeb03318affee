use crate::metric::Metric;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("metrics request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("metrics endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Where a flush delivers its metrics. `Ok` means the batch was accepted and
/// can be forgotten.
pub trait MetricSink: Send + Sync + 'static {
    fn publish(&self, metrics: &[Metric]) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Posts metric batches as a JSON array with bearer auth.
#[derive(Clone)]
pub struct HttpMetricSink {
    client: Client,
    url: String,
    auth_header: String,
}

impl HttpMetricSink {
    pub fn new(url: impl Into<String>, token: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            auth_header: format!("Bearer {token}"),
        })
    }
}

impl MetricSink for HttpMetricSink {
    async fn publish(&self, metrics: &[Metric]) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, &self.auth_header)
            .json(metrics)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(status = %status, body = %body.trim(), metrics = metrics.len(), "metrics accepted");
        Ok(())
    }
}

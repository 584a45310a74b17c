//! Camera backend interface
//!
//! Hardware-agnostic view of the device the console reconciles against. Every
//! component talks to the backend through [`Backend`] so tests can swap in
//! [`MockBackend`](crate::mock::MockBackend); production uses [`HttpBackend`].

use crate::connection::Endpoints;
use crate::error::{ConsoleError, Result};
use crate::mode::{Mode, ModeResponse};
use crate::telemetry::SensorSample;
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Remote camera operations used by the console.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET {base}/mode`
    async fn fetch_mode(&self) -> Result<ModeResponse>;

    /// `POST {base}/set-mode/{target}`. Only STREAM and MOTION are valid targets.
    async fn set_mode(&self, target: Mode) -> Result<()>;

    /// `GET` the sensor snapshot address.
    async fn fetch_sensors(&self) -> Result<SensorSample>;

    /// `HEAD` the stream address; any 2xx means the playlist is being served.
    async fn probe_stream(&self, address: &str) -> Result<()>;

    /// `POST {base}/capture`
    async fn trigger_capture(&self) -> Result<()>;
}

/// [`Backend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoints: Arc<Endpoints>,
}

impl HttpBackend {
    /// Build a client whose every request times out after `timeout`.
    pub fn new(endpoints: Arc<Endpoints>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsoleError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client, endpoints })
    }

    /// Endpoints this backend was built with.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

/// Map a non-2xx status to [`ConsoleError::BadResponse`].
fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ConsoleError::BadResponse {
            url: response.url().to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    #[instrument(skip(self), level = "trace")]
    async fn fetch_mode(&self) -> Result<ModeResponse> {
        let response = self.client.get(self.endpoints.mode_url()).send().await?;
        Ok(ensure_success(response)?.json::<ModeResponse>().await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_mode(&self, target: Mode) -> Result<()> {
        if !target.is_settled() {
            return Err(ConsoleError::InvalidTarget(target));
        }
        let url = self.endpoints.set_mode_url(target);
        let response = self.client.post(&url).send().await?;
        ensure_success(response)?;
        debug!(%url, "Set-mode request accepted");
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn fetch_sensors(&self) -> Result<SensorSample> {
        let response = self
            .client
            .get(self.endpoints.sensor_address())
            .send()
            .await?;
        Ok(ensure_success(response)?.json::<SensorSample>().await?)
    }

    #[instrument(skip(self), level = "trace")]
    async fn probe_stream(&self, address: &str) -> Result<()> {
        let response = self.client.head(address).send().await?;
        ensure_success(response)?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn trigger_capture(&self) -> Result<()> {
        let response = self
            .client
            .post(self.endpoints.capture_url())
            .send()
            .await?;
        ensure_success(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_is_not_a_valid_target() {
        let backend =
            HttpBackend::new(Arc::new(Endpoints::default()), Duration::from_secs(1)).unwrap();
        let err = backend.set_mode(Mode::Unknown).await.unwrap_err();
        assert!(matches!(err, ConsoleError::InvalidTarget(Mode::Unknown)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_unavailable() {
        let endpoints = Endpoints::from_config(&crate::config::EndpointConfig {
            // Port 9 (discard) on loopback is closed on any sane test host.
            api_base: "http://127.0.0.1:9".into(),
            ..Default::default()
        })
        .unwrap();
        let backend = HttpBackend::new(Arc::new(endpoints), Duration::from_secs(2)).unwrap();

        let err = backend.fetch_mode().await.unwrap_err();
        assert!(err.is_connectivity(), "unexpected error: {err}");
    }
}

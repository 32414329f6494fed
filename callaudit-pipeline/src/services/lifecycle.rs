//! Compute lifecycle client
//!
//! The GPU device is the one truly exclusive shared resource; this
//! module is its sole mutation point. Orchestrator and dispatcher never
//! talk to the container runtime directly; they go through the
//! `ComputeLifecycle` contract, so a single-host Docker backend and the
//! remote HTTP-proxied mediator are interchangeable.
//!
//! Of the mutually-exclusive GPU service group, at most one member may
//! run at a time: callers stop the previous occupant and await
//! readiness before starting the next.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Lifecycle client errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Mediator error {0}: {1}")]
    Mediator(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Start/stop/query contract for named GPU worker services
#[async_trait]
pub trait ComputeLifecycle: Send + Sync {
    /// Start the named service on every worker host
    async fn start(&self, name: &str) -> Result<(), LifecycleError>;

    /// Stop the named service on every worker host
    async fn stop(&self, name: &str) -> Result<(), LifecycleError>;

    /// Whether the service is running on at least one host
    async fn is_running(&self, name: &str) -> Result<bool, LifecycleError>;

    /// Wait until the service is ready to take requests
    ///
    /// Default behavior is a fixed warm-up delay; implementations backed
    /// by a real readiness probe can override. Callers always go through
    /// this instead of sleeping themselves.
    async fn wait_until_ready(&self, name: &str, timeout: Duration) -> Result<(), LifecycleError> {
        let _ = name;
        tokio::time::sleep(timeout).await;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ContainerRequest<'a> {
    container_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    is_running: bool,
}

/// HTTP client for the mediator service on each GPU host
pub struct MediatorClient {
    http_client: reqwest::Client,
    hosts: Vec<String>,
    port: u16,
}

impl MediatorClient {
    pub fn new(hosts: Vec<String>, port: u16, timeout: Duration) -> Result<Self, LifecycleError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LifecycleError::Network(e.to_string()))?;
        Ok(Self {
            http_client,
            hosts,
            port,
        })
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    fn base_url(&self, host: &str) -> String {
        format!("http://{}:{}", host, self.port)
    }

    async fn post_container(
        &self,
        host: &str,
        action: &str,
        name: &str,
    ) -> Result<serde_json::Value, LifecycleError> {
        let url = format!("{}/{}", self.base_url(host), action);
        let response = self
            .http_client
            .post(&url)
            .json(&ContainerRequest { container_name: name })
            .send()
            .await
            .map_err(|e| LifecycleError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LifecycleError::Mediator(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| LifecycleError::Parse(e.to_string()))
    }

    /// Upload an intake file to a specific GPU host
    pub async fn upload_file(
        &self,
        host: &str,
        file_path: &std::path::Path,
        file_name: &str,
    ) -> Result<(), LifecycleError> {
        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|e| LifecycleError::Network(e.to_string()))?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}/upload_file", self.base_url(host));
        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| LifecycleError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LifecycleError::Mediator(status.as_u16(), body));
        }
        Ok(())
    }
}

#[async_trait]
impl ComputeLifecycle for MediatorClient {
    async fn start(&self, name: &str) -> Result<(), LifecycleError> {
        for host in &self.hosts {
            match self.post_container(host, "start_container", name).await {
                Ok(_) => tracing::info!(host = %host, container = %name, "Container started"),
                Err(e) => {
                    tracing::error!(host = %host, container = %name, error = %e, "Start failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), LifecycleError> {
        // A host that has nothing to stop is not an error; keep going so
        // one unreachable worker can't leave the rest holding the GPU.
        for host in &self.hosts {
            match self.post_container(host, "stop_container", name).await {
                Ok(_) => tracing::info!(host = %host, container = %name, "Container stopped"),
                Err(e) => {
                    tracing::warn!(host = %host, container = %name, error = %e, "Stop failed")
                }
            }
        }
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool, LifecycleError> {
        for host in &self.hosts {
            let value = self.post_container(host, "container_status", name).await?;
            let status: StatusResponse = serde_json::from_value(value)
                .map_err(|e| LifecycleError::Parse(e.to_string()))?;
            if status.is_running {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

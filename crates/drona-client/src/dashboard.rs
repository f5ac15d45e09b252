//! Dashboard endpoints other than retriever execution.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use drona_config::DashboardConfig;
use drona_core::schema::Schema;
use drona_core::types::Environment;

use crate::error::{error_parts, ClientError};
use crate::transport::{HttpTransport, RequestBody, Transport, TransportReply, TransportRequest};
use crate::types::{ConfigStatus, EnvironmentEntry, HistoryRecord, PreviewResponse, SubmitResponse};

pub const ENVIRONMENTS_PATH: &str = "/jobs/composer/environments";
pub const SCHEMA_PATH: &str = "/jobs/composer/schema";
pub const PREVIEW_PATH: &str = "/jobs/composer/preview";
pub const SUBMIT_PATH: &str = "/jobs/composer/submit";
pub const HISTORY_PATH: &str = "/jobs/composer/history";

/// Client for one dashboard deployment.
#[derive(Clone)]
pub struct DashboardClient {
    transport: Arc<dyn Transport>,
    config: DashboardConfig,
}

impl DashboardClient {
    pub fn new(transport: Arc<dyn Transport>, config: DashboardConfig) -> Self {
        Self { transport, config }
    }

    pub fn from_config(config: &DashboardConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport), config.clone()))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub async fn environments(&self) -> Result<Vec<EnvironmentEntry>, ClientError> {
        let reply = self.send(TransportRequest::get(ENVIRONMENTS_PATH)).await?;
        let reply = expect_success(reply, "Failed to load environments")?;
        decode(&reply)
    }

    /// Fetch the form schema of an environment.
    pub async fn schema(&self, environment: &Environment) -> Result<Schema, ClientError> {
        let request = TransportRequest::get(format!("{SCHEMA_PATH}/{}", environment.env))
            .with_query(vec![("src".to_string(), environment.src.clone())]);
        let reply = self.send(request).await?;
        let reply = expect_success(reply, "Failed to load schema")?;
        let value: Value = decode(&reply)?;
        let schema = Schema::from_value(value)?;
        info!(
            env = %environment.env,
            entries = schema.entries.len(),
            "schema loaded"
        );
        Ok(schema)
    }

    /// Post the composed form for a job preview.
    pub async fn preview(&self, form: Vec<(String, String)>) -> Result<PreviewResponse, ClientError> {
        let request = TransportRequest::post(PREVIEW_PATH, RequestBody::Multipart(form));
        let reply = self.send(request).await?;
        if !reply.is_success() {
            return Err(ClientError::Status {
                status: reply.status,
                message: format!("Error {}. Try again!", reply.status),
                details: Value::String(reply.body),
            });
        }
        decode(&reply)
    }

    pub async fn submit(&self, form: Vec<(String, String)>) -> Result<SubmitResponse, ClientError> {
        let request = TransportRequest::post(SUBMIT_PATH, RequestBody::Multipart(form));
        let reply = self.send(request).await?;
        let reply = expect_success(reply, "Failed to submit job")?;
        decode(&reply)
    }

    pub async fn history(&self, job_id: &str) -> Result<HistoryRecord, ClientError> {
        let reply = self
            .send(TransportRequest::get(format!("{HISTORY_PATH}/{job_id}")))
            .await?;
        let reply = expect_success(reply, "Failed to load job history")?;
        decode(&reply)
    }

    pub async fn config_status(&self) -> Result<ConfigStatus, ClientError> {
        let reply = self
            .send(TransportRequest::get(self.config.status_url()))
            .await?;
        let reply = expect_success(reply, "Failed to check configuration status.")?;
        decode(&reply)
    }

    /// Persist the user's Drona directory. Succeeds only on `{status: "ok"}`.
    pub async fn save_drona_dir(&self, drona_dir: &str) -> Result<(), ClientError> {
        let request = TransportRequest::post(
            self.config.save_url(),
            RequestBody::Json(json!({ "drona_dir": drona_dir })),
        );
        let reply = self.send(request).await?;
        let reply = expect_success(reply, "Failed to save Drona directory.")?;
        let body: Value = decode(&reply)?;
        match body.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            _ => Err(ClientError::Response(
                body.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Failed to save Drona directory.")
                    .to_string(),
            )),
        }
    }

    async fn send(&self, request: TransportRequest) -> Result<TransportReply, ClientError> {
        debug!(path = %request.path, "dashboard call");
        self.transport.send(request).await
    }
}

fn expect_success(reply: TransportReply, fallback: &str) -> Result<TransportReply, ClientError> {
    if reply.is_success() {
        return Ok(reply);
    }
    let (message, details) = error_parts(&reply.body, fallback);
    Err(ClientError::Status {
        status: reply.status,
        message,
        details,
    })
}

fn decode<T: DeserializeOwned>(reply: &TransportReply) -> Result<T, ClientError> {
    serde_json::from_str(&reply.body).map_err(|e| ClientError::Response(e.to_string()))
}

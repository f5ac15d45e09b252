//! Composer Orchestrator.
//!
//! Owns the environment selection, the value store and the form session.
//! Changing the environment fetches its schema; preview and submit compose
//! a multipart form from the visible fields; rerun loads a history record,
//! waits for the schema of its environment and injects the stored values
//! by name.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use drona_client::{
    ClientError, DashboardClient, EnvironmentEntry, GateAction, HistoryRecord, PreviewResponse,
    SubmitResponse,
};
use drona_config::ComposerConfig;
use drona_core::error::{ErrorReport, ErrorSink, RetrieverError};
use drona_core::render::RenderedNode;
use drona_core::schema::FieldKind;
use drona_core::store::FieldValueStore;
use drona_core::types::{value_to_form_string, Environment, FieldIndex};

use crate::controller::{ControllerContext, ControllerSettings};
use crate::form::FormSession;

const DRIVER_PANE: &str = "driver";
const RUN_COMMAND_PANE: &str = "run_command";

#[derive(Debug, Error)]
pub enum ComposerError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Environment is required.")]
    EnvironmentRequired,
    #[error("schema for the selected environment is unavailable")]
    SchemaUnavailable,
    #[error("preview the job before submitting")]
    PreviewRequired,
}

/// User-facing side effects: blocking alerts and page reloads.
pub trait Notifier: Send + Sync {
    fn alert(&self, message: &str);
    fn reload(&self);
}

/// Sends alerts and reloads to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, message: &str) {
        warn!(message, "alert");
    }

    fn reload(&self) {
        info!("composer reload requested");
    }
}

/// Keeps alerts and counts reloads.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<String>>,
    reloads: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, message: &str) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(message.to_string());
        }
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Holds the latest structured error for display.
#[derive(Default)]
pub struct ErrorSlot {
    current: Mutex<Option<ErrorReport>>,
}

impl ErrorSlot {
    pub fn get(&self) -> Option<ErrorReport> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }
}

impl ErrorSink for ErrorSlot {
    fn report(&self, error: &RetrieverError) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(error.report());
        }
    }
}

/// Where the job runs and which job id the backend assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub location: String,
    pub picked_by_user: bool,
    pub drona_job_id: Option<String>,
}

/// One editable file shown after a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewPane {
    /// Form field name used when the pane is submitted.
    pub name: String,
    pub title: String,
    pub content: String,
    pub order: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreviewState {
    pub panes: Vec<PreviewPane>,
    pub messages: Value,
    pub script: Option<String>,
}

impl PreviewState {
    pub fn from_response(response: &PreviewResponse) -> Self {
        let mut panes = vec![PreviewPane {
            name: DRIVER_PANE.to_string(),
            title: "driver.sh".to_string(),
            content: response.driver.clone().unwrap_or_default(),
            order: -2,
        }];
        if let Some(script) = &response.script {
            panes.push(PreviewPane {
                name: RUN_COMMAND_PANE.to_string(),
                title: "template.txt".to_string(),
                content: script.clone(),
                order: -3,
            });
        }
        for (name, file) in &response.additional_files {
            panes.push(PreviewPane {
                name: name.clone(),
                title: file.preview_name.clone().unwrap_or_else(|| name.clone()),
                content: file.content.clone(),
                order: file.preview_order.unwrap_or(0),
            });
        }
        panes.sort_by_key(|pane| pane.order);
        Self {
            panes,
            messages: response.messages.clone(),
            script: response.script.clone(),
        }
    }

    pub fn pane_mut(&mut self, name: &str) -> Option<&mut PreviewPane> {
        self.panes.iter_mut().find(|pane| pane.name == name)
    }
}

pub struct Composer {
    config: Arc<ComposerConfig>,
    client: DashboardClient,
    store: Arc<FieldValueStore>,
    session: FormSession,
    notifier: Arc<dyn Notifier>,
    errors: Arc<ErrorSlot>,
    environment: Option<Environment>,
    environments: Vec<EnvironmentEntry>,
    schema_waiters: Vec<oneshot::Sender<()>>,
    run: RunState,
    preview: Option<PreviewState>,
}

impl Composer {
    pub fn new(
        config: Arc<ComposerConfig>,
        client: DashboardClient,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = Arc::new(FieldValueStore::new());
        let errors = Arc::new(ErrorSlot::default());
        let context = ControllerContext {
            client: client.clone(),
            store: store.clone(),
            error_sink: errors.clone(),
            settings: ControllerSettings::from(config.form()),
        };
        let run = RunState {
            location: config.dashboard().default_run_location(),
            ..RunState::default()
        };
        Self {
            config,
            client,
            store,
            session: FormSession::new(context),
            notifier,
            errors,
            environment: None,
            environments: Vec::new(),
            schema_waiters: Vec::new(),
            run,
            preview: None,
        }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn client(&self) -> &DashboardClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<FieldValueStore> {
        &self.store
    }

    pub fn session(&self) -> &FormSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut FormSession {
        &mut self.session
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    pub fn environments(&self) -> &[EnvironmentEntry] {
        &self.environments
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    pub fn preview_state(&self) -> Option<&PreviewState> {
        self.preview.as_ref()
    }

    pub fn preview_state_mut(&mut self) -> Option<&mut PreviewState> {
        self.preview.as_mut()
    }

    /// Latest error reported by a schema fetch or a dynamic field.
    pub fn error(&self) -> Option<ErrorReport> {
        self.errors.get()
    }

    pub async fn load_environments(&mut self) -> Result<&[EnvironmentEntry], ComposerError> {
        self.environments = self.client.environments().await?;
        debug!(count = self.environments.len(), "environments loaded");
        Ok(&self.environments)
    }

    /// Resolves once a schema for the current selection is installed.
    /// Dropped without a value when the schema fetch fails.
    pub fn schema_loaded(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.environment.is_some() && self.session.schema().is_some() {
            let _ = tx.send(());
        } else {
            self.schema_waiters.push(tx);
        }
        rx
    }

    /// Select an environment and fetch its schema. Returns true when a new
    /// schema was installed.
    pub async fn set_environment(&mut self, environment: Environment) -> bool {
        if self.environment.as_ref() == Some(&environment) && self.session.schema().is_some() {
            self.resolve_waiters();
            return false;
        }
        info!(env = %environment.env, src = %environment.src, "environment selected");
        self.environment = Some(environment.clone());
        self.store.set_environment(Some(environment.clone()));
        self.run.drona_job_id = None;
        self.preview = None;
        self.errors.clear();

        match self.client.schema(&environment).await {
            Ok(schema) => {
                self.session.load_schema(schema);
                self.resolve_waiters();
                true
            }
            Err(error) => {
                warn!(env = %environment.env, error = %error, "schema fetch failed");
                self.errors.report(&error.to_retriever_error());
                self.session.clear();
                self.schema_waiters.clear();
                false
            }
        }
    }

    fn resolve_waiters(&mut self) {
        for waiter in self.schema_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Re-open a prior job: select its environment, wait for the schema,
    /// then restore the stored values by field name.
    pub async fn hydrate(&mut self, record: &HistoryRecord) -> Result<(), ComposerError> {
        let environment = record
            .environment()
            .ok_or(ComposerError::EnvironmentRequired)?;
        let loaded = self.schema_loaded();
        self.set_environment(environment).await;
        loaded
            .await
            .map_err(|_| ComposerError::SchemaUnavailable)?;
        self.session.set_values_by_name(&record.form_data);
        info!(
            job_id = record.job_id.as_deref().unwrap_or_default(),
            values = record.form_data.len(),
            "job values restored"
        );
        Ok(())
    }

    pub async fn rerun(&mut self, job_id: &str) -> Result<HistoryRecord, ComposerError> {
        let record = self.client.history(job_id).await?;
        self.hydrate(&record).await?;
        Ok(record)
    }

    pub fn set_run_location(&mut self, location: impl Into<String>) {
        self.run.location = location.into();
        self.run.picked_by_user = true;
    }

    /// Multipart fields for a preview: every visible named value, the
    /// environment, the run location and the reused job id.
    pub fn preview_form(&self) -> Result<Vec<(String, String)>, ComposerError> {
        let environment = self
            .environment
            .as_ref()
            .filter(|environment| !environment.env.is_empty())
            .ok_or(ComposerError::EnvironmentRequired)?;

        let values = self.store.snapshot();
        let layout = self.session.layout();
        let mut form = Vec::new();
        for index in layout.visible_leaf_indices(&values) {
            let Some(field) = layout.field(index) else {
                continue;
            };
            if !posts_value(&field.node.kind) {
                continue;
            }
            let (Some(name), Some(value)) = (field.name(), values.get(index)) else {
                continue;
            };
            push_value(&mut form, name, value);
        }

        form.push(("runtime".to_string(), environment.env.clone()));
        form.push(("env_dir".to_string(), environment.src.clone()));
        form.push(("location".to_string(), self.run.location.clone()));
        form.push((
            "location_was_picked_by_user".to_string(),
            if self.run.picked_by_user { "1" } else { "0" }.to_string(),
        ));
        if let Some(job_id) = &self.run.drona_job_id {
            form.push(("drona_job_id".to_string(), job_id.clone()));
        }
        Ok(form)
    }

    /// Request a preview. Failures raise an alert and leave the previous
    /// preview untouched.
    pub async fn preview(&mut self) -> Result<&PreviewState, ComposerError> {
        let form = match self.preview_form() {
            Ok(form) => form,
            Err(error) => {
                self.notifier.alert(&error.to_string());
                return Err(error);
            }
        };
        let response = match self.client.preview(form).await {
            Ok(response) => response,
            Err(error) => {
                self.notifier.alert(&alert_message(&error));
                return Err(error.into());
            }
        };

        self.run.drona_job_id = response.drona_job_id.clone();
        if let Some(location) = response.location.as_ref().filter(|l| !l.is_empty()) {
            self.run.location = location.clone();
        }
        let preview = PreviewState::from_response(&response);
        info!(
            panes = preview.panes.len(),
            drona_job_id = self.run.drona_job_id.as_deref().unwrap_or_default(),
            "preview ready"
        );
        Ok(self.preview.insert(preview))
    }

    /// Submit the previewed job. The composer resets afterwards whatever
    /// the outcome.
    pub async fn submit(&mut self) -> Result<SubmitResponse, ComposerError> {
        let result = self.submit_inner().await;
        match &result {
            Ok(response) => info!(
                drona_job_id = response.drona_job_id.as_deref().unwrap_or_default(),
                "job submitted"
            ),
            Err(error) => {
                warn!(error = %error, "submit failed");
                self.notifier.alert(&composer_alert(error));
            }
        }
        self.reset();
        self.notifier.reload();
        result
    }

    async fn submit_inner(&self) -> Result<SubmitResponse, ComposerError> {
        let preview = self.preview.as_ref().ok_or(ComposerError::PreviewRequired)?;
        if self.run.drona_job_id.is_none() {
            return Err(ComposerError::PreviewRequired);
        }
        let mut form = self.preview_form()?;
        for pane in &preview.panes {
            form.push((pane.name.clone(), pane.content.clone()));
        }
        Ok(self.client.submit(form).await?)
    }

    /// Run the configuration status check.
    pub async fn config_gate(&self) -> Result<GateAction, ComposerError> {
        let status = self.client.config_status().await?;
        let action = status.gate_action();
        debug!(?action, "configuration gate evaluated");
        Ok(action)
    }

    /// Save the Drona directory; reloads on success, alerts on failure.
    pub async fn save_drona_dir(&self, drona_dir: &str) -> Result<(), ComposerError> {
        match self.client.save_drona_dir(drona_dir).await {
            Ok(()) => {
                info!(drona_dir, "drona directory saved");
                self.notifier.reload();
                Ok(())
            }
            Err(error) => {
                self.notifier.alert(&alert_message(&error));
                Err(error.into())
            }
        }
    }

    pub fn render(&mut self) -> Vec<RenderedNode> {
        self.session.render()
    }

    pub fn update_value(&mut self, index: FieldIndex, value: Value) {
        self.session.update_value(index, value);
    }

    /// Back to a blank composer: no environment, no form, default location.
    pub fn reset(&mut self) {
        self.session.clear();
        self.store.set_environment(None);
        self.environment = None;
        self.schema_waiters.clear();
        self.preview = None;
        self.errors.clear();
        self.run = RunState {
            location: self.config.dashboard().default_run_location(),
            ..RunState::default()
        };
    }
}

/// Display-only and hidden fields are not posted.
fn posts_value(kind: &FieldKind) -> bool {
    !matches!(
        kind,
        FieldKind::StaticText | FieldKind::Hidden | FieldKind::DynamicViewer
    )
}

/// Arrays post one entry per element, like a multi-select form control.
fn push_value(form: &mut Vec<(String, String)>, name: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                form.push((name.to_string(), value_to_form_string(item)));
            }
        }
        other => form.push((name.to_string(), value_to_form_string(other))),
    }
}

fn alert_message(error: &ClientError) -> String {
    match error {
        ClientError::Status { message, .. } => message.clone(),
        ClientError::Http(_) => "An error has occurred. Please try again!".to_string(),
        other => other.to_string(),
    }
}

fn composer_alert(error: &ComposerError) -> String {
    match error {
        ComposerError::Client(error) => alert_message(error),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drona_client::AdditionalFile;
    use serde_json::json;

    fn file(content: &str, order: Option<i64>) -> AdditionalFile {
        AdditionalFile {
            content: content.to_string(),
            preview_name: None,
            preview_order: order,
        }
    }

    #[test]
    fn test_preview_panes_are_ordered() {
        let mut response = PreviewResponse {
            script: Some("mpirun vasp".to_string()),
            driver: Some("#!/bin/bash".to_string()),
            messages: json!(["ok"]),
            ..PreviewResponse::default()
        };
        response
            .additional_files
            .insert("input.yaml".to_string(), file("a: 1", Some(1)));
        response
            .additional_files
            .insert("notes.txt".to_string(), file("n", None));
        let preview = PreviewState::from_response(&response);
        let names: Vec<&str> = preview.panes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["run_command", "driver", "notes.txt", "input.yaml"]);
        assert_eq!(preview.panes[0].title, "template.txt");
        assert_eq!(preview.panes[2].title, "notes.txt");
    }

    #[test]
    fn test_preview_without_script_has_no_run_command() {
        let response = PreviewResponse {
            driver: Some("#!/bin/bash".to_string()),
            ..PreviewResponse::default()
        };
        let preview = PreviewState::from_response(&response);
        assert_eq!(preview.panes.len(), 1);
        assert_eq!(preview.panes[0].name, "driver");
    }

    #[test]
    fn test_push_value_repeats_arrays() {
        let mut form = Vec::new();
        push_value(&mut form, "modules", &json!(["gcc", "openmpi"]));
        push_value(&mut form, "partition", &json!({"value": "gpu", "label": "GPU"}));
        push_value(&mut form, "cores", &json!(8));
        assert_eq!(
            form,
            vec![
                ("modules".to_string(), "gcc".to_string()),
                ("modules".to_string(), "openmpi".to_string()),
                ("partition".to_string(), "gpu".to_string()),
                ("cores".to_string(), "8".to_string()),
            ]
        );
    }

    #[test]
    fn test_error_slot_keeps_latest_report() {
        let slot = ErrorSlot::default();
        slot.report(&RetrieverError::network("down"));
        slot.report(&RetrieverError::configuration("Retriever path is not set"));
        let report = slot.get().expect("report");
        assert_eq!(report.message, "Retriever path is not set");
        assert_eq!(report.status_code, 400);
        slot.clear();
        assert!(slot.get().is_none());
    }
}

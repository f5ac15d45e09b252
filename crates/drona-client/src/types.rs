//! Dashboard payloads.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use drona_core::types::Environment;

/// One row of `/jobs/composer/environments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentEntry {
    pub env: String,
    pub src: String,
    #[serde(default)]
    pub is_user_env: bool,
}

impl EnvironmentEntry {
    pub fn environment(&self) -> Environment {
        Environment::new(self.env.clone(), self.src.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalFile {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub preview_name: Option<String>,
    #[serde(default)]
    pub preview_order: Option<i64>,
}

/// History records sometimes store an additional file as bare content.
fn additional_files<'de, D>(deserializer: D) -> Result<IndexMap<String, AdditionalFile>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        File(AdditionalFile),
        Content(String),
    }

    let raw: Option<IndexMap<String, Repr>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, repr)| {
            let file = match repr {
                Repr::File(file) => file,
                Repr::Content(content) => AdditionalFile {
                    content,
                    ..AdditionalFile::default()
                },
            };
            (name, file)
        })
        .collect())
}

/// Job ids arrive as strings or numbers depending on the backend version.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `/jobs/composer/preview` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default, deserialize_with = "additional_files")]
    pub additional_files: IndexMap<String, AdditionalFile>,
    #[serde(default)]
    pub messages: Value,
    #[serde(default, deserialize_with = "lenient_id")]
    pub drona_job_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// `/jobs/composer/submit` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub bash_cmd: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub drona_job_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub env_name: Option<String>,
    #[serde(default)]
    pub env_dir: Option<String>,
}

/// A prior submission, as stored in the job history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default, deserialize_with = "lenient_id")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Environment name the job was composed with.
    #[serde(default)]
    pub runtime: Option<String>,
    /// Source directory of that environment.
    #[serde(default)]
    pub env_dir: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default, deserialize_with = "additional_files")]
    pub additional_files: IndexMap<String, AdditionalFile>,
    #[serde(default)]
    pub form_data: Map<String, Value>,
}

impl HistoryRecord {
    pub fn environment(&self) -> Option<Environment> {
        match (&self.runtime, &self.env_dir) {
            (Some(env), Some(src)) => Some(Environment::new(env.clone(), src.clone())),
            _ => None,
        }
    }
}

/// `{status_url}` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigStatus {
    #[serde(default)]
    pub missing_config: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub notice: Option<String>,
    #[serde(default)]
    pub drona_dir: Option<String>,
}

/// What the configuration gate should do with a status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    /// No usable Drona directory; the user must pick one.
    SelectNeeded { reason: String },
    /// Ready, with a banner explaining a migration.
    Migrated { drona_dir: String, notice: String },
    Ready { drona_dir: String },
}

impl ConfigStatus {
    pub fn gate_action(&self) -> GateAction {
        if self.missing_config {
            return GateAction::SelectNeeded {
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Configuration not found.".to_string()),
            };
        }
        let drona_dir = self.drona_dir.clone().unwrap_or_default();
        match &self.notice {
            Some(notice) => GateAction::Migrated {
                drona_dir,
                notice: notice.clone(),
            },
            None => GateAction::Ready { drona_dir },
        }
    }
}

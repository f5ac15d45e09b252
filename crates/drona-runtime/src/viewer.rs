//! Viewer configuration: static config, fetched data merge and CDN checks.

use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};

use drona_core::schema::SchemaNode;

/// Hosts a viewer may load scripts from; subdomains are accepted too.
pub const APPROVED_SOURCES: [&str; 12] = [
    "cdn.jsdelivr.net",
    "unpkg.com",
    "cdnjs.cloudflare.com",
    "3dmol.csb.pitt.edu",
    "cdn.plot.ly",
    "files.rcsb.org",
    "d3js.org",
    "alphafold.ebi.ac.uk",
    "pubchem.ncbi.nlm.nih.gov",
    "rest.uniprot.org",
    "www.rcsb.org",
    "www.ebi.ac.uk",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedLibrary {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CdnValidation {
    pub valid: Vec<String>,
    pub blocked: Vec<BlockedLibrary>,
}

/// Check `cdnLibraries` (a string or an array of strings).
pub fn validate_cdn_libraries(libraries: Option<&Value>) -> CdnValidation {
    let urls: Vec<String> = match libraries {
        Some(Value::String(url)) => vec![url.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(url) => url.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut validation = CdnValidation::default();
    for url in urls {
        match check_library(&url) {
            Ok(()) => validation.valid.push(url),
            Err(reason) => validation.blocked.push(BlockedLibrary {
                url,
                reason: reason.to_string(),
            }),
        }
    }
    validation
}

fn check_library(url: &str) -> Result<(), &'static str> {
    let parsed = Url::parse(url).map_err(|_| "Invalid URL format")?;
    if parsed.scheme() != "https" {
        return Err("Non-HTTPS protocol not allowed");
    }
    let host = parsed.host_str().ok_or("Invalid URL format")?;
    let approved = APPROVED_SOURCES
        .iter()
        .any(|source| host == *source || host.ends_with(&format!(".{source}")));
    if approved {
        Ok(())
    } else {
        Err("CDN domain not in approved list")
    }
}

/// Static viewer config from the node's `value` (object or JSON text).
pub fn static_config(node: &SchemaNode) -> Value {
    match &node.value {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(Map::new()),
        },
        _ => Value::Object(Map::new()),
    }
}

/// Config with fetched data under `data`. A null fetch result keeps the
/// static `data`, or `{}` when there is none.
pub fn merge_data(config: &Value, fetched: &Value) -> Value {
    let mut merged = match config {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let data = if fetched.is_null() {
        merged
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    } else {
        fetched.clone()
    };
    merged.insert("data".to_string(), data);
    Value::Object(merged)
}

/// Inline warning listing blocked libraries.
pub fn blocked_warning(blocked: &[BlockedLibrary]) -> Option<String> {
    if blocked.is_empty() {
        return None;
    }
    let reasons: Vec<String> = blocked
        .iter()
        .map(|b| format!("{} ({})", b.url, b.reason))
        .collect();
    Some(format!(
        "The following CDN libraries were blocked for security: {}",
        reasons.join("; ")
    ))
}

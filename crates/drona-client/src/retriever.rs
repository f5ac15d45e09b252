//! Retriever Invocation Client.
//!
//! A retriever call is one GET to `/jobs/composer/evaluate_script`. The
//! query carries `retriever_path` first, then the environment pair, then
//! every parameter JSON-encoded. `$name` parameters are looked up in the
//! form values by field name and left out when the field has no value.

use serde_json::Value;
use tracing::{debug, warn};

use drona_core::error::{ErrorSink, RetrieverError};
use drona_core::params::{field_reference, RetrieverParams};
use drona_core::store::FormValues;
use drona_core::types::Environment;

use crate::dashboard::DashboardClient;
use crate::error::error_parts;
use crate::transport::TransportRequest;

pub const EVALUATE_SCRIPT_PATH: &str = "/jobs/composer/evaluate_script";
pub const ENV_DIR_PARAM: &str = "DRONA_ENV_DIR";
pub const ENV_NAME_PARAM: &str = "DRONA_ENV_NAME";

const MISSING_PATH_MESSAGE: &str = "Retriever path is not set";
const GENERIC_FAILURE_MESSAGE: &str = "Failed to execute script";

/// Inputs of one retriever invocation. Built fresh for every fetch.
#[derive(Debug, Clone)]
pub struct ScriptCall<'a> {
    pub retriever_path: Option<&'a str>,
    pub retriever_params: Option<&'a RetrieverParams>,
    pub form_values: &'a FormValues,
    pub parse_json: bool,
    /// Overrides the environment held by `form_values`.
    pub environment: Option<&'a Environment>,
    /// Literal parameters appended after `retriever_params`.
    pub extra_params: Vec<(String, Value)>,
}

impl<'a> ScriptCall<'a> {
    pub fn new(retriever_path: Option<&'a str>, form_values: &'a FormValues) -> Self {
        Self {
            retriever_path,
            retriever_params: None,
            form_values,
            parse_json: false,
            environment: None,
            extra_params: Vec::new(),
        }
    }

    pub fn params(mut self, params: Option<&'a RetrieverParams>) -> Self {
        self.retriever_params = params;
        self
    }

    pub fn parse_json(mut self, parse_json: bool) -> Self {
        self.parse_json = parse_json;
        self
    }

    pub fn environment(mut self, environment: Option<&'a Environment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn extra_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_params.push((key.into(), value));
        self
    }

    fn effective_environment(&self) -> Option<&Environment> {
        self.environment.or_else(|| self.form_values.environment())
    }
}

/// Query pairs for a call, excluding `retriever_path`.
pub fn resolve_params(call: &ScriptCall<'_>) -> Vec<(String, String)> {
    let mut query = Vec::new();

    if let Some(environment) = call.effective_environment().filter(|e| e.is_complete()) {
        query.push((ENV_DIR_PARAM.to_string(), environment.env_dir()));
        query.push((ENV_NAME_PARAM.to_string(), environment.env.clone()));
    }

    if let Some(params) = call.retriever_params {
        for (key, value) in params {
            match field_reference(value) {
                Some(name) => match call.form_values.get_by_name(name) {
                    Some(current) => query.push((key.clone(), current.to_string())),
                    None => debug!(param = %key, field = name, "omitting unresolved parameter"),
                },
                None => query.push((key.clone(), value.to_string())),
            }
        }
    }

    for (key, value) in &call.extra_params {
        query.push((key.clone(), value.to_string()));
    }
    query
}

impl DashboardClient {
    /// Run a retriever script. Every failure is handed to `on_error` before
    /// it is returned.
    pub async fn execute_script(
        &self,
        call: &ScriptCall<'_>,
        on_error: &dyn ErrorSink,
    ) -> Result<Value, RetrieverError> {
        let result = self.execute_script_inner(call).await;
        if let Err(error) = &result {
            warn!(
                retriever = call.retriever_path.unwrap_or_default(),
                status = error.status_code(),
                error = %error,
                "retriever failed"
            );
            on_error.report(error);
        }
        result
    }

    async fn execute_script_inner(&self, call: &ScriptCall<'_>) -> Result<Value, RetrieverError> {
        let path = call
            .retriever_path
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| RetrieverError::configuration(MISSING_PATH_MESSAGE))?;

        let mut query = vec![("retriever_path".to_string(), path.to_string())];
        query.extend(resolve_params(call));
        debug!(retriever = path, params = query.len() - 1, "executing retriever");

        let reply = self
            .transport()
            .send(TransportRequest::get(EVALUATE_SCRIPT_PATH).with_query(query))
            .await
            .map_err(|e| RetrieverError::network(e.to_string()))?;

        if !reply.is_success() {
            let (message, details) = error_parts(&reply.body, GENERIC_FAILURE_MESSAGE);
            return Err(RetrieverError::Backend {
                message,
                status_code: reply.status,
                details,
            });
        }

        if call.parse_json {
            serde_json::from_str(&reply.body)
                .map_err(|e| RetrieverError::network(format!("invalid JSON from retriever: {e}")))
        } else {
            Ok(serde_json::from_str(&reply.body).unwrap_or(Value::String(reply.body)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::{MockTransport, TransportReply};
    use drona_core::error::CollectingErrorSink;
    use drona_core::store::FieldValueStore;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> RetrieverParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn client(mock: Arc<MockTransport>) -> DashboardClient {
        DashboardClient::new(mock, Default::default())
    }

    #[test]
    fn test_resolve_params_omits_unresolved_and_encodes_json() {
        let store = FieldValueStore::new();
        store.update_named("region", json!("us"));
        store.update_named("count", json!(4));
        let values = store.snapshot();
        let p = params(&[
            ("region", json!("$region")),
            ("missing", json!("$nothing")),
            ("kind", json!("production")),
            ("count", json!("$count")),
            ("flags", json!(["a"])),
        ]);
        let call = ScriptCall::new(Some("r.sh"), &values).params(Some(&p));
        assert_eq!(
            resolve_params(&call),
            vec![
                ("region".to_string(), "\"us\"".to_string()),
                ("kind".to_string(), "\"production\"".to_string()),
                ("count".to_string(), "4".to_string()),
                ("flags".to_string(), "[\"a\"]".to_string()),
            ]
        );
    }

    #[test]
    fn test_resolve_params_injects_complete_environment_only() {
        let store = FieldValueStore::new();
        store.set_environment(Some(Environment::new("vasp", "/sw/envs")));
        let values = store.snapshot();
        let call = ScriptCall::new(Some("r.sh"), &values);
        assert_eq!(
            resolve_params(&call),
            vec![
                (ENV_DIR_PARAM.to_string(), "/sw/envs/vasp".to_string()),
                (ENV_NAME_PARAM.to_string(), "vasp".to_string()),
            ]
        );

        let partial = Environment::new("vasp", "");
        let call = ScriptCall::new(Some("r.sh"), &values).environment(Some(&partial));
        assert!(resolve_params(&call).is_empty());
    }

    #[test]
    fn test_missing_path_reports_without_network() {
        tokio_test::block_on(async {
            let mock = Arc::new(MockTransport::scripted(vec![]));
            let sink = CollectingErrorSink::new();
            let values = FormValues::default();
            let result = client(mock.clone())
                .execute_script(&ScriptCall::new(None, &values), &sink)
                .await;
            assert_eq!(
                result,
                Err(RetrieverError::configuration("Retriever path is not set"))
            );
            assert_eq!(sink.errors().len(), 1);
            assert!(mock.requests().is_empty());
        });
    }

    #[test]
    fn test_success_sends_single_get_with_path_first() {
        tokio_test::block_on(async {
            let mock = Arc::new(MockTransport::scripted(vec![TransportReply::ok(
                r#"[{"value":"a","label":"A"}]"#,
            )]));
            let values = FormValues::default();
            let p = params(&[("kind", json!("gpu"))]);
            let call = ScriptCall::new(Some("retrievers/nodes.sh"), &values)
                .params(Some(&p))
                .parse_json(true);
            let result = client(mock.clone())
                .execute_script(&call, &CollectingErrorSink::new())
                .await
                .expect("result");
            assert_eq!(result[0]["value"], "a");

            let requests = mock.requests();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].path, EVALUATE_SCRIPT_PATH);
            assert_eq!(requests[0].query[0].0, "retriever_path");
            assert_eq!(requests[0].query_value("retriever_path"), Some("retrievers/nodes.sh"));
            assert_eq!(requests[0].query_value("kind"), Some("\"gpu\""));
        });
    }

    #[test]
    fn test_text_mode_upgrades_json_and_keeps_plain_text() {
        tokio_test::block_on(async {
            let mock = Arc::new(MockTransport::scripted(vec![
                TransportReply::ok("{\"n\": 1}"),
                TransportReply::ok("module load gcc"),
            ]));
            let values = FormValues::default();
            let call = ScriptCall::new(Some("r.sh"), &values);
            let client = client(mock);
            let sink = CollectingErrorSink::new();
            assert_eq!(
                client.execute_script(&call, &sink).await,
                Ok(json!({"n": 1}))
            );
            assert_eq!(
                client.execute_script(&call, &sink).await,
                Ok(json!("module load gcc"))
            );
        });
    }

    #[test]
    fn test_backend_error_is_structured_and_reported() {
        tokio_test::block_on(async {
            let mock = Arc::new(MockTransport::scripted(vec![
                TransportReply::status(422, r#"{"message":"bad region","details":"no such region"}"#),
                TransportReply::status(500, "Internal Server Error"),
            ]));
            let values = FormValues::default();
            let call = ScriptCall::new(Some("r.sh"), &values);
            let client = client(mock);
            let sink = CollectingErrorSink::new();

            let first = client.execute_script(&call, &sink).await;
            assert_eq!(
                first,
                Err(RetrieverError::Backend {
                    message: "bad region".to_string(),
                    status_code: 422,
                    details: json!("no such region"),
                })
            );
            let second = client.execute_script(&call, &sink).await;
            assert!(matches!(
                second,
                Err(RetrieverError::Backend { ref message, status_code: 500, .. })
                    if message == "Failed to execute script"
            ));
            assert_eq!(sink.errors().len(), 2);
        });
    }

    #[test]
    fn test_parse_json_mode_rejects_text() {
        tokio_test::block_on(async {
            let mock = Arc::new(MockTransport::scripted(vec![TransportReply::ok("oops")]));
            let values = FormValues::default();
            let call = ScriptCall::new(Some("r.sh"), &values).parse_json(true);
            let sink = CollectingErrorSink::new();
            let result = client(mock).execute_script(&call, &sink).await;
            assert!(matches!(result, Err(RetrieverError::Network { .. })));
            assert_eq!(sink.errors().len(), 1);
        });
    }
}

//! # Drona Client
//!
//! Talks to the dashboard backend: retriever script execution, environment
//! listing, schema fetch, job preview/submit/history and the configuration
//! gate. All HTTP goes through the [`Transport`] seam so controllers and
//! the composer can run against [`MockTransport`] in tests.

pub mod dashboard;
pub mod error;
pub mod retriever;
pub mod transport;
pub mod types;

pub use dashboard::DashboardClient;
pub use error::ClientError;
pub use retriever::{resolve_params, ScriptCall};
pub use transport::{
    HttpTransport, Method, MockTransport, RequestBody, Transport, TransportReply,
    TransportRequest,
};
pub use types::{
    AdditionalFile, ConfigStatus, EnvironmentEntry, GateAction, HistoryRecord, PreviewResponse,
    SubmitResponse,
};

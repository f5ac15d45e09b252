//! # Drona Core
//!
//! Core model and deterministic logic for the Drona form engine.
//!
//! This crate contains:
//! - Schema node definitions and parsing
//! - Field index allocation over nested containers
//! - The observable field value store
//! - Conditional visibility and the schema tree renderer
//!
//! This crate does NOT care about:
//! - How retriever scripts are reached over the network
//! - When dynamic fields refetch
//! - How rendered nodes are drawn

pub mod condition;
pub mod error;
pub mod layout;
pub mod params;
pub mod render;
pub mod schema;
pub mod store;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::condition::Condition;
    pub use crate::error::{
        CollectingErrorSink, ErrorReport, ErrorSink, NoopErrorSink, RetrieverError, SchemaError,
    };
    pub use crate::layout::{allocate, span_of, FieldRef, FormLayout, Slot};
    pub use crate::params::{dependency_names, RetrieverParams};
    pub use crate::render::{
        render, rendered_fields, visible_entries, Collapsible, Direction, FieldBinding,
        LiveFieldSource, LivePhase, LiveView, NoLiveFields, RenderedField, RenderedNode,
        VisibleEntry,
    };
    pub use crate::schema::{FieldKind, Schema, SchemaEntry, SchemaNode};
    pub use crate::store::{FieldValueStore, FormValues};
    pub use crate::types::{Environment, FieldIndex, OptionItem};
}

pub use error::{ErrorSink, RetrieverError, SchemaError};
pub use layout::{FieldRef, FormLayout};
pub use schema::{FieldKind, Schema, SchemaEntry, SchemaNode};
pub use store::{FieldValueStore, FormValues};
pub use types::{Environment, FieldIndex, OptionItem};

//! # Drona Runtime
//!
//! The live side of the form engine:
//! - [`controller`]: one task per mounted dynamic field
//! - [`form`]: schema installation and controller mounting
//! - [`composer`]: environment, preview, submit and rerun orchestration
//! - [`bootstrap`]: tracing setup and construction from `drona.yaml`

pub mod bootstrap;
pub mod composer;
pub mod controller;
pub mod form;
pub mod viewer;

pub use bootstrap::{init_tracing, BootstrapError, ComposerBootstrap};
pub use composer::{
    Composer, ComposerError, ErrorSlot, LogNotifier, Notifier, PreviewPane, PreviewState,
    RecordingNotifier, RunState,
};
pub use controller::{
    ControllerContext, ControllerSettings, ControllerState, DynamicFieldController, FieldStrategy,
    STALE_SELECTION_WARNING,
};
pub use form::FormSession;
pub use viewer::{validate_cdn_libraries, BlockedLibrary, CdnValidation};

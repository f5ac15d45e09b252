//! Dynamic Field Controller.
//!
//! One controller per mounted dynamic field, parameterized by a
//! [`FieldStrategy`]. Each controller is a tokio task that owns its state
//! and publishes snapshots over a `watch` channel. The task reacts to:
//! - commands from the handle (select, toggle, search, refetch, reset, shown)
//! - store changes (own value and `$name` dependencies)
//! - the debounce deadline and the optional refresh interval
//! - completion of in-flight fetches
//!
//! Every fetch and every scheduled refetch takes a new generation; results
//! from an older generation are dropped, so the last request wins.
//! Unmounting cancels the task; pending fetches are aborted with it and
//! nothing is published or written afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, sleep_until, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use drona_client::{DashboardClient, ScriptCall};
use drona_config::FormConfig;
use drona_core::error::{ErrorSink, RetrieverError};
use drona_core::params::{dependency_names, RetrieverParams};
use drona_core::render::{LivePhase, LiveView};
use drona_core::schema::{FieldKind, SchemaNode};
use drona_core::store::{FieldValueStore, FormValues};
use drona_core::types::{selection_key, value_to_form_string, FieldIndex, OptionItem};

use crate::viewer::{self, BlockedLibrary};

pub const STALE_SELECTION_WARNING: &str = "The previously selected option is no longer available";
pub const SEARCH_QUERY_PARAM: &str = "SEARCH_QUERY";

/// Per-kind behaviour of a dynamic field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStrategy {
    Select,
    Radio,
    Checkbox,
    Autocomplete,
    Hidden,
    Viewer,
}

impl FieldStrategy {
    pub fn for_kind(kind: &FieldKind) -> Option<Self> {
        match kind {
            FieldKind::DynamicSelect => Some(Self::Select),
            FieldKind::DynamicRadioGroup => Some(Self::Radio),
            FieldKind::DynamicCheckboxGroup => Some(Self::Checkbox),
            FieldKind::AutocompleteSelect => Some(Self::Autocomplete),
            FieldKind::Hidden => Some(Self::Hidden),
            FieldKind::DynamicViewer => Some(Self::Viewer),
            _ => None,
        }
    }

    /// Hidden fields accept plain text output.
    fn parse_json(self) -> bool {
        !matches!(self, Self::Hidden)
    }

    fn offers_options(self) -> bool {
        matches!(
            self,
            Self::Select | Self::Radio | Self::Checkbox | Self::Autocomplete
        )
    }

    /// Autocomplete only fetches on search.
    fn fetches_when_shown(self) -> bool {
        !matches!(self, Self::Autocomplete)
    }

    /// Select-style widgets keep a stale choice visible as an extra option.
    fn appends_unavailable(self) -> bool {
        matches!(self, Self::Select | Self::Autocomplete)
    }

    fn is_multi(self) -> bool {
        matches!(self, Self::Checkbox)
    }
}

/// Timing knobs, taken from the form configuration.
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub debounce: Duration,
    pub autocomplete_min_chars: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&FormConfig::default())
    }
}

impl From<&FormConfig> for ControllerSettings {
    fn from(config: &FormConfig) -> Self {
        Self {
            debounce: config.debounce(),
            autocomplete_min_chars: config.autocomplete_min_chars,
        }
    }
}

/// Everything a controller needs from its surroundings.
#[derive(Clone)]
pub struct ControllerContext {
    pub client: DashboardClient,
    pub store: Arc<FieldValueStore>,
    pub error_sink: Arc<dyn ErrorSink>,
    pub settings: ControllerSettings,
}

/// Published controller state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub phase: LivePhase,
    pub options: Vec<OptionItem>,
    /// Last fetch result (text or JSON); merged config for viewers.
    pub data: Option<Value>,
    /// The field's current value as held in the store.
    pub selection: Option<Value>,
    pub stale: bool,
    /// Selected entries missing from the current options.
    pub invalid: Vec<Value>,
    pub error: Option<RetrieverError>,
    pub query: String,
    /// Generation of the last applied fetch.
    pub generation: u64,
    pub blocked_libraries: Vec<BlockedLibrary>,
}

impl ControllerState {
    pub fn is_loading(&self) -> bool {
        self.phase == LivePhase::Loading
    }

    pub fn is_evaluated(&self) -> bool {
        self.phase == LivePhase::Evaluated
    }
}

#[derive(Debug)]
enum Command {
    SetShown(bool),
    Select(Value),
    Toggle(Value),
    Search(String),
    Refetch,
    Reset,
}

/// Handle to a running controller. Dropping it unmounts the controller.
pub struct DynamicFieldController {
    index: FieldIndex,
    strategy: FieldStrategy,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ControllerState>,
    cancel: CancellationToken,
}

impl DynamicFieldController {
    /// Spawn a controller for `node` at `index`. Returns `None` for kinds
    /// that are not dynamic.
    pub fn spawn(
        index: FieldIndex,
        node: &SchemaNode,
        shown: bool,
        context: ControllerContext,
    ) -> Option<Self> {
        let strategy = FieldStrategy::for_kind(&node.kind)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let setup = FieldSetup::new(strategy, node);
        let initial = setup.initial_state(&context.store.snapshot(), index);
        let (state_tx, state_rx) = watch::channel(initial);

        let task = FieldTask {
            index,
            strategy,
            setup,
            context,
            shown,
            commands: command_rx,
            state: state_tx,
            cancel: cancel.clone(),
            inflight: JoinSet::new(),
            requested: 0,
            pending: None,
            refresh: None,
            last_seen: HashMap::new(),
        };
        tokio::spawn(task.run());
        debug!(index, kind = node.kind.as_str(), "dynamic field mounted");

        Some(Self {
            index,
            strategy,
            commands: command_tx,
            state: state_rx,
            cancel,
        })
    }

    pub fn index(&self) -> FieldIndex {
        self.index
    }

    pub fn strategy(&self) -> FieldStrategy {
        self.strategy
    }

    pub fn state(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    /// User picked a value (whole value for checkbox groups).
    pub fn select(&self, value: Value) {
        self.send(Command::Select(value));
    }

    /// Checkbox groups: flip one option.
    pub fn toggle(&self, value: Value) {
        self.send(Command::Toggle(value));
    }

    /// Autocomplete input changed.
    pub fn search(&self, query: impl Into<String>) {
        self.send(Command::Search(query.into()));
    }

    pub fn refetch(&self) {
        self.send(Command::Refetch);
    }

    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    pub fn set_shown(&self, shown: bool) {
        self.send(Command::SetShown(shown));
    }

    pub fn unmount(&self) {
        if !self.cancel.is_cancelled() {
            debug!(index = self.index, "dynamic field unmounted");
            self.cancel.cancel();
        }
    }

    pub fn is_mounted(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Snapshot in the shape the renderer attaches to a field.
    pub fn live_view(&self) -> LiveView {
        live_view(self.strategy, &self.state.borrow())
    }

    fn send(&self, command: Command) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.commands.send(command).is_err() {
            trace!(index = self.index, "controller task already stopped");
        }
    }
}

impl Drop for DynamicFieldController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build the renderer's view of a controller state.
pub fn live_view(strategy: FieldStrategy, state: &ControllerState) -> LiveView {
    let mut options = state.options.clone();
    if state.stale && strategy.appends_unavailable() {
        for invalid in &state.invalid {
            options.push(unavailable_option(invalid));
        }
    }
    let warning = if state.stale {
        Some(STALE_SELECTION_WARNING.to_string())
    } else {
        viewer::blocked_warning(&state.blocked_libraries)
    };
    LiveView {
        phase: state.phase,
        options,
        stale: state.stale,
        warning,
        error: state.error.as_ref().map(RetrieverError::report),
        data: state.data.clone(),
    }
}

fn unavailable_option(selection: &Value) -> OptionItem {
    let label = match selection {
        Value::Object(map) => map
            .get("label")
            .map(value_to_form_string)
            .unwrap_or_else(|| value_to_form_string(selection)),
        other => value_to_form_string(other),
    };
    let mut option = OptionItem::new(
        selection_key(selection).clone(),
        format!("{label} (Unavailable)"),
    );
    option
        .extra
        .insert("isDeprecated".to_string(), Value::Bool(true));
    option
}

/// Retriever wiring resolved once at mount.
#[derive(Debug, Clone)]
struct FieldSetup {
    name: Option<String>,
    retriever_path: Option<String>,
    params: Option<RetrieverParams>,
    dependencies: Vec<String>,
    static_options: Vec<OptionItem>,
    static_value: Option<Value>,
    viewer_config: Option<Value>,
    refresh: Option<Duration>,
}

impl FieldSetup {
    fn new(strategy: FieldStrategy, node: &SchemaNode) -> Self {
        let viewer_config =
            (strategy == FieldStrategy::Viewer).then(|| viewer::static_config(node));
        let config_str = |key: &str| {
            viewer_config
                .as_ref()
                .and_then(|config| config.get(key))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };
        let retriever_path = node
            .retriever_path()
            .map(str::to_string)
            .or_else(|| config_str("retrieverPath"))
            .or_else(|| config_str("retriever"));
        let params = node.retriever_params.clone().or_else(|| {
            viewer_config
                .as_ref()
                .and_then(|config| config.get("retrieverParams"))
                .and_then(|value| serde_json::from_value(value.clone()).ok())
        });
        let dependencies = params.as_ref().map(dependency_names).unwrap_or_default();
        let refresh = match strategy {
            FieldStrategy::Hidden => node
                .refresh_interval
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64),
            _ => None,
        };
        Self {
            name: node.name.clone(),
            retriever_path,
            params,
            dependencies,
            static_options: node.options.clone().unwrap_or_default(),
            static_value: node.value.clone(),
            viewer_config,
            refresh,
        }
    }

    fn initial_state(&self, values: &FormValues, index: FieldIndex) -> ControllerState {
        ControllerState {
            options: self.static_options.clone(),
            selection: values.get(index).cloned(),
            data: self.viewer_config.clone(),
            blocked_libraries: self.blocked_for(self.viewer_config.as_ref()),
            ..ControllerState::default()
        }
    }

    fn blocked_for(&self, config: Option<&Value>) -> Vec<BlockedLibrary> {
        config
            .map(|config| viewer::validate_cdn_libraries(config.get("cdnLibraries")).blocked)
            .unwrap_or_default()
    }
}

struct Pending {
    deadline: Instant,
    generation: u64,
}

type FetchOutcome = (u64, Result<Value, RetrieverError>);

struct FieldTask {
    index: FieldIndex,
    strategy: FieldStrategy,
    setup: FieldSetup,
    context: ControllerContext,
    shown: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ControllerState>,
    cancel: CancellationToken,
    inflight: JoinSet<FetchOutcome>,
    /// Latest requested generation; only its result may apply.
    requested: u64,
    pending: Option<Pending>,
    refresh: Option<Interval>,
    last_seen: HashMap<String, Option<Value>>,
}

impl FieldTask {
    async fn run(mut self) {
        let mut values = self.context.store.subscribe();
        // Values written between spawn and the first poll (hydration) are
        // this field's selection.
        let snapshot = values.borrow_and_update().clone();
        self.on_values(&snapshot);
        self.remember_dependencies(&snapshot);
        self.start();

        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(done) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    self.finish(done);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire();
                }
                _ = next_tick(&mut self.refresh), if self.refresh.is_some() => {
                    debug!(index = self.index, "refresh interval elapsed");
                    self.start_fetch(None);
                }
                changed = values.changed() => match changed {
                    Ok(()) => {
                        let snapshot = values.borrow_and_update().clone();
                        self.on_values(&snapshot);
                    }
                    Err(_) => break,
                },
            }
        }
        self.inflight.abort_all();
        trace!(index = self.index, "controller task stopped");
    }

    fn start(&mut self) {
        if self.strategy == FieldStrategy::Hidden {
            let current = self.context.store.snapshot().get(self.index).cloned();
            if current.map_or(true, |value| value.is_null()) {
                let value = self
                    .setup
                    .static_value
                    .clone()
                    .unwrap_or_else(|| Value::String(String::new()));
                self.write_value(value);
            }
        }
        if self.setup.retriever_path.is_some() {
            if let Some(period) = self.setup.refresh {
                self.refresh = Some(interval_at(Instant::now() + period, period));
            }
        }
        self.maybe_initial_fetch();
    }

    fn maybe_initial_fetch(&mut self) {
        let idle = self.state.borrow().phase == LivePhase::Idle;
        if self.shown
            && idle
            && self.strategy.fetches_when_shown()
            && self.setup.retriever_path.is_some()
        {
            self.start_fetch(None);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SetShown(shown) => {
                self.shown = shown;
                if shown {
                    let snapshot = self.context.store.snapshot();
                    let changed = self.remember_dependencies(&snapshot);
                    let idle = self.state.borrow().phase == LivePhase::Idle;
                    if changed && !idle {
                        debug!(index = self.index, "dependency changed while hidden; refetching");
                        self.schedule(true);
                    } else {
                        self.maybe_initial_fetch();
                    }
                }
            }
            Command::Select(value) => self.user_select(value),
            Command::Toggle(value) => self.user_toggle(value),
            Command::Search(query) => {
                self.publish(|state| state.query = query.clone());
                self.schedule(false);
            }
            Command::Refetch => self.start_fetch(None),
            Command::Reset => self.reset(),
        }
    }

    fn user_select(&mut self, value: Value) {
        let value = if self.strategy.is_multi() {
            self.prune(value)
        } else {
            value
        };
        self.publish(|state| {
            state.selection = Some(value.clone());
            state.stale = false;
            state.invalid.clear();
        });
        self.write_value(value);
    }

    fn user_toggle(&mut self, value: Value) {
        let mut current: Vec<Value> = match self.state.borrow().selection.clone() {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        match current.iter().position(|v| same_choice(v, &value)) {
            Some(position) => {
                current.remove(position);
            }
            None => current.push(value),
        }
        self.user_select(Value::Array(current));
    }

    /// Drop checkbox entries that are not among the evaluated options.
    fn prune(&self, value: Value) -> Value {
        let state = self.state.borrow();
        if state.phase != LivePhase::Evaluated {
            return value;
        }
        match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .filter(|item| contains_choice(&state.options, item))
                    .collect(),
            ),
            other => other,
        }
    }

    fn reset(&mut self) {
        self.requested += 1;
        self.pending = None;
        self.inflight.abort_all();
        let snapshot = self.context.store.snapshot();
        self.last_seen.clear();
        self.remember_dependencies(&snapshot);
        let initial = self.setup.initial_state(&snapshot, self.index);
        self.publish(|state| *state = initial.clone());
        debug!(index = self.index, "dynamic field reset");
    }

    fn on_values(&mut self, values: &FormValues) {
        let selection = values.get(self.index).cloned();
        if selection != self.state.borrow().selection {
            self.publish(|state| {
                state.selection = selection.clone();
                if state.phase == LivePhase::Evaluated {
                    mark_stale(self.strategy, state);
                }
            });
        }

        if !self.shown || self.setup.dependencies.is_empty() {
            return;
        }
        if self.remember_dependencies(values) {
            let idle = self.state.borrow().phase == LivePhase::Idle;
            if !idle {
                debug!(index = self.index, "dependency changed; scheduling refetch");
                self.schedule(true);
            }
        }
    }

    /// Record dependency values; true when any differs from the last seen.
    fn remember_dependencies(&mut self, values: &FormValues) -> bool {
        let mut changed = false;
        for name in &self.setup.dependencies {
            let current = values.get_by_name(name).cloned();
            match self.last_seen.get(name) {
                Some(previous) if *previous == current => {}
                _ => {
                    changed = true;
                    self.last_seen.insert(name.clone(), current);
                }
            }
        }
        changed
    }

    /// Schedule a fetch after the debounce window, superseding anything
    /// scheduled or in flight.
    fn schedule(&mut self, clear_options: bool) {
        self.requested += 1;
        self.pending = Some(Pending {
            deadline: Instant::now() + self.context.settings.debounce,
            generation: self.requested,
        });
        if clear_options {
            self.publish(|state| {
                state.phase = LivePhase::Loading;
                state.options.clear();
                state.stale = false;
                state.invalid.clear();
            });
        }
    }

    fn fire(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.generation != self.requested {
            return;
        }
        if self.strategy != FieldStrategy::Autocomplete {
            self.start_fetch(None);
            return;
        }

        let query = self.state.borrow().query.clone();
        if query.chars().count() < self.context.settings.autocomplete_min_chars {
            self.publish(|state| {
                state.options.clear();
                state.stale = false;
                state.invalid.clear();
            });
            return;
        }
        self.start_fetch(Some(query));
    }

    fn start_fetch(&mut self, query: Option<String>) {
        let Some(path) = self.setup.retriever_path.clone() else {
            return;
        };
        self.requested += 1;
        self.pending = None;
        let generation = self.requested;
        self.publish(|state| {
            state.phase = LivePhase::Loading;
            state.error = None;
        });

        let client = self.context.client.clone();
        let values = self.context.store.snapshot();
        let params = self.setup.params.clone();
        let parse_json = self.strategy.parse_json();
        let sink = GatedSink {
            inner: self.context.error_sink.clone(),
            cancel: self.cancel.clone(),
        };
        debug!(index = self.index, generation, retriever = %path, "fetch started");

        self.inflight.spawn(async move {
            let mut call = ScriptCall::new(Some(&path), &values)
                .params(params.as_ref())
                .parse_json(parse_json);
            if let Some(query) = query {
                call = call.extra_param(SEARCH_QUERY_PARAM, Value::String(query));
            }
            let result = client.execute_script(&call, &sink).await;
            (generation, result)
        });
    }

    fn finish(&mut self, done: Result<FetchOutcome, JoinError>) {
        let (generation, result) = match done {
            Ok(outcome) => outcome,
            Err(error) => {
                trace!(index = self.index, error = %error, "fetch task ended without result");
                return;
            }
        };
        if generation != self.requested {
            debug!(
                index = self.index,
                generation,
                latest = self.requested,
                "discarding superseded fetch result"
            );
            return;
        }

        match result {
            Ok(value) => self.apply(generation, value),
            Err(error) => {
                self.publish(|state| {
                    state.phase = LivePhase::Evaluated;
                    state.generation = generation;
                    state.options.clear();
                    state.stale = false;
                    state.invalid.clear();
                    state.error = Some(error.clone());
                });
            }
        }
    }

    fn apply(&mut self, generation: u64, value: Value) {
        let strategy = self.strategy;
        match strategy {
            FieldStrategy::Hidden => {
                self.publish(|state| {
                    state.phase = LivePhase::Evaluated;
                    state.generation = generation;
                    state.data = Some(value.clone());
                });
                self.write_value(value);
            }
            FieldStrategy::Viewer => {
                let base = self
                    .setup
                    .viewer_config
                    .clone()
                    .unwrap_or(Value::Null);
                let merged = viewer::merge_data(&base, &value);
                let blocked = self.setup.blocked_for(Some(&merged));
                self.publish(|state| {
                    state.phase = LivePhase::Evaluated;
                    state.generation = generation;
                    state.data = Some(merged.clone());
                    state.blocked_libraries = blocked.clone();
                });
            }
            _ => {
                let options = OptionItem::list_from_value(&value);
                debug!(index = self.index, generation, options = options.len(), "options loaded");
                self.publish(|state| {
                    state.phase = LivePhase::Evaluated;
                    state.generation = generation;
                    state.data = Some(value.clone());
                    state.options = options.clone();
                    mark_stale(strategy, state);
                });
            }
        }
    }

    fn write_value(&self, value: Value) {
        if self.cancel.is_cancelled() {
            return;
        }
        let store = &self.context.store;
        if store.snapshot().name_of(self.index).is_some() {
            store.update_value(self.index, value);
        } else {
            store.update_value(self.index, value.clone());
            if let Some(name) = &self.setup.name {
                store.update_named(name, value);
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ControllerState)) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.state.send_modify(update);
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Recompute the stale flag from the current selection and options.
fn mark_stale(strategy: FieldStrategy, state: &mut ControllerState) {
    state.invalid = if strategy.offers_options() {
        stale_entries(strategy, state.selection.as_ref(), &state.options)
    } else {
        Vec::new()
    };
    state.stale = !state.invalid.is_empty();
}

fn stale_entries(
    strategy: FieldStrategy,
    selection: Option<&Value>,
    options: &[OptionItem],
) -> Vec<Value> {
    let Some(selection) = selection else {
        return Vec::new();
    };
    if strategy == FieldStrategy::Autocomplete && options.is_empty() {
        return Vec::new();
    }
    match selection {
        Value::Array(items) => items
            .iter()
            .filter(|item| !contains_choice(options, item))
            .cloned()
            .collect(),
        other if is_present(other) && !contains_choice(options, other) => vec![other.clone()],
        _ => Vec::new(),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => map.get("value").map(is_present).unwrap_or(!map.is_empty()),
        _ => true,
    }
}

fn contains_choice(options: &[OptionItem], selection: &Value) -> bool {
    let key = selection_key(selection);
    options.iter().any(|option| same_choice(&option.value, key))
}

/// Options compare by JSON value; form posts turn numbers into strings, so
/// string forms are accepted as equal too.
fn same_choice(a: &Value, b: &Value) -> bool {
    let (a, b) = (selection_key(a), selection_key(b));
    a == b || value_to_form_string(a) == value_to_form_string(b)
}

/// Forwards errors only while the controller is mounted.
struct GatedSink {
    inner: Arc<dyn ErrorSink>,
    cancel: CancellationToken,
}

impl ErrorSink for GatedSink {
    fn report(&self, error: &RetrieverError) {
        if !self.cancel.is_cancelled() {
            self.inner.report(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strategy_for_kind() {
        assert_eq!(
            FieldStrategy::for_kind(&FieldKind::DynamicCheckboxGroup),
            Some(FieldStrategy::Checkbox)
        );
        assert_eq!(FieldStrategy::for_kind(&FieldKind::Select), None);
        assert!(!FieldStrategy::Hidden.parse_json());
        assert!(!FieldStrategy::Autocomplete.fetches_when_shown());
    }

    #[test]
    fn test_stale_entries_single_and_multi() {
        let options = vec![OptionItem::new("a", "A"), OptionItem::new(2, "Two")];
        assert!(stale_entries(FieldStrategy::Select, Some(&json!({"value": "a", "label": "A"})), &options).is_empty());
        assert_eq!(
            stale_entries(FieldStrategy::Select, Some(&json!("z")), &options),
            vec![json!("z")]
        );
        assert!(stale_entries(FieldStrategy::Radio, Some(&json!("")), &options).is_empty());
        assert_eq!(
            stale_entries(FieldStrategy::Checkbox, Some(&json!(["a", "2", "q"])), &options),
            vec![json!("q")]
        );
        assert!(stale_entries(FieldStrategy::Autocomplete, Some(&json!("z")), &[]).is_empty());
    }

    #[test]
    fn test_live_view_appends_unavailable_for_select_only() {
        let state = ControllerState {
            phase: LivePhase::Evaluated,
            options: vec![OptionItem::new("a", "A")],
            selection: Some(json!({"value": "old", "label": "Old"})),
            stale: true,
            invalid: vec![json!({"value": "old", "label": "Old"})],
            ..ControllerState::default()
        };
        let select = live_view(FieldStrategy::Select, &state);
        assert_eq!(select.options.len(), 2);
        assert_eq!(select.options[1].display_label(), "Old (Unavailable)");
        assert_eq!(select.warning.as_deref(), Some(STALE_SELECTION_WARNING));

        let radio = live_view(FieldStrategy::Radio, &state);
        assert_eq!(radio.options.len(), 1);
        assert!(radio.stale);
    }

    #[test]
    fn test_field_spec_reads_viewer_config_retriever() {
        let node = SchemaNode::new(FieldKind::DynamicViewer).with_value(json!({
            "retriever": "retrievers/protein.sh",
            "retrieverParams": {"id": "$protein"},
            "cdnLibraries": ["http://insecure.example/x.js"]
        }));
        let setup = FieldSetup::new(FieldStrategy::Viewer, &node);
        assert_eq!(setup.retriever_path.as_deref(), Some("retrievers/protein.sh"));
        assert_eq!(setup.dependencies, vec!["protein"]);
        let state = setup.initial_state(&FormValues::default(), 0);
        assert_eq!(state.blocked_libraries.len(), 1);
    }

    #[test]
    fn test_hidden_refresh_interval() {
        let mut node = SchemaNode::new(FieldKind::Hidden).with_retriever("r.sh");
        node.refresh_interval = Some(5.0);
        let setup = FieldSetup::new(FieldStrategy::Hidden, &node);
        assert_eq!(setup.refresh, Some(Duration::from_secs(5)));
        node.refresh_interval = Some(0.0);
        assert_eq!(FieldSetup::new(FieldStrategy::Hidden, &node).refresh, None);
    }
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

use drona_client::ScriptCall;
use drona_core::error::NoopErrorSink;
use drona_core::params::RetrieverParams;
use drona_core::store::FieldValueStore;
use drona_core::types::Environment;
use drona_runtime::ComposerBootstrap;

#[derive(Debug, Parser)]
#[command(name = "drona", about = "Drona composer CLI")]
pub struct Cli {
    #[arg(long, global = true, default_value = "configs/drona.yaml")]
    config: PathBuf,
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List available environments
    Environments,
    /// Print the form schema of an environment
    Schema(EnvArgs),
    /// Render the form of an environment as a view tree
    Render(RenderArgs),
    /// Run a retriever script
    Evaluate(EvaluateArgs),
    /// Show a stored job
    History {
        job_id: String,
    },
    /// Check the Drona directory configuration
    ConfigStatus,
}

#[derive(Debug, Args, Clone)]
struct EnvArgs {
    env: String,
    #[arg(long)]
    src: String,
}

#[derive(Debug, Args, Clone)]
struct RenderArgs {
    #[command(flatten)]
    environment: EnvArgs,
    /// JSON object of field values keyed by field name
    #[arg(long)]
    values: Option<PathBuf>,
    /// Time given to dynamic fields to load before rendering
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,
}

#[derive(Debug, Args, Clone)]
struct EvaluateArgs {
    retriever: String,
    /// Retriever parameter, `key=value`; `$name` refers to a `--value`
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
    /// Form value visible to `$name` parameters, `name=value`
    #[arg(long = "value", value_name = "NAME=VALUE")]
    values: Vec<String>,
    #[arg(long, requires = "src")]
    env: Option<String>,
    #[arg(long, requires = "env")]
    src: Option<String>,
    /// Keep plain-text output instead of requiring JSON
    #[arg(long)]
    text: bool,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        ensure_log_filter(self.verbose);
        let path = self.config.exists().then_some(self.config.as_path());
        let bootstrap = ComposerBootstrap::from_path(path)
            .with_context(|| format!("failed to load config {}", self.config.display()))?;

        match self.command {
            Command::Environments => {
                let mut composer = bootstrap.composer();
                let environments = composer.load_environments().await?;
                print_json(&environments)
            }
            Command::Schema(args) => {
                let schema = bootstrap
                    .client
                    .schema(&Environment::new(args.env, args.src))
                    .await?;
                print_json(&schema.to_value())
            }
            Command::Render(args) => render(&bootstrap, args).await,
            Command::Evaluate(args) => evaluate(&bootstrap, args).await,
            Command::History { job_id } => {
                let record = bootstrap.client.history(&job_id).await?;
                print_json(&record)
            }
            Command::ConfigStatus => {
                let status = bootstrap.client.config_status().await?;
                tracing::debug!(action = ?status.gate_action(), "config gate");
                print_json(&status)
            }
        }
    }
}

async fn render(bootstrap: &ComposerBootstrap, args: RenderArgs) -> anyhow::Result<()> {
    let mut composer = bootstrap.composer();
    let environment = Environment::new(args.environment.env, args.environment.src);
    if !composer.set_environment(environment).await {
        let message = composer
            .error()
            .map(|e| e.message)
            .unwrap_or_else(|| "schema unavailable".to_string());
        bail!("failed to load schema: {message}");
    }

    if let Some(path) = &args.values {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let values: Map<String, Value> = serde_json::from_str(&text)
            .with_context(|| format!("{} must hold a JSON object", path.display()))?;
        composer.session_mut().set_values_by_name(&values);
    }

    composer.render();
    tokio::time::sleep(Duration::from_millis(args.wait_ms)).await;
    let nodes = composer.render();
    print_json(&nodes)
}

async fn evaluate(bootstrap: &ComposerBootstrap, args: EvaluateArgs) -> anyhow::Result<()> {
    let store = FieldValueStore::new();
    for pair in &args.values {
        let (name, value) = split_pair(pair)?;
        store.update_named(name, value);
    }
    if let (Some(env), Some(src)) = (args.env, args.src) {
        store.set_environment(Some(Environment::new(env, src)));
    }

    let mut params = RetrieverParams::new();
    for pair in &args.params {
        let (key, value) = split_pair(pair)?;
        params.insert(key.to_string(), value);
    }

    let values = store.snapshot();
    let call = ScriptCall::new(Some(args.retriever.as_str()), &values)
        .params(Some(&params))
        .parse_json(!args.text);
    let output = bootstrap
        .client
        .execute_script(&call, &NoopErrorSink)
        .await
        .context("retriever failed")?;
    match output {
        Value::String(text) => {
            println!("{text}");
            Ok(())
        }
        other => print_json(&other),
    }
}

/// `key=value`; the value is JSON when it parses, a string otherwise.
fn split_pair(pair: &str) -> anyhow::Result<(&str, Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        bail!("expected KEY=VALUE, got '{pair}'");
    };
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key, value))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ensure_log_filter(verbose: bool) {
    if env::var("RUST_LOG").is_ok() {
        return;
    }
    env::set_var("RUST_LOG", if verbose { "debug" } else { "warn" });
}

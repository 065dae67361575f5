use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use conduit_config::{RecipeDef, Settings};
use conduit_orchestrator::{OperationState, TriggerRequest, TriggerService};
use conduit_recipe::Recipe;

/// Conduit - run pipeline recipes against batches of records
#[derive(Parser)]
#[command(name = "conduit")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to a settings file (default: <config dir>/conduit/settings.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Trigger a recipe with records read from stdin
  Run {
    /// Path to the recipe file (JSON)
    recipe_file: PathBuf,

    /// How to trigger the recipe
    #[arg(long, value_enum, default_value_t = Mode::Sync)]
    mode: Mode,

    /// Include per-component traces in the result
    #[arg(long)]
    traces: bool,

    /// Path to a JSON object of secrets referenced as ${secret.*}
    #[arg(long)]
    secrets: Option<PathBuf>,
  },

  /// List available components and their tasks
  Components,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
  /// Wait for the result
  Sync,
  /// Start an operation and poll it until done
  Async,
  /// Print events as server-sent-event frames
  Stream,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .with_target(false)
    .init();

  let settings = load_settings(cli.config.as_deref())?;

  match cli.command {
    Some(Commands::Run {
      recipe_file,
      mode,
      traces,
      secrets,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run(settings, recipe_file, mode, traces, secrets).await })?;
    }
    Some(Commands::Components) => list_components()?,
    None => {
      println!("conduit - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
  if let Some(path) = path {
    return Settings::from_file(path)
      .with_context(|| format!("failed to load settings: {}", path.display()));
  }

  match dirs::config_dir().map(|dir| dir.join("conduit").join("settings.json")) {
    Some(default) if default.exists() => Settings::from_file(&default)
      .with_context(|| format!("failed to load settings: {}", default.display())),
    _ => Ok(Settings::default()),
  }
}

fn list_components() -> Result<()> {
  let registry = conduit_operators::builtin_registry().context("failed to register components")?;
  for definition in registry.definitions() {
    println!("{}\t{}", definition.id, definition.tasks.join(", "));
  }
  Ok(())
}

async fn run(
  settings: Settings,
  recipe_file: PathBuf,
  mode: Mode,
  traces: bool,
  secrets: Option<PathBuf>,
) -> Result<()> {
  let recipe = load_recipe(&recipe_file).await?;
  let records = read_records_from_stdin()?;
  let secrets = match secrets {
    Some(path) => load_object(&path).await?,
    None => Map::new(),
  };
  info!(records = records.len(), "records_loaded");

  let registry = conduit_operators::builtin_registry().context("failed to register components")?;
  let service = TriggerService::from_settings(registry, &settings);
  let reaper = service.spawn_reaper();

  let request = TriggerRequest::new(recipe, records)
    .with_secrets(secrets)
    .with_traces(traces);

  let result = match mode {
    Mode::Sync => {
      let output = service
        .trigger_sync(request)
        .await
        .context("trigger failed")?;
      println!("{}", serde_json::to_string_pretty(&output)?);
      Ok(())
    }
    Mode::Async => poll_operation(&service, request).await,
    Mode::Stream => stream_events(&service, request).await,
  };

  service.shutdown();
  if let Some(reaper) = reaper {
    reaper.await.context("reaper task failed")?;
  }
  result
}

async fn poll_operation(service: &TriggerService, request: TriggerRequest) -> Result<()> {
  let operation = service
    .trigger_async(request)
    .context("failed to start trigger")?;
  eprintln!("Operation: {}", operation.id);

  loop {
    let operation = service.get_operation(&operation.id)?;
    match operation.state {
      OperationState::Running => {
        debug!(operation_id = %operation.id, "operation_running");
        tokio::time::sleep(Duration::from_millis(100)).await;
      }
      OperationState::Completed { .. } => {
        println!("{}", serde_json::to_string_pretty(&operation)?);
        return Ok(());
      }
      OperationState::Failed { error } => bail!("operation {} failed: {}", operation.id, error),
    }
  }
}

async fn stream_events(service: &TriggerService, request: TriggerRequest) -> Result<()> {
  let client = CancellationToken::new();
  let stream = service
    .stream_trigger(request, client.clone())
    .context("failed to start trigger")?;
  eprintln!("Trigger: {}", stream.trigger_id());

  let mut frames = Box::pin(stream.into_sse());
  loop {
    tokio::select! {
      frame = frames.next() => match frame {
        Some(frame) => print!("{}", frame),
        None => break,
      },
      _ = tokio::signal::ctrl_c() => {
        client.cancel();
        eprintln!("Disconnected");
        break;
      }
    }
  }
  Ok(())
}

async fn load_recipe(path: &Path) -> Result<Arc<Recipe>> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read recipe file: {}", path.display()))?;

  let def: RecipeDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse recipe file: {}", path.display()))?;

  let recipe = Recipe::compile(def)
    .with_context(|| format!("invalid recipe: {}", path.display()))?;
  eprintln!(
    "Loaded recipe with {} components",
    recipe.nodes().count()
  );
  Ok(Arc::new(recipe))
}

async fn load_object(path: &Path) -> Result<Map<String, Value>> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read file: {}", path.display()))?;
  match serde_json::from_str(&content)
    .with_context(|| format!("failed to parse file: {}", path.display()))?
  {
    Value::Object(map) => Ok(map),
    _ => bail!("{} must contain a JSON object", path.display()),
  }
}

/// Records from stdin: an array of variable objects, or one object.
fn read_records_from_stdin() -> Result<Vec<Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, one empty record
    return Ok(vec![Value::Object(Map::new())]);
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read records from stdin")?;

  if input.trim().is_empty() {
    return Ok(vec![Value::Object(Map::new())]);
  }
  match serde_json::from_str(&input).context("failed to parse records JSON from stdin")? {
    Value::Array(records) => Ok(records),
    record @ Value::Object(_) => Ok(vec![record]),
    _ => bail!("records must be a JSON object or an array of objects"),
  }
}

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use knxload::api::ApiClient;
use knxload::cache::{fingerprint, LayoutCache, ProjectPayloadCache, LAYOUT_DB, PROJECT_DB};
use knxload::config::Config;
use knxload::logging;
use knxload::model::ProjectFile;
use knxload::pipeline::{ParseOptions, ParsingPipeline};
use knxload::store::{DatabaseSpec, KeyValueStore, NoopStore, SqliteStore};
use knxload::worker::{self, JsonProjectParser, ProcessSpawner, WorkerClient};

#[derive(Parser, Debug)]
#[command(name = "knxload")]
#[command(about = "Load KNX project files with a bounded on-disk payload cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/knxload/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also write logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Parse a project file and move its heavy data into the cache
  Parse {
    file: PathBuf,

    /// Project password (default: $KNXLOAD_PROJECT_PASSWORD)
    #[arg(short, long)]
    password: Option<String>,

    /// Preferred product language, e.g. de-DE
    #[arg(short, long)]
    language: Option<String>,

    /// Never fall back to the parse server
    #[arg(long)]
    strict: bool,

    /// Cache key of the project (default: derived from the file)
    #[arg(long)]
    project_key: Option<String>,

    /// List datapoint type and size per group address
    #[arg(long)]
    group_addresses: bool,
  },

  /// Show what the cache holds for a project
  Stats { project_key: String },

  /// Remove all cached layouts and project payloads
  Clear,

  /// Serve one parse request on stdin/stdout (used by `parse`)
  #[command(hide = true)]
  Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // stdout belongs to the reply line; no config or logging in the worker
  if let Command::Worker = args.command {
    return worker::serve_stdio(&JsonProjectParser)
      .map_err(|e| eyre!("Failed to serve parse request: {}", e));
  }

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.data_dir()?.join("logs"), args.verbose)?;

  match args.command {
    Command::Parse {
      file,
      password,
      language,
      strict,
      project_key,
      group_addresses,
    } => {
      let request = ParseRequest {
        file,
        password,
        language,
        strict,
        project_key,
        group_addresses,
      };
      parse(&config, request).await
    }
    Command::Stats { project_key } => stats(&config, &project_key),
    Command::Clear => clear(&config),
    // Served before config and logging
    Command::Worker => Ok(()),
  }
}

fn open_store(config: &Config, spec: DatabaseSpec) -> Result<Arc<dyn KeyValueStore>> {
  if !config.cache.enabled {
    return Ok(Arc::new(NoopStore));
  }
  Ok(Arc::new(SqliteStore::in_dir(spec, &config.data_dir()?)))
}

fn project_cache(config: &Config) -> Result<ProjectPayloadCache<dyn KeyValueStore>> {
  Ok(ProjectPayloadCache::new(
    open_store(config, PROJECT_DB)?,
    config.cache.session_id(),
  ))
}

struct ParseRequest {
  file: PathBuf,
  password: Option<String>,
  language: Option<String>,
  strict: bool,
  project_key: Option<String>,
  group_addresses: bool,
}

async fn parse(config: &Config, request: ParseRequest) -> Result<()> {
  let ParseRequest {
    file: path,
    password,
    language,
    strict,
    project_key,
    group_addresses,
  } = request;

  let file = ProjectFile::read(&path)
    .await
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  let password = password.or_else(Config::get_password);

  let spawner =
    ProcessSpawner::current_exe().map_err(|e| eyre!("Failed to prepare parse worker: {}", e))?;
  let worker = WorkerClient::new(spawner).with_timeout(config.parser.worker_timeout());
  let uploader = ApiClient::new(&config.server)?;
  debug!(upload_url = %uploader.upload_url(), "server fallback configured");

  let pipeline = ParsingPipeline::new(worker, uploader);
  let options = ParseOptions {
    allow_server_fallback: config.parser.allow_server_fallback && !strict,
    preferred_language: language.or_else(|| config.parser.preferred_language.clone()),
  };

  let mut project = pipeline
    .parse_project(&file, password.as_deref(), &options)
    .await
    .map_err(|e| {
      if e.needs_password() {
        eyre!(
          "{}\nProvide the project password with --password or KNXLOAD_PROJECT_PASSWORD.",
          e
        )
      } else {
        eyre!("Failed to parse {}: {}", path.display(), e)
      }
    })?;

  let project_key =
    project_key.unwrap_or_else(|| fingerprint([file.name().to_string(), file.content_hash()]));
  let device_count = project.devices.len();

  let cache = project_cache(config)?;
  let devices_offloaded = cache.offload_device_payloads(&project_key, &mut project);
  let graphs_offloaded = cache.offload_project_graphs(&project_key, &mut project);
  let stats = cache.project_cache_stats(&project_key);
  info!(project_key, devices_offloaded, graphs_offloaded, "parse finished");

  println!("Project:             {}", project.project_name);
  println!("Project key:         {}", project_key);
  println!("Devices:             {}", device_count);
  println!("Devices offloaded:   {}", devices_offloaded);
  println!("Graphs offloaded:    {}", graphs_offloaded);
  if let Some(fallbacks) = &project.group_address_fallbacks {
    println!("Group addresses:     {}", fallbacks.len());
  }
  println!("devicePayloadCount:  {}", stats.device_payload_count);
  println!("hasProjectGraphs:    {}", stats.has_project_graphs);

  if group_addresses {
    if let Some(fallbacks) = &project.group_address_fallbacks {
      println!();
      for (address, entry) in fallbacks.iter() {
        println!("{:<12} {:<14} {}", address, entry.datapoint_type, entry.object_size);
      }
    }
  }

  Ok(())
}

fn stats(config: &Config, project_key: &str) -> Result<()> {
  let stats = project_cache(config)?.project_cache_stats(project_key);

  println!("devicePayloadCount: {}", stats.device_payload_count);
  println!("hasProjectGraphs:   {}", stats.has_project_graphs);
  Ok(())
}

fn clear(config: &Config) -> Result<()> {
  if !config.cache.enabled {
    println!("Caching is disabled, nothing to clear");
    return Ok(());
  }

  let layouts = LayoutCache::new(open_store(config, LAYOUT_DB)?, config.cache.session_id());
  layouts
    .clear()
    .map_err(|e| eyre!("Failed to clear layout cache: {}", e))?;

  project_cache(config)?
    .clear()
    .map_err(|e| eyre!("Failed to clear project cache: {}", e))?;

  info!("caches cleared");
  println!("Caches cleared");
  Ok(())
}

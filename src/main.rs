use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dispatcher_ingest::api::{
  AssetLinksResponse, AssetListParams, BulkAssetRequest, BulkAssetResponse, DispatchListResponse,
  ErrorBody, ListParams,
};
use dispatcher_ingest::{AssetScope, Config, Dispatcher, IngestError};
use dispatcher_model::{DispatchStatus, Lifecycle, NodeId};

/// Dispatcher - manifest ingestion and asset materialization
#[derive(Parser)]
#[command(name = "dispatcher")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: $DISPATCHER_DATA_DIR or ~/.dispatcher)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Submit a manifest and print the stored dispatch
  Submit {
    /// Path to the manifest JSON (default: stdin)
    manifest_file: Option<PathBuf>,
  },

  /// Print a stored dispatch
  Get { dispatch_id: String },

  /// List dispatches, newest first
  List {
    #[arg(long)]
    dispatch_id: Option<String>,
    #[arg(long)]
    count: Option<u32>,
    #[arg(long)]
    page: Option<u32>,
  },

  /// Delete a dispatch and release its assets
  Delete { dispatch_id: String },

  /// List the asset slots of a dispatch or one of its nodes
  Links {
    dispatch_id: String,
    #[arg(long)]
    node: Option<NodeId>,
  },

  /// Record lifecycle timestamps (RFC 3339) and status
  Lifecycle {
    dispatch_id: String,
    #[arg(long)]
    start: Option<DateTime<Utc>>,
    #[arg(long, requires = "start")]
    end: Option<DateTime<Utc>>,
    /// NEW_OBJECT, STARTING, RUNNING, DISPATCHING, COMPLETED or FAILED
    #[arg(long)]
    status: Option<DispatchStatus>,
  },

  /// Manage assets directly
  Assets {
    #[command(subcommand)]
    command: AssetCommands,
  },
}

#[derive(Subcommand)]
enum AssetCommands {
  /// Create assets from a `{"assets": [...]}` document
  Create {
    /// Path to the request JSON (default: stdin)
    request_file: Option<PathBuf>,
  },

  /// List assets by key prefix
  List {
    #[arg(long, default_value = "")]
    prefix: String,
    #[arg(long)]
    count: Option<u32>,
    #[arg(long)]
    page: Option<u32>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("DISPATCHER_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(io::stderr)
    .init();

  let config = Config::from_env_with(cli.data_dir).context("failed to load configuration")?;

  match cli.command {
    Some(command) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run(command, config).await })
    }
    None => {
      println!("dispatcher - use --help to see available commands");
      Ok(())
    }
  }
}

async fn run(command: Commands, config: Config) -> Result<()> {
  let dispatcher = Dispatcher::open(&config)
    .await
    .map_err(report)
    .with_context(|| format!("failed to open data directory: {}", config.data_dir.display()))?;

  let result = execute(&dispatcher, command).await;
  dispatcher.close().await.map_err(report)?;
  result
}

async fn execute(dispatcher: &Dispatcher, command: Commands) -> Result<()> {
  let query = dispatcher.query();

  match command {
    Commands::Submit { manifest_file } => {
      let body = read_input(manifest_file)?;

      // Ctrl-C before the commit point rolls the ingestion back.
      let cancel = CancellationToken::new();
      let on_interrupt = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          on_interrupt.cancel();
        }
      });

      let manifest = dispatcher
        .ingest_json(&body, cancel)
        .await
        .map_err(report)
        .context("ingestion failed")?;

      eprintln!("Created dispatch: {}", manifest.dispatch_id());
      print_json(&manifest)
    }
    Commands::Get { dispatch_id } => {
      let manifest = query.get(&dispatch_id).await.map_err(report)?;
      print_json(&manifest)
    }
    Commands::List {
      dispatch_id,
      count,
      page,
    } => {
      let filter = ListParams {
        dispatch_id,
        count,
        page,
      }
      .into_filter(dispatcher.page_size());
      let records = query.list(&filter).await.map_err(report)?;
      print_json(&DispatchListResponse { records })
    }
    Commands::Delete { dispatch_id } => {
      let removed = dispatcher.delete(&dispatch_id).await.map_err(report)?;
      if removed {
        eprintln!("Deleted dispatch: {dispatch_id}");
      } else {
        eprintln!("No dispatch {dispatch_id}");
      }
      Ok(())
    }
    Commands::Links { dispatch_id, node } => {
      let scope = node.map_or(AssetScope::Workflow, AssetScope::Node);
      let records = query.asset_links(&dispatch_id, scope).await.map_err(report)?;
      print_json(&AssetLinksResponse { records })
    }
    Commands::Lifecycle {
      dispatch_id,
      start,
      end,
      status,
    } => {
      // Without --start the recorded timestamps are kept.
      let lifecycle = match start {
        Some(_) => Lifecycle::from_times(start, end).context("invalid timestamps")?,
        None => query.get(&dispatch_id).await.map_err(report)?.metadata.lifecycle,
      };
      let metadata = dispatcher
        .update_lifecycle(&dispatch_id, lifecycle, status)
        .await
        .map_err(report)?;
      print_json(&metadata)
    }
    Commands::Assets { command } => match command {
      AssetCommands::Create { request_file } => {
        let body = read_input(request_file)?;
        let request: BulkAssetRequest =
          serde_json::from_slice(&body).context("failed to parse asset request")?;
        let assets = dispatcher.create_assets(request).await.map_err(report)?;
        print_json(&BulkAssetResponse { assets })
      }
      AssetCommands::List {
        prefix,
        count,
        page,
      } => {
        let params = AssetListParams {
          prefix,
          count,
          page,
        };
        let assets = query
          .list_assets(&params.prefix, params.page(dispatcher.page_size()))
          .await
          .map_err(report)?;
        print_json(&BulkAssetResponse { assets })
      }
    },
  }
}

/// Print the error body a transport would send, and hand the error on.
fn report(error: IngestError) -> anyhow::Error {
  if let Ok(body) = serde_json::to_string_pretty(&ErrorBody::from(&error)) {
    eprintln!("{} {body}", error.status_code());
  }
  error.into()
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn read_input(path: Option<PathBuf>) -> Result<Vec<u8>> {
  match path {
    Some(path) => {
      std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }
    None => {
      let mut input = Vec::new();
      io::stdin()
        .read_to_end(&mut input)
        .context("failed to read stdin")?;
      Ok(input)
    }
  }
}

mod agent;
mod config;
mod event;
mod net;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;

use agent::notify::LogSink;
use agent::Agent;
use config::Config;
use event::{AgentMessage, Effect, Signal};
use net::{HttpFetcher, Method, Request, RequestMode};
use store::SqliteBackend;

#[derive(Parser, Debug)]
#[command(name = "offramp")]
#[command(about = "Offline-first request interception and caching agent")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offramp/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the store database (default: under the user data directory)
  #[arg(long)]
  store_path: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the static store from the manifest
  Install,
  /// Retire superseded store generations and take over
  Activate,
  /// Run one request through the interception engine
  Fetch {
    url: String,

    /// Treat the request as a full-page navigation
    #[arg(long)]
    navigate: bool,

    /// Request method
    #[arg(short, long, default_value = "get")]
    method: String,
  },
  /// Run the deferred-work handler for a tag
  Sync { tag: String },
  /// Simulate an inbound push payload
  Push { body: Option<String> },
  /// Simulate a user action on a displayed notification
  Click { action: String },
  /// Tell the agent to supersede older instances immediately
  SkipWaiting,
  /// List store generations and entry counts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing()?;

  let origin = config.origin_url()?;
  let backend = match args.store_path.as_deref() {
    Some(path) => SqliteBackend::open_at(path)?,
    None => SqliteBackend::open()?,
  };
  let fetcher = HttpFetcher::new(origin)?;
  let agent = Arc::new(Agent::new(config, backend, fetcher, Arc::new(LogSink))?);

  // Config-declared deferred-work tags all map to a static-store refresh:
  // when connectivity returns, bring the must-have resources up to date.
  for tag in agent.config().sync_tags.clone() {
    let handle = Arc::clone(&agent);
    agent.sync_queue().register_fn(&tag, move || {
      let handle = Arc::clone(&handle);
      async move { handle.refresh_static_store().await }
    });
  }

  match args.command {
    Command::Install => {
      agent.dispatch(Signal::Install).await?;
      println!("installed: {}", agent.config().static_store_name());
    }
    Command::Activate => {
      agent.dispatch(Signal::Activate).await?;
      println!("active: generation {}", agent.config().version);
    }
    Command::Fetch {
      url,
      navigate,
      method,
    } => {
      let url: Url = Url::parse(&url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
      let request = Request {
        method: method.parse::<Method>()?,
        url,
        mode: if navigate {
          RequestMode::Navigate
        } else {
          RequestMode::Subresource
        },
      };

      if let Effect::Response(response) = agent.dispatch(Signal::Fetch(request)).await? {
        eprintln!("{} {}", response.status, response.reason);
        std::io::stdout()
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write body: {}", e))?;
      }
    }
    Command::Sync { tag } => {
      if let Effect::Sync(outcome) = agent.dispatch(Signal::Sync { tag }).await? {
        println!("{:?}", outcome);
      }
    }
    Command::Push { body } => {
      agent.dispatch(Signal::Push { payload: body }).await?;
    }
    Command::Click { action } => {
      agent.dispatch(Signal::NotificationClick { action }).await?;
    }
    Command::SkipWaiting => {
      agent
        .dispatch(Signal::Message(AgentMessage::SkipWaiting))
        .await?;
      println!("skip-waiting requested");
    }
    Command::Status => {
      for name in agent.stores().list_names()? {
        let count = agent.stores().len(&name)?;
        println!("{}  {} entries", name, count);
      }
    }
  }

  Ok(())
}

/// Install the tracing subscriber: env-filtered, writing to a daily-rolling
/// file under the data directory. The guard must outlive main so buffered
/// log lines get flushed.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("offramp")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "offramp.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_env("OFFRAMP_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

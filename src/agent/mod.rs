//! The caching agent: lifecycle, interception, deferred work, notifications.

pub mod intercept;
pub mod lifecycle;
pub mod notify;
pub mod sync;

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::config::Config;
use crate::event::{AgentMessage, Effect, Signal};
use crate::net::Fetcher;
use crate::store::{StoreBackend, StoreManager};

use lifecycle::AgentState;
use notify::{NotificationDispatcher, NotificationSink};
use sync::SyncQueue;

/// The agent. One instance lives for the whole process and is shared across
/// concurrent request interceptions; all interior state is synchronized.
pub struct Agent<B: StoreBackend, F: Fetcher> {
  config: Config,
  origin: Url,
  fetch_timeout: Duration,
  stores: StoreManager<B>,
  fetcher: Arc<F>,
  state: Mutex<AgentState>,
  skip_waiting: AtomicBool,
  sync: SyncQueue,
  notifier: NotificationDispatcher,
}

impl<B: StoreBackend + 'static, F: Fetcher> Agent<B, F> {
  pub fn new(
    config: Config,
    backend: B,
    fetcher: F,
    sink: Arc<dyn NotificationSink>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let notifier = NotificationDispatcher::new(config.notifications.clone(), &origin, sink)?;
    let stores = StoreManager::new(backend);

    // Register the current generation's stores up front so lookups see
    // them in the fixed order: static first, then dynamic. A failure here
    // is a store error: logged, and the agent still comes up.
    for name in config.current_store_names() {
      if let Err(e) = stores.open(&name) {
        warn!(store = %name, error = %e, "failed to open store");
      }
    }

    Ok(Self {
      fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
      config,
      origin,
      stores,
      fetcher: Arc::new(fetcher),
      state: Mutex::new(AgentState::Installing),
      skip_waiting: AtomicBool::new(false),
      sync: SyncQueue::new(),
      notifier,
    })
  }

  /// Handle one external signal. The match is exhaustive over the closed
  /// signal set; each arm is awaited to completion before the signal counts
  /// as handled.
  pub async fn dispatch(&self, signal: Signal) -> Result<Effect> {
    match signal {
      Signal::Install => {
        self.install().await?;
        Ok(Effect::None)
      }
      Signal::Activate => {
        self.activate().await?;
        Ok(Effect::None)
      }
      Signal::Fetch(request) => Ok(Effect::Response(self.handle_fetch(&request).await?)),
      Signal::Sync { tag } => Ok(Effect::Sync(self.sync.handle(&tag).await)),
      Signal::Push { payload } => {
        self.notifier.on_push(payload.as_deref())?;
        Ok(Effect::None)
      }
      Signal::NotificationClick { action } => {
        self.notifier.on_click(&action)?;
        Ok(Effect::None)
      }
      Signal::Message(AgentMessage::SkipWaiting) => {
        self.skip_waiting.store(true, Ordering::SeqCst);
        Ok(Effect::None)
      }
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn stores(&self) -> &StoreManager<B> {
    &self.stores
  }

  /// The deferred-work queue, for handler registration.
  pub fn sync_queue(&self) -> &SyncQueue {
    &self.sync
  }

  /// Whether the agent has been told to supersede older instances without
  /// waiting for them to wind down.
  pub fn skips_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }
}

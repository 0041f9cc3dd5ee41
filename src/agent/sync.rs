//! Deferred-work queue.
//!
//! The application registers interest in opaque tags; when the platform
//! signals that a tag is ready to run, `handle` maps it to its handler and
//! reports the outcome upward so the platform can decide on re-delivery. The
//! queue does no retry or backoff of its own, and persists nothing beyond
//! the registration: a handler recovers its own inputs on execution.

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Outcome of one deferred-work signal, reported to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// The handler ran to completion; no re-delivery needed.
  Completed,
  /// The handler failed; the platform may re-deliver the tag.
  Failed,
  /// No handler is registered for the tag; silently ignored.
  Ignored,
}

impl SyncOutcome {
  /// Whether the platform should consider the signal handled.
  pub fn is_handled(&self) -> bool {
    !matches!(self, SyncOutcome::Failed)
  }
}

/// Work bound to a tag.
pub trait SyncHandler: Send + Sync {
  fn run(&self) -> BoxFuture<'static, Result<()>>;
}

type SharedRun = Shared<BoxFuture<'static, SyncOutcome>>;

/// Tag→handler registry with per-tag mutual exclusion.
///
/// Concurrent triggers for one tag coalesce onto a single handler run: late
/// arrivals await the in-flight future and observe its outcome instead of
/// starting a second execution.
pub struct SyncQueue {
  handlers: Mutex<HashMap<String, Arc<dyn SyncHandler>>>,
  in_flight: Mutex<HashMap<String, SharedRun>>,
}

impl SyncQueue {
  pub fn new() -> Self {
    Self {
      handlers: Mutex::new(HashMap::new()),
      in_flight: Mutex::new(HashMap::new()),
    }
  }

  /// Bind a handler to a tag, replacing any previous binding.
  pub fn register(&self, tag: &str, handler: Arc<dyn SyncHandler>) {
    let mut handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
    handlers.insert(tag.to_string(), handler);
  }

  /// Bind an async closure to a tag.
  pub fn register_fn<F, Fut>(&self, tag: &str, f: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    struct FnHandler<F>(F);

    impl<F, Fut> SyncHandler for FnHandler<F>
    where
      F: Fn() -> Fut + Send + Sync + 'static,
      Fut: Future<Output = Result<()>> + Send + 'static,
    {
      fn run(&self) -> BoxFuture<'static, Result<()>> {
        (self.0)().boxed()
      }
    }

    self.register(tag, Arc::new(FnHandler(f)));
  }

  /// Run the handler for `tag`, coalescing with any in-flight run.
  pub async fn handle(&self, tag: &str) -> SyncOutcome {
    let run = {
      let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());

      if let Some(existing) = in_flight.get(tag) {
        debug!(tag, "coalescing onto in-flight run");
        existing.clone()
      } else {
        let handler = {
          let handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
          handlers.get(tag).cloned()
        };
        let handler = match handler {
          Some(h) => h,
          None => {
            debug!(tag, "no handler registered, ignoring");
            return SyncOutcome::Ignored;
          }
        };

        let owned_tag = tag.to_string();
        let run: SharedRun = async move {
          match handler.run().await {
            Ok(()) => {
              debug!(tag = %owned_tag, "deferred work completed");
              SyncOutcome::Completed
            }
            Err(e) => {
              warn!(tag = %owned_tag, error = %e, "deferred work failed");
              SyncOutcome::Failed
            }
          }
        }
        .boxed()
        .shared();

        in_flight.insert(tag.to_string(), run.clone());
        run
      }
    };

    let outcome = run.clone().await;

    // Only the entry for the run that was awaited may be removed: by the
    // time a late coalesced waiter resolves, a newer run for the same tag
    // may already occupy the slot.
    let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
    if in_flight.get(tag).is_some_and(|current| run.ptr_eq(current)) {
      in_flight.remove(tag);
    }

    outcome
  }
}

impl Default for SyncQueue {
  fn default() -> Self {
    Self::new()
  }
}

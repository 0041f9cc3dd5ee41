//! Lifecycle controller: Installing → Installed → Activating → Active.
//!
//! Transitions are driven only by external lifecycle signals, never by
//! request traffic. The agent outlives any single page session; `Active` is
//! terminal and holds until the host process recycles the agent.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

use crate::net::{Fetcher, Request};
use crate::store::StoreBackend;

use super::Agent;

/// Lifecycle states, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  Installing,
  Installed,
  Activating,
  Active,
}

impl<B: StoreBackend + 'static, F: Fetcher> Agent<B, F> {
  pub fn state(&self) -> AgentState {
    *self.state.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn set_state(&self, next: AgentState) {
    *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
  }

  /// Install: seed the static store with every manifest entry.
  ///
  /// Per-entry failures are logged and skipped. An agent that can never
  /// install is worse than one with an incomplete static store, so a missing
  /// manifest resource never blocks the transition.
  pub async fn install(&self) -> Result<()> {
    self.set_state(AgentState::Installing);
    let store = self.config.static_store_name();
    info!(version = %self.config.version, store = %store, "install: seeding static store");

    if let Err(e) = self.stores.open(&store) {
      warn!(store = %store, error = %e, "install: failed to open static store");
    }

    for entry in &self.config.manifest {
      if let Err(e) = self.populate_entry(&store, entry).await {
        warn!(entry = %entry, error = %e, "install: manifest entry skipped");
      }
    }

    // Supersede any previously active instance immediately rather than
    // waiting for its clients to close.
    self.skip_waiting.store(true, Ordering::SeqCst);

    self.set_state(AgentState::Installed);
    info!(store = %store, "install: complete");
    Ok(())
  }

  /// Activate: retire every store generation except the current two, then
  /// take over all open clients.
  pub async fn activate(&self) -> Result<()> {
    self.set_state(AgentState::Activating);
    let keep = self.config.current_store_names();
    info!(version = %self.config.version, "activate: pruning superseded stores");

    match self.stores.list_names() {
      Ok(names) => {
        for name in names {
          if keep.iter().any(|k| *k == name) {
            continue;
          }
          match self.stores.delete(&name) {
            Ok(()) => info!(store = %name, "activate: retired stale store"),
            Err(e) => warn!(store = %name, error = %e, "activate: failed to retire store"),
          }
        }
      }
      Err(e) => warn!(error = %e, "activate: could not enumerate stores"),
    }

    // Exactly one live generation of each store after activation.
    for name in &keep {
      if let Err(e) = self.stores.open(name) {
        warn!(store = %name, error = %e, "activate: failed to open store");
      }
    }

    self.set_state(AgentState::Active);
    info!("activate: agent active, claiming open clients");
    Ok(())
  }

  /// Re-fetch every manifest entry into the static store. This is the work
  /// behind the config-declared deferred-work tags: when connectivity
  /// returns, the static store is brought back up to date.
  pub async fn refresh_static_store(&self) -> Result<()> {
    let store = self.config.static_store_name();
    let mut failed = 0usize;

    for entry in &self.config.manifest {
      if let Err(e) = self.populate_entry(&store, entry).await {
        warn!(entry = %entry, error = %e, "refresh: manifest entry skipped");
        failed += 1;
      }
    }

    if failed > 0 {
      return Err(eyre!(
        "{} of {} manifest entries failed to refresh",
        failed,
        self.config.manifest.len()
      ));
    }
    Ok(())
  }

  /// Fetch one manifest path and write it into `store`.
  async fn populate_entry(&self, store: &str, path: &str) -> Result<()> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid manifest path {}: {}", path, e))?;
    let request = Request::get(url);

    let response = self.fetcher.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!("Unexpected status {} for {}", response.status, path));
    }

    self.stores.put(store, &request.identity(), &response)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::support::{basic_response, test_agent, test_config, Scripted, ScriptedFetcher};
  use crate::agent::Agent;
  use crate::event::Signal;
  use crate::store::{MemoryBackend, StoreBackend};

  #[tokio::test]
  async fn install_tolerates_a_failing_manifest_entry() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
      "GET https://app.example.com/",
      Scripted::Respond(basic_response("root")),
    );
    fetcher.script(
      "GET https://app.example.com/manifest.json",
      Scripted::Respond(basic_response("{}")),
    );
    fetcher.script("GET https://app.example.com/offline", Scripted::Fail);

    let (agent, _sink) = test_agent(test_config(), fetcher);
    agent.dispatch(Signal::Install).await.unwrap();

    assert_eq!(agent.state(), AgentState::Installed);
    assert_eq!(agent.stores().len("static-v1").unwrap(), 2);
    assert!(agent
      .stores()
      .match_any("GET https://app.example.com/")
      .unwrap()
      .is_some());
    assert!(agent
      .stores()
      .match_any("GET https://app.example.com/offline")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn install_signals_eager_supersession() {
    let fetcher = ScriptedFetcher::new();
    let (agent, _sink) = test_agent(test_config(), fetcher);
    assert!(!agent.skips_waiting());

    agent.install().await.unwrap();
    assert!(agent.skips_waiting());
  }

  #[tokio::test]
  async fn activate_prunes_superseded_generations() {
    let backend = MemoryBackend::default();
    backend.open("static-v0").unwrap();
    backend.open("dynamic-v0").unwrap();
    backend
      .put("static-v0", "k", "GET https://app.example.com/old", &basic_response("old"))
      .unwrap();

    let sink = std::sync::Arc::new(crate::agent::support::RecordingSink::default());
    let agent = Agent::new(test_config(), backend, ScriptedFetcher::new(), sink).unwrap();

    agent.dispatch(Signal::Activate).await.unwrap();

    let mut names = agent.stores().list_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["dynamic-v1".to_string(), "static-v1".to_string()]);
    assert_eq!(agent.state(), AgentState::Active);

    // Pruning is idempotent.
    agent.activate().await.unwrap();
    let mut names = agent.stores().list_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["dynamic-v1".to_string(), "static-v1".to_string()]);
  }

  #[tokio::test]
  async fn refresh_reports_failure_upward() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
      "GET https://app.example.com/",
      Scripted::Respond(basic_response("root")),
    );
    // The other two manifest entries stay unscripted and fail.

    let (agent, _sink) = test_agent(test_config(), fetcher);
    assert!(agent.refresh_static_store().await.is_err());
    assert_eq!(agent.stores().len("static-v1").unwrap(), 1);
  }
}

//! Named, versioned key→response stores.
//!
//! A store maps a request identity to a captured response. Two stores exist
//! by convention per agent generation: a static one seeded at install time
//! and a dynamic one populated from successful fetches. There is no eviction
//! and no per-entry TTL; staleness is handled wholesale when the lifecycle
//! controller retires a superseded generation.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

use crate::net::Response;

/// A response read back from a store.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Persistence boundary for stores. The SQLite implementation is durable
/// across process restarts; the in-memory one backs tests.
pub trait StoreBackend: Send + Sync {
  /// Create the store if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Upsert an entry. Last write for a key wins.
  fn put(&self, name: &str, key: &str, identity: &str, response: &Response) -> Result<()>;

  /// Read an entry by key.
  fn get(&self, name: &str, key: &str) -> Result<Option<StoredResponse>>;

  /// Drop a store and all of its entries.
  fn delete(&self, name: &str) -> Result<()>;

  /// Names of all stores present in the backend, including ones left
  /// behind by previous agent generations.
  fn list_names(&self) -> Result<Vec<String>>;

  /// Number of entries in a store.
  fn len(&self, name: &str) -> Result<usize>;
}

/// Owns the set of open stores and answers lookups across them.
///
/// Lookup order across stores equals open order, so whichever store was
/// opened first shadows later ones for a shared key.
pub struct StoreManager<B: StoreBackend> {
  backend: Arc<B>,
  open_order: Arc<Mutex<Vec<String>>>,
}

impl<B: StoreBackend> StoreManager<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend: Arc::new(backend),
      open_order: Arc::new(Mutex::new(Vec::new())),
    }
  }

  /// Open or create a named store, registering it for lookups.
  pub fn open(&self, name: &str) -> Result<()> {
    self.backend.open(name)?;

    let mut order = self
      .open_order
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !order.iter().any(|n| n == name) {
      order.push(name.to_string());
    }

    Ok(())
  }

  /// Write a response under a request identity. Opens the store if needed.
  pub fn put(&self, name: &str, identity: &str, response: &Response) -> Result<()> {
    self.open(name)?;
    self.backend.put(name, &entry_key(identity), identity, response)
  }

  /// Look a request identity up in one store.
  pub fn match_store(&self, name: &str, identity: &str) -> Result<Option<StoredResponse>> {
    self.backend.get(name, &entry_key(identity))
  }

  /// Look a request identity up across all open stores, first match wins.
  pub fn match_any(&self, identity: &str) -> Result<Option<StoredResponse>> {
    let names: Vec<String> = self
      .open_order
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .clone();

    let key = entry_key(identity);
    for name in &names {
      if let Some(hit) = self.backend.get(name, &key)? {
        return Ok(Some(hit));
      }
    }

    Ok(None)
  }

  /// Drop a store and all of its entries.
  pub fn delete(&self, name: &str) -> Result<()> {
    self.backend.delete(name)?;

    let mut order = self
      .open_order
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    order.retain(|n| n != name);

    Ok(())
  }

  /// All store names present in the backend, not just the open ones.
  pub fn list_names(&self) -> Result<Vec<String>> {
    self.backend.list_names()
  }

  pub fn len(&self, name: &str) -> Result<usize> {
    self.backend.len(name)
  }
}

impl<B: StoreBackend> Clone for StoreManager<B> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
      open_order: Arc::clone(&self.open_order),
    }
  }
}

/// SHA256 hash of the request identity, for stable fixed-length keys.
fn entry_key(identity: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(identity.as_bytes());
  hex::encode(hasher.finalize())
}

//! In-memory store backend for tests and cache-disabled runs.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{StoreBackend, StoredResponse};
use crate::net::Response;

/// Non-durable backend holding everything in process memory.
#[derive(Default)]
pub struct MemoryBackend {
  // Vec keeps store creation order stable for list_names.
  stores: Mutex<Vec<(String, HashMap<String, StoredResponse>)>>,
}

impl StoreBackend for MemoryBackend {
  fn open(&self, name: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !stores.iter().any(|(n, _)| n == name) {
      stores.push((name.to_string(), HashMap::new()));
    }
    Ok(())
  }

  fn put(&self, name: &str, key: &str, _identity: &str, response: &Response) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !stores.iter().any(|(n, _)| n == name) {
      stores.push((name.to_string(), HashMap::new()));
    }
    let entries = stores
      .iter_mut()
      .find(|(n, _)| n == name)
      .map(|(_, entries)| entries)
      .ok_or_else(|| eyre!("Store vanished"))?;

    entries.insert(
      key.to_string(),
      StoredResponse {
        response: response.clone(),
        stored_at: Utc::now(),
      },
    );

    Ok(())
  }

  fn get(&self, name: &str, key: &str) -> Result<Option<StoredResponse>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      stores
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, entries)| entries.get(key))
        .cloned(),
    )
  }

  fn delete(&self, name: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores.retain(|(n, _)| n != name);
    Ok(())
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.iter().map(|(n, _)| n.clone()).collect())
  }

  fn len(&self, name: &str) -> Result<usize> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      stores
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, entries)| entries.len())
        .unwrap_or(0),
    )
  }
}

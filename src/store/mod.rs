//! Typed façade over the opaque key-value credential store.
//!
//! The façade does not interpret values; it only enforces the category
//! allowlist and provides transactional batching. A transaction buffers every
//! `set` made while it is open and flushes the union atomically when the
//! outermost scope commits. Nested (and concurrent) transactions join the
//! outermost one; reads through the façade see uncommitted writes.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub const CATEGORY_SESSION: &str = "session";
pub const CATEGORY_SENDER_KEY: &str = "sender-key";
pub const CATEGORY_SENDER_KEY_MEMORY: &str = "sender-key-memory";
pub const CATEGORY_ACCOUNT: &str = "account";
pub const CATEGORY_PRE_KEY: &str = "pre-key";
pub const CATEGORY_SIGNED_PRE_KEY: &str = "signed-pre-key";
pub const CATEGORY_SENDER_SIGNING_KEY: &str = "sender-signing-key";
pub const CATEGORY_APP_STATE_SYNC_KEY: &str = "app-state-sync-key";

const ALLOWED_CATEGORIES: &[&str] = &[
    CATEGORY_SESSION,
    CATEGORY_SENDER_KEY,
    CATEGORY_SENDER_KEY_MEMORY,
    CATEGORY_ACCOUNT,
    CATEGORY_PRE_KEY,
    CATEGORY_SIGNED_PRE_KEY,
    CATEGORY_SENDER_SIGNING_KEY,
    CATEGORY_APP_STATE_SYNC_KEY,
];

/// Deletes are expressed as `None` values inside a patch.
pub type CategoryPatch = HashMap<String, Option<Vec<u8>>>;
pub type StorePatch = HashMap<String, CategoryPatch>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("category '{0}' is not in the key-store allowlist")]
    UnknownCategory(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The narrow contract the core consumes from the persistent credential
/// store. An empty `keys` slice means "all keys in the category".
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, category: &str, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;
    async fn set(&self, patch: StorePatch) -> Result<()>;
}

#[derive(Default)]
struct TransactionState {
    depth: u32,
    mutations: StorePatch,
}

pub struct KeyStore {
    backend: Arc<dyn KeyValueBackend>,
    tx: Mutex<TransactionState>,
}

impl KeyStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            tx: Mutex::new(TransactionState::default()),
        }
    }

    fn check_category(category: &str) -> Result<()> {
        if ALLOWED_CATEGORIES.contains(&category) {
            Ok(())
        } else {
            Err(StoreError::UnknownCategory(category.to_string()))
        }
    }

    /// Batched read. Inside a transaction the buffered mutations overlay the
    /// backend: pending writes are visible, pending deletes hide entries.
    pub async fn get(&self, category: &str, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        Self::check_category(category)?;

        let overlay: Option<CategoryPatch> = {
            let state = self.tx.lock().await;
            if state.depth > 0 {
                state.mutations.get(category).cloned()
            } else {
                None
            }
        };

        let Some(overlay) = overlay else {
            return self.backend.get(category, keys).await;
        };

        let mut result = if keys.is_empty() {
            self.backend.get(category, keys).await?
        } else {
            let unresolved: Vec<String> = keys
                .iter()
                .filter(|k| !overlay.contains_key(*k))
                .cloned()
                .collect();
            if unresolved.is_empty() {
                HashMap::new()
            } else {
                self.backend.get(category, &unresolved).await?
            }
        };

        for (key, value) in &overlay {
            if !keys.is_empty() && !keys.contains(key) {
                continue;
            }
            match value {
                Some(v) => {
                    result.insert(key.clone(), v.clone());
                }
                None => {
                    result.remove(key);
                }
            }
        }

        Ok(result)
    }

    /// Batched write. Inside a transaction the patch is buffered; otherwise
    /// it goes straight to the backend.
    pub async fn set(&self, patch: StorePatch) -> Result<()> {
        for category in patch.keys() {
            Self::check_category(category)?;
        }

        let mut state = self.tx.lock().await;
        if state.depth > 0 {
            for (category, entries) in patch {
                state
                    .mutations
                    .entry(category)
                    .or_default()
                    .extend(entries);
            }
            Ok(())
        } else {
            drop(state);
            self.backend.set(patch).await
        }
    }

    /// Runs `body` inside a transaction. All `set` calls made through this
    /// store while the transaction is open are buffered and flushed in one
    /// backend write when the outermost scope completes successfully. A
    /// failing body discards the buffered mutations.
    pub async fn transaction<T, F, Fut>(&self, body: F) -> std::result::Result<T, anyhow::Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, anyhow::Error>>,
    {
        {
            let mut state = self.tx.lock().await;
            state.depth += 1;
        }

        let result = body().await;

        let flush = {
            let mut state = self.tx.lock().await;
            state.depth -= 1;
            if state.depth == 0 {
                let mutations = std::mem::take(&mut state.mutations);
                if result.is_ok() && !mutations.is_empty() {
                    Some(mutations)
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some(mutations) = flush {
            self.backend.set(mutations).await?;
        }

        result
    }
}

/// Convenience for building single-entry patches.
pub fn single_patch(category: &str, key: String, value: Option<Vec<u8>>) -> StorePatch {
    let mut entries = CategoryPatch::new();
    entries.insert(key, value);
    let mut patch = StorePatch::new();
    patch.insert(category.to_string(), entries);
    patch
}

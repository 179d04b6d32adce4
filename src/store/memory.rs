use super::{KeyValueBackend, Result, StorePatch};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local backend used by tests and as a default store.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, category: &str, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let data = self.data.lock().await;
        let Some(entries) = data.get(category) else {
            return Ok(HashMap::new());
        };
        if keys.is_empty() {
            return Ok(entries.clone());
        }
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, patch: StorePatch) -> Result<()> {
        let mut data = self.data.lock().await;
        for (category, entries) in patch {
            let bucket = data.entry(category).or_default();
            for (key, value) in entries {
                match value {
                    Some(v) => {
                        bucket.insert(key, v);
                    }
                    None => {
                        bucket.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

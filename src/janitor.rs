//! Opportunistic cleanup of sender-key storage.
//!
//! Both passes are idempotent and safe to run at any time. Failures are
//! swallowed and logged; cleanup must never break foreground sends.

use crate::binary::jid::Jid;
use crate::client::Client;
use crate::signal::sender_key::{MAX_STATES, SenderKeyState};
use crate::store::{
    CATEGORY_SENDER_KEY, CATEGORY_SENDER_KEY_MEMORY, CategoryPatch, StorePatch, single_patch,
};
use serde_json::Value;

impl Client {
    /// Runs both cleanup passes.
    pub async fn run_sender_key_cleanup(&self) {
        self.clean_sender_key_memory().await;
        self.clean_sender_key_records().await;
    }

    /// Memory pass: drops non-object entries, keeps only `device-jid → true`
    /// mappings, and deletes groups that end up empty.
    pub async fn clean_sender_key_memory(&self) {
        let all = match self.key_store.get(CATEGORY_SENDER_KEY_MEMORY, &[]).await {
            Ok(all) => all,
            Err(e) => {
                log::warn!("Sender-key-memory cleanup read failed: {e}");
                return;
            }
        };

        let mut patch = CategoryPatch::new();
        for (group, raw) in all {
            match serde_json::from_slice::<Value>(&raw) {
                Ok(Value::Object(map)) => {
                    let cleaned: serde_json::Map<String, Value> = map
                        .iter()
                        .filter(|(device, seen)| {
                            device.parse::<Jid>().is_ok() && **seen == Value::Bool(true)
                        })
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    if cleaned.is_empty() {
                        patch.insert(group, None);
                    } else if cleaned.len() != map.len() {
                        let bytes = serde_json::to_vec(&Value::Object(cleaned))
                            .expect("memory map is always serializable");
                        patch.insert(group, Some(bytes));
                    }
                }
                _ => {
                    patch.insert(group, None);
                }
            }
        }

        if patch.is_empty() {
            return;
        }
        log::debug!("Sender-key-memory cleanup touching {} groups", patch.len());
        let mut store_patch = StorePatch::new();
        store_patch.insert(CATEGORY_SENDER_KEY_MEMORY.to_string(), patch);
        if let Err(e) = self.key_store.set(store_patch).await {
            log::warn!("Sender-key-memory cleanup write failed: {e}");
        }
    }

    /// Key pass (aggressive): deletes records that are not non-empty JSON
    /// arrays, filters out invalid states, trims rings past the state cap,
    /// and drops keys with no valid state left.
    pub async fn clean_sender_key_records(&self) {
        let all = match self.key_store.get(CATEGORY_SENDER_KEY, &[]).await {
            Ok(all) => all,
            Err(e) => {
                log::warn!("Sender-key cleanup read failed: {e}");
                return;
            }
        };

        let mut patch = CategoryPatch::new();
        for (key, raw) in all {
            // Records arrive either as the JSON array itself or as a JSON
            // string wrapping the array text; unwrap the latter before
            // judging the shape.
            let decoded = match serde_json::from_slice::<Value>(&raw) {
                Ok(Value::String(text)) => serde_json::from_str::<Value>(&text).ok(),
                Ok(other) => Some(other),
                Err(_) => None,
            };
            let states = match decoded {
                Some(Value::Array(items)) if !items.is_empty() => items,
                _ => {
                    patch.insert(key, None);
                    continue;
                }
            };

            let original_len = states.len();
            let mut valid: Vec<SenderKeyState> = states
                .into_iter()
                .filter_map(|item| serde_json::from_value::<SenderKeyState>(item).ok())
                .filter(|state| state.is_valid())
                .collect();

            if valid.is_empty() {
                patch.insert(key, None);
                continue;
            }
            if valid.len() > MAX_STATES {
                valid.drain(..valid.len() - MAX_STATES);
            }
            if valid.len() != original_len {
                let bytes =
                    serde_json::to_vec(&valid).expect("sender key states are always serializable");
                patch.insert(key, Some(bytes));
            }
        }

        if patch.is_empty() {
            return;
        }
        log::debug!("Sender-key cleanup touching {} records", patch.len());
        let mut store_patch = StorePatch::new();
        store_patch.insert(CATEGORY_SENDER_KEY.to_string(), patch);
        if let Err(e) = self.key_store.set(store_patch).await {
            log::warn!("Sender-key cleanup write failed: {e}");
        }
    }

    /// Forgets which devices hold the group's current sender key, forcing
    /// redistribution on the next send.
    pub async fn clear_group_sender_key_memory(&self, group: &Jid) {
        let patch = single_patch(CATEGORY_SENDER_KEY_MEMORY, group.to_string(), None);
        if let Err(e) = self.key_store.set(patch).await {
            log::warn!("Failed to clear sender-key memory for {group}: {e}");
        }
    }

    /// Deletes the local sender key for a group, forcing a rotation on the
    /// next send.
    pub async fn clear_own_sender_key(&self, group: &Jid) {
        let me = match self.own_identity() {
            Ok(identity) => identity.jid,
            Err(_) => {
                log::warn!("Cannot clear own sender key without an identity");
                return;
            }
        };
        let key = format!("{}::{}::0", group, me.user);
        let patch = single_patch(CATEGORY_SENDER_KEY, key, None);
        if let Err(e) = self.key_store.set(patch).await {
            log::warn!("Failed to clear own sender key for {group}: {e}");
        }
    }
}

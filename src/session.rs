//! Pairwise session assertion.
//!
//! Before encrypting for a recipient device the relay makes sure a Signal
//! session exists: one batched store read decides which devices are missing,
//! one prekey query covers all of them, and each returned bundle is injected
//! through the repository.

use crate::binary::jid::Jid;
use crate::client::Client;
use crate::signal::JidSignalExt;
use crate::store::CATEGORY_SESSION;
use anyhow::Result;
use std::collections::HashSet;

impl Client {
    /// Ensures pairwise sessions exist for every listed device JID.
    ///
    /// Returns whether any prekey fetch happened. With `force` the verified
    /// set and the store check are bypassed and every JID is re-fetched.
    pub async fn assert_sessions(&self, jids: &[Jid], force: bool) -> Result<bool> {
        if jids.is_empty() {
            return Ok(false);
        }

        let mut seen = HashSet::new();
        let unique: Vec<Jid> = jids
            .iter()
            .filter(|j| seen.insert((*j).clone()))
            .cloned()
            .collect();

        let jids_requiring_fetch: Vec<Jid> = if force {
            unique
        } else {
            let unverified: Vec<Jid> = unique
                .into_iter()
                .filter(|j| !self.is_session_verified(&j.to_protocol_address().to_string()))
                .collect();
            if unverified.is_empty() {
                return Ok(false);
            }

            let addresses: Vec<String> = unverified
                .iter()
                .map(|j| j.to_protocol_address().to_string())
                .collect();
            let sessions = self.key_store.get(CATEGORY_SESSION, &addresses).await?;

            unverified
                .into_iter()
                .filter(|j| !sessions.contains_key(&j.to_protocol_address().to_string()))
                .collect()
        };

        if jids_requiring_fetch.is_empty() {
            return Ok(false);
        }

        log::debug!("Fetching sessions for {jids_requiring_fetch:?}");
        let bundles = self.fetch_pre_keys(&jids_requiring_fetch, None).await?;

        for jid in &jids_requiring_fetch {
            let address = jid.to_protocol_address();
            let Some(bundle) = bundles.get(jid) else {
                return Err(crate::error::RelayError::ProtocolViolation(format!(
                    "no pre-key bundle returned for {address}"
                ))
                .into());
            };
            self.signal.inject_prekey_bundle(&address, bundle).await?;
        }

        self.mark_sessions_verified(
            jids_requiring_fetch
                .iter()
                .map(|j| j.to_protocol_address().to_string()),
        );

        Ok(true)
    }
}

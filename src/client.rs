use crate::binary::jid::Jid;
use crate::config::{RelayCollaborators, RelayConfig};
use crate::error::RelayError;
use crate::mediaconn::MediaConnState;
use crate::proto;
use crate::signal::SignalRepository;
use crate::store::KeyStore;
use crate::transport::StanzaTransport;
use crate::types::events::EventBus;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{SystemTime, UNIX_EPOCH};

/// The logged-in account as the relay sees it.
#[derive(Debug, Clone)]
pub struct AccountIdentity {
    /// Own phone-number JID, including the device id of this endpoint.
    pub jid: Jid,
    /// Linked identity used when a group addresses members by LID.
    pub lid: Option<Jid>,
    /// Signed long-term identity attached beside prekey ciphertexts.
    pub account: Option<proto::AdvSignedDeviceIdentity>,
}

/// The relay engine. One value per connection; all caches and in-flight
/// state live here as explicit fields, and operations are spread over the
/// component modules as `impl Client` blocks.
pub struct Client {
    pub(crate) transport: Arc<dyn StanzaTransport>,
    pub(crate) key_store: Arc<KeyStore>,
    pub(crate) signal: Arc<dyn SignalRepository>,
    pub(crate) collaborators: RelayCollaborators,
    pub(crate) config: RelayConfig,
    pub event_bus: EventBus,

    pub(crate) identity: std::sync::RwLock<Option<AccountIdentity>>,

    /// Per-user device lists resolved via USync, fresh for the configured TTL.
    pub(crate) device_cache: moka::future::Cache<Jid, Vec<Jid>>,
    /// JIDs whose session existence was confirmed recently. Best-effort
    /// optimization only: no TTL, cleared wholesale past the bound. Real
    /// invalidation comes through ratchet failure on the next message.
    pub(crate) verified_sessions: std::sync::Mutex<HashSet<String>>,
    pub(crate) media_conn: tokio::sync::Mutex<MediaConnState>,
    pub(crate) privacy_settings: tokio::sync::RwLock<Option<HashMap<String, String>>>,

    pub(crate) unique_id: String,
    pub(crate) id_counter: AtomicU64,
}

pub(crate) const VERIFIED_SESSIONS_BOUND: usize = 1000;

impl Client {
    /// The key store is shared with the signal repository so that writes the
    /// repository makes during a relay land in the same transaction.
    pub fn new(
        transport: Arc<dyn StanzaTransport>,
        key_store: Arc<KeyStore>,
        signal: Arc<dyn SignalRepository>,
        collaborators: RelayCollaborators,
        config: RelayConfig,
    ) -> Self {
        let mut unique_id_bytes = [0u8; 2];
        rand::rng().fill_bytes(&mut unique_id_bytes);

        let device_cache = moka::future::Cache::builder()
            .time_to_live(config.user_devices_cache_ttl)
            .max_capacity(config.user_devices_cache_capacity)
            .build();

        Self {
            transport,
            key_store,
            signal,
            collaborators,
            config,
            event_bus: EventBus::new(),
            identity: std::sync::RwLock::new(None),
            device_cache,
            verified_sessions: std::sync::Mutex::new(HashSet::new()),
            media_conn: tokio::sync::Mutex::new(MediaConnState::default()),
            privacy_settings: tokio::sync::RwLock::new(None),
            unique_id: format!("{}.{}", unique_id_bytes[0], unique_id_bytes[1]),
            id_counter: AtomicU64::new(0),
        }
    }

    pub fn set_identity(&self, identity: AccountIdentity) {
        *self.identity.write().expect("identity lock poisoned") = Some(identity);
    }

    /// Current identity, or `NotAuthenticated` when none was installed.
    pub(crate) fn own_identity(&self) -> Result<AccountIdentity, anyhow::Error> {
        self.identity
            .read()
            .expect("identity lock poisoned")
            .clone()
            .ok_or_else(|| RelayError::NotAuthenticated.into())
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// Generates a message ID in the format the protocol expects: the
    /// `3EB0` prefix followed by 18 uppercase hex chars derived from the
    /// timestamp, own JID and fresh randomness.
    pub fn generate_message_id(&self) -> String {
        let mut data = Vec::with_capacity(8 + 20 + 16);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        data.extend_from_slice(&timestamp.to_be_bytes());

        if let Ok(identity) = self.own_identity() {
            data.extend_from_slice(identity.jid.user.as_bytes());
            data.extend_from_slice(b"@c.us");
        }

        let mut random_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut random_bytes);
        data.extend_from_slice(&random_bytes);

        let hash = Sha256::digest(&data);
        format!("3EB0{}", hex::encode(&hash[..9]).to_uppercase())
    }

    /// Remembers a batch of JIDs as having live sessions. The set is an
    /// optimization, not a correctness aid; past the bound it is cleared
    /// wholesale rather than evicted piecemeal.
    pub(crate) fn mark_sessions_verified(&self, jids: impl IntoIterator<Item = String>) {
        let mut verified = self
            .verified_sessions
            .lock()
            .expect("verified set lock poisoned");
        verified.extend(jids);
        if verified.len() > VERIFIED_SESSIONS_BOUND {
            log::debug!("Verified-sessions set overflowed, clearing");
            verified.clear();
        }
    }

    pub(crate) fn is_session_verified(&self, jid: &str) -> bool {
        self.verified_sessions
            .lock()
            .expect("verified set lock poisoned")
            .contains(jid)
    }
}

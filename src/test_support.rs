//! Test doubles for exercising the relay without a network or real crypto.
//!
//! `MockTransport` answers the iq shapes the engine emits (usync, prekey
//! fetch, media_conn, privacy) from configurable tables and records every
//! stanza. `MockSignalRepository` fakes the ciphertext layer while going
//! through the shared key store for session and sender-key state, so
//! transactional behavior is exercised for real.

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::Jid;
use crate::binary::node::Node;
use crate::client::{AccountIdentity, Client};
use crate::config::{GroupMetadataSource, RelayCollaborators, RelayConfig};
use crate::error::TransportError;
use crate::proto;
use crate::signal::{
    EncryptedGroupMessage, EncryptedMessage, EncryptedMessageType, PreKeyBundle, ProtocolAddress,
    SenderKeyName, SignalRepository,
};
use crate::signal::sender_key::SenderKeyRecord;
use crate::store::{CATEGORY_SENDER_KEY, CATEGORY_SESSION, KeyStore, single_patch};
use crate::store::memory::MemoryBackend;
use crate::types::group::GroupMetadata;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SESSION_FRESH: &[u8] = b"fresh";
const SESSION_ESTABLISHED: &[u8] = b"established";

#[derive(Default)]
pub struct MockTransport {
    /// `user -> device ids` answered to usync queries. Users not listed
    /// answer with just the primary device.
    pub devices: Mutex<HashMap<String, Vec<u16>>>,
    pub sent_nodes: Mutex<Vec<Node>>,
    pub iq_requests: Mutex<Vec<Node>>,
    pub usync_queries: AtomicUsize,
    pub prekey_queries: AtomicUsize,
    pub media_conn_queries: AtomicUsize,
    /// Artificial latency for media_conn answers, letting tests provoke
    /// coalescing.
    pub media_conn_delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_devices(&self, user: &str, device_ids: &[u16]) {
        self.devices
            .lock()
            .unwrap()
            .insert(user.to_string(), device_ids.to_vec());
    }

    pub fn sent(&self) -> Vec<Node> {
        self.sent_nodes.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<Node> {
        self.sent()
            .into_iter()
            .filter(|n| n.tag == "message")
            .collect()
    }

    fn answer_usync(&self, query: &Node) -> Node {
        self.usync_queries.fetch_add(1, Ordering::SeqCst);
        let devices = self.devices.lock().unwrap();

        let requested: Vec<Jid> = query
            .get_optional_child("list")
            .and_then(|l| l.children())
            .unwrap_or_default()
            .iter()
            .filter_map(|u| u.attrs.get("jid")?.parse().ok())
            .collect();

        let user_nodes: Vec<Node> = requested
            .iter()
            .map(|jid| {
                let ids = devices.get(&jid.user).cloned().unwrap_or_else(|| vec![0]);
                let device_nodes: Vec<Node> = ids
                    .iter()
                    .map(|id| {
                        NodeBuilder::new("device")
                            .attr("id", id.to_string())
                            .build()
                    })
                    .collect();
                let device_list = NodeBuilder::new("device-list")
                    .children(device_nodes)
                    .build();
                let devices_node = NodeBuilder::new("devices").children([device_list]).build();
                NodeBuilder::new("user")
                    .attr("jid", jid.to_string())
                    .children([devices_node])
                    .build()
            })
            .collect();

        let list = NodeBuilder::new("list").children(user_nodes).build();
        let usync = NodeBuilder::new("usync").children([list]).build();
        NodeBuilder::new("iq")
            .attr("type", "result")
            .children([usync])
            .build()
    }

    fn answer_prekeys(&self, query: &Node) -> Node {
        self.prekey_queries.fetch_add(1, Ordering::SeqCst);

        let user_nodes: Vec<Node> = query
            .children()
            .unwrap_or_default()
            .iter()
            .filter(|u| u.tag == "user")
            .filter_map(|u| u.attrs.get("jid").cloned())
            .map(|jid| {
                let key_id_bytes = |id: u32| id.to_be_bytes()[1..4].to_vec();
                NodeBuilder::new("user")
                    .attr("jid", jid)
                    .children([
                        NodeBuilder::new("registration")
                            .bytes(1234u32.to_be_bytes().to_vec())
                            .build(),
                        NodeBuilder::new("identity").bytes(vec![0x11; 32]).build(),
                        NodeBuilder::new("key")
                            .children([
                                NodeBuilder::new("id").bytes(key_id_bytes(100)).build(),
                                NodeBuilder::new("value").bytes(vec![0x22; 32]).build(),
                            ])
                            .build(),
                        NodeBuilder::new("skey")
                            .children([
                                NodeBuilder::new("id").bytes(key_id_bytes(200)).build(),
                                NodeBuilder::new("value").bytes(vec![0x33; 32]).build(),
                                NodeBuilder::new("signature").bytes(vec![0x44; 64]).build(),
                            ])
                            .build(),
                    ])
                    .build()
            })
            .collect();

        let list = NodeBuilder::new("list").children(user_nodes).build();
        NodeBuilder::new("iq")
            .attr("type", "result")
            .children([list])
            .build()
    }

    fn answer_media_conn(&self) -> Node {
        self.media_conn_queries.fetch_add(1, Ordering::SeqCst);
        let conn = NodeBuilder::new("media_conn")
            .attr("auth", "mock-auth-token")
            .attr("ttl", "3600")
            .children([
                NodeBuilder::new("host")
                    .attr("hostname", "media.example.net")
                    .attr("maxContentLengthBytes", "104857600")
                    .build(),
            ])
            .build();
        NodeBuilder::new("iq")
            .attr("type", "result")
            .children([conn])
            .build()
    }

    fn answer_privacy(&self) -> Node {
        let privacy = NodeBuilder::new("privacy")
            .children([
                NodeBuilder::new("category")
                    .attr("name", "readreceipts")
                    .attr("value", "all")
                    .build(),
            ])
            .build();
        NodeBuilder::new("iq")
            .attr("type", "result")
            .children([privacy])
            .build()
    }
}

#[async_trait]
impl crate::transport::StanzaTransport for MockTransport {
    async fn send_node(&self, node: Node) -> Result<(), TransportError> {
        self.sent_nodes.lock().unwrap().push(node);
        Ok(())
    }

    async fn request(&self, node: Node) -> Result<Node, TransportError> {
        self.iq_requests.lock().unwrap().push(node.clone());

        let first_child_tag = node
            .children()
            .and_then(|c| c.first())
            .map(|c| c.tag.clone())
            .unwrap_or_default();

        let response = match first_child_tag.as_str() {
            "usync" => self.answer_usync(node.get_optional_child("usync").unwrap()),
            "key" => self.answer_prekeys(node.get_optional_child("key").unwrap()),
            "media_conn" => {
                let delay = *self.media_conn_delay.lock().unwrap();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                self.answer_media_conn()
            }
            "privacy" => self.answer_privacy(),
            _ => NodeBuilder::new("iq").attr("type", "result").build(),
        };
        Ok(response)
    }
}

/// Fake ciphertext layer. Sessions are markers in the `session` category:
/// a just-injected session yields one `pkmsg`, then flips to `msg`.
pub struct MockSignalRepository {
    pub key_store: Arc<KeyStore>,
}

#[async_trait]
impl SignalRepository for MockSignalRepository {
    async fn encrypt_message(
        &self,
        address: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, anyhow::Error> {
        let addr = address.to_string();
        let sessions = self
            .key_store
            .get(CATEGORY_SESSION, std::slice::from_ref(&addr))
            .await?;
        let Some(state) = sessions.get(&addr) else {
            return Err(crate::error::RelayError::Crypto(format!(
                "no session with {addr}"
            ))
            .into());
        };

        let fresh = state.as_slice() == SESSION_FRESH;
        if fresh {
            self.key_store
                .set(single_patch(
                    CATEGORY_SESSION,
                    addr.clone(),
                    Some(SESSION_ESTABLISHED.to_vec()),
                ))
                .await?;
        }

        let mut ciphertext = format!("ct[{addr}]:").into_bytes();
        ciphertext.extend_from_slice(plaintext);
        Ok(EncryptedMessage {
            message_type: if fresh {
                EncryptedMessageType::Pkmsg
            } else {
                EncryptedMessageType::Msg
            },
            ciphertext,
        })
    }

    async fn encrypt_group_message(
        &self,
        sender_key_name: &SenderKeyName,
        plaintext: &[u8],
    ) -> Result<EncryptedGroupMessage, anyhow::Error> {
        let key = sender_key_name.store_key();
        let mut record = self
            .key_store
            .get(CATEGORY_SENDER_KEY, std::slice::from_ref(&key))
            .await?
            .remove(&key)
            .and_then(|raw| SenderKeyRecord::deserialize(&raw).ok())
            .unwrap_or_default();

        if record.state_mut().is_none() {
            use rand::Rng;
            let key_id = rand::rng().random_range(1..0x7FFF_FFFFu32);
            record.set_state(key_id, 0, vec![0x55; 32], vec![0x66; 32], vec![0x77; 32]);
        }

        let state = record.state_mut().expect("state installed above");
        let chain = state.sender_chain_key.as_mut().expect("valid state");
        let iteration = chain.iteration;
        chain.iteration += 1;
        let key_id = state.sender_key_id;
        let seed = chain.seed.clone();

        self.key_store
            .set(single_patch(
                CATEGORY_SENDER_KEY,
                key,
                Some(record.serialize()),
            ))
            .await?;

        let distribution_message =
            serde_json::to_vec(&serde_json::json!({
                "keyId": key_id,
                "iteration": iteration,
                "seed": seed,
            }))
            .expect("skdm json");

        let mut ciphertext = format!("skmsg[{key_id}:{iteration}]:").into_bytes();
        ciphertext.extend_from_slice(plaintext);
        Ok(EncryptedGroupMessage {
            ciphertext,
            distribution_message,
        })
    }

    async fn inject_prekey_bundle(
        &self,
        address: &ProtocolAddress,
        _bundle: &PreKeyBundle,
    ) -> Result<(), anyhow::Error> {
        self.key_store
            .set(single_patch(
                CATEGORY_SESSION,
                address.to_string(),
                Some(SESSION_FRESH.to_vec()),
            ))
            .await?;
        Ok(())
    }
}

/// Static group directory with a fetch counter.
#[derive(Default)]
pub struct StaticGroupDirectory {
    pub groups: Mutex<HashMap<String, GroupMetadata>>,
    pub fetches: AtomicUsize,
}

impl StaticGroupDirectory {
    pub fn insert(&self, metadata: GroupMetadata) {
        self.groups
            .lock()
            .unwrap()
            .insert(metadata.id.to_string(), metadata);
    }
}

#[async_trait]
impl GroupMetadataSource for StaticGroupDirectory {
    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, anyhow::Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.groups
            .lock()
            .unwrap()
            .get(&jid.to_string())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown group {jid}"))
    }
}

pub struct TestHarness {
    pub client: Arc<Client>,
    pub backend: Arc<MemoryBackend>,
    pub key_store: Arc<KeyStore>,
    pub transport: Arc<MockTransport>,
    pub groups: Arc<StaticGroupDirectory>,
}

pub const TEST_ME_USER: &str = "10000000001";

/// A ready-to-use client over the mocks, logged in as
/// `10000000001:0@s.whatsapp.net`.
pub fn test_client() -> TestHarness {
    test_client_with(RelayConfig::default())
}

pub fn test_client_with(config: RelayConfig) -> TestHarness {
    let backend = Arc::new(MemoryBackend::new());
    let key_store = Arc::new(KeyStore::new(backend.clone()));
    let transport = Arc::new(MockTransport::new());
    let groups = Arc::new(StaticGroupDirectory::default());
    let repository = Arc::new(MockSignalRepository {
        key_store: key_store.clone(),
    });

    let collaborators = RelayCollaborators {
        group_metadata: groups.clone(),
        cached_group_metadata: None,
        patch_message: None,
    };

    let client = Arc::new(Client::new(
        transport.clone(),
        key_store.clone(),
        repository,
        collaborators,
        config,
    ));

    client.set_identity(AccountIdentity {
        jid: format!("{TEST_ME_USER}@s.whatsapp.net").parse().unwrap(),
        lid: None,
        account: Some(proto::AdvSignedDeviceIdentity {
            details: Some(vec![0xAD; 16]),
            account_signature_key: Some(vec![0x01; 32]),
            account_signature: Some(vec![0x02; 64]),
            device_signature: Some(vec![0x03; 64]),
        }),
    });

    TestHarness {
        client,
        backend,
        key_store,
        transport,
        groups,
    }
}

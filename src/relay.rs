//! The outbound relay engine.
//!
//! Fans a logical message out to every recipient device: classifies the
//! destination, resolves devices, asserts sessions, rotates and distributes
//! the group sender key where needed, and assembles the final stanza. All
//! store writes of one invocation are buffered in a single key-store
//! transaction; stanza emission happens after the writes are buffered.

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::{DEFAULT_USER_SERVER, HIDDEN_USER_SERVER, Jid};
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::client::{AccountIdentity, Client};
use crate::proto;
use crate::signal::{JidSignalExt, SenderKeyName};
use crate::store::{CATEGORY_SENDER_KEY_MEMORY, single_patch};
use crate::types::group::AddressingMode;
use crate::types::message::{
    EditAttribute, MessageUtils, has_poll_creation, media_type, stanza_type,
};
use anyhow::{Result, anyhow};
use futures_util::future;
use prost::Message as ProstMessage;
use std::collections::HashMap;
use std::sync::Mutex;

/// Caller-tunable knobs for one relay invocation.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Overrides the generated message id.
    pub message_id: Option<String>,
    /// Restricts the send to one explicit device (retry flows).
    pub participant: Option<Jid>,
    /// Extra attributes stamped on the `<message>` stanza (`category`, ...).
    pub additional_attributes: Attrs,
    /// Extra child nodes appended to the stanza.
    pub additional_nodes: Vec<Node>,
    /// Edit/revoke class of the send, encoded as the `edit` attribute.
    pub edit: EditAttribute,
    pub use_user_devices_cache: bool,
    pub use_cached_group_metadata: bool,
    /// Recipient list for status broadcasts, which have no group metadata.
    pub status_jid_list: Vec<Jid>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            message_id: None,
            participant: None,
            additional_attributes: Attrs::new(),
            additional_nodes: Vec::new(),
            edit: EditAttribute::Empty,
            use_user_devices_cache: true,
            use_cached_group_metadata: true,
            status_jid_list: Vec::new(),
        }
    }
}

struct SendContext<'a> {
    destination: &'a Jid,
    msg_id: &'a str,
    message: &'a proto::Message,
    extra_attrs: &'a Attrs,
    options: &'a RelayOptions,
    identity: &'a AccountIdentity,
}

type SenderKeyMemory = HashMap<String, bool>;

/// Devices absent from the memory map still need the current sender key.
/// They are marked present immediately so parallel blocks do not double-send.
fn take_skdm_targets(memory: &Mutex<SenderKeyMemory>, devices: &[Jid]) -> Vec<Jid> {
    let mut memory = memory.lock().expect("sender-key memory lock poisoned");
    devices
        .iter()
        .filter(|device| {
            let key = device.to_string();
            if memory.get(&key).copied().unwrap_or(false) {
                false
            } else {
                memory.insert(key, true);
                true
            }
        })
        .cloned()
        .collect()
}

impl Client {
    /// Relays `message` to `to`, producing per-device ciphertexts and one or
    /// more `<message>` stanzas. Returns the message id used on the wire.
    pub async fn relay_message(
        &self,
        to: Jid,
        message: proto::Message,
        options: RelayOptions,
    ) -> Result<String> {
        let identity = self.own_identity()?;
        let msg_id = options
            .message_id
            .clone()
            .unwrap_or_else(|| self.generate_message_id());

        let destination = to;
        let is_group = destination.is_group();
        let is_status = destination.is_status_broadcast();

        let mut options = options;
        if options.participant.is_some() && !is_group && !is_status {
            options
                .additional_attributes
                .insert("device_fanout".to_string(), "false".to_string());
        }
        if options.edit != EditAttribute::Empty {
            options
                .additional_attributes
                .insert("edit".to_string(), options.edit.to_string_val().to_string());
        }

        let mut extra_attrs = Attrs::new();
        if let Some(media) = media_type(&message) {
            extra_attrs.insert("mediatype".to_string(), media.to_string());
        }
        if message.pin_in_chat_message.is_some() {
            extra_attrs.insert("decrypt-fail".to_string(), "hide".to_string());
        }

        let ctx = SendContext {
            destination: &destination,
            msg_id: &msg_id,
            message: &message,
            extra_attrs: &extra_attrs,
            options: &options,
            identity: &identity,
        };

        self.key_store
            .transaction(|| async {
                if is_group || is_status {
                    self.relay_to_group(&ctx, is_status).await
                } else {
                    self.relay_to_user(&ctx).await
                }
            })
            .await?;

        Ok(msg_id)
    }

    async fn resolve_group_metadata(
        &self,
        jid: &Jid,
        use_cached: bool,
    ) -> Result<crate::types::group::GroupMetadata> {
        if use_cached
            && let Some(cache) = &self.collaborators.cached_group_metadata
            && let Some(metadata) = cache.cached_group_metadata(jid).await?
        {
            log::debug!("Using cached group metadata for {jid}");
            return Ok(metadata);
        }
        self.collaborators.group_metadata.group_metadata(jid).await
    }

    async fn relay_to_group(&self, ctx: &SendContext<'_>, is_status: bool) -> Result<()> {
        let (mut participant_users, addressing_mode) = if is_status {
            let users: Vec<Jid> = ctx
                .options
                .status_jid_list
                .iter()
                .map(|j| j.to_non_ad())
                .collect();
            (users, AddressingMode::Pn)
        } else {
            let metadata = self
                .resolve_group_metadata(ctx.destination, ctx.options.use_cached_group_metadata)
                .await?;
            let users: Vec<Jid> = metadata.participants.iter().map(|j| j.to_non_ad()).collect();
            (users, metadata.addressing_mode)
        };

        let own_sending_jid = match addressing_mode {
            AddressingMode::Lid => ctx
                .identity
                .lid
                .clone()
                .ok_or_else(|| anyhow!("LID not set, cannot send to LID-addressed group"))?,
            AddressingMode::Pn => ctx.identity.jid.clone(),
        };

        // The sender's own companions receive the group message too.
        if !is_status
            && !participant_users
                .iter()
                .any(|p| p.is_same_user_as(&own_sending_jid))
        {
            participant_users.push(own_sending_jid.to_non_ad());
        }

        if participant_users.is_empty() && ctx.options.participant.is_none() {
            log::debug!("No participants to relay to for {}", ctx.destination);
            return Ok(());
        }

        let memory_key = ctx.destination.to_string();
        let initial_memory: SenderKeyMemory = if is_status {
            SenderKeyMemory::new()
        } else {
            self.key_store
                .get(CATEGORY_SENDER_KEY_MEMORY, std::slice::from_ref(&memory_key))
                .await?
                .remove(&memory_key)
                .and_then(|raw| serde_json::from_slice(&raw).ok())
                .unwrap_or_default()
        };
        let memory = Mutex::new(initial_memory);

        if let Some(participant) = &ctx.options.participant {
            // Retry path: exactly one device, sender key always redistributed.
            let devices = vec![participant.clone()];
            {
                let mut mem = memory.lock().expect("sender-key memory lock poisoned");
                mem.insert(participant.to_string(), true);
            }
            self.dispatch_group_block(ctx, &own_sending_jid, &devices, &devices, &memory)
                .await?;
        } else {
            let block_size = self.config.participant_block_size;
            if participant_users.len() > block_size {
                let blocks: Vec<&[Jid]> = participant_users.chunks(block_size).collect();
                log::debug!(
                    "Splitting group send to {} into {} blocks",
                    ctx.destination,
                    blocks.len()
                );
                let dispatches = blocks.into_iter().map(|block| {
                    let memory = &memory;
                    let own_sending_jid = &own_sending_jid;
                    async move {
                        let devices = self
                            .resolve_devices(block, ctx.options.use_user_devices_cache, false)
                            .await?;
                        let skdm_targets = take_skdm_targets(memory, &devices);
                        self.dispatch_group_block(
                            ctx,
                            own_sending_jid,
                            &devices,
                            &skdm_targets,
                            memory,
                        )
                        .await
                    }
                });
                for result in future::join_all(dispatches).await {
                    result?;
                }
            } else {
                let devices = self
                    .resolve_devices(
                        &participant_users,
                        ctx.options.use_user_devices_cache,
                        false,
                    )
                    .await?;
                let skdm_targets = take_skdm_targets(&memory, &devices);
                self.dispatch_group_block(ctx, &own_sending_jid, &devices, &skdm_targets, &memory)
                    .await?;
            }
        }

        // Merge write of the final memory state, sequenced after all blocks.
        let final_memory = memory.into_inner().expect("sender-key memory lock poisoned");
        let bytes = serde_json::to_vec(&final_memory)?;
        self.key_store
            .set(single_patch(
                CATEGORY_SENDER_KEY_MEMORY,
                memory_key,
                Some(bytes),
            ))
            .await?;
        Ok(())
    }

    /// One group dispatch: group-encrypt the payload, distribute the sender
    /// key to devices that lack it, and emit the stanza.
    async fn dispatch_group_block(
        &self,
        ctx: &SendContext<'_>,
        own_sending_jid: &Jid,
        devices: &[Jid],
        skdm_targets: &[Jid],
        memory: &Mutex<SenderKeyMemory>,
    ) -> Result<()> {
        let patched = match &self.collaborators.patch_message {
            Some(patcher) => patcher.patch_message(ctx.message.clone(), devices).await?,
            None => ctx.message.clone(),
        };
        let plaintext = MessageUtils::pad_message_v2(patched.encode_to_vec());

        let sender_key_name = SenderKeyName::new(
            ctx.destination.to_string(),
            own_sending_jid.to_protocol_address(),
        );
        let group_ciphertext = self
            .signal
            .encrypt_group_message(&sender_key_name, &plaintext)
            .await?;

        let mut children: Vec<Node> = Vec::new();
        let mut include_device_identity = false;
        let mut phash = None;

        if !skdm_targets.is_empty() {
            self.assert_sessions(skdm_targets, false).await?;

            let skdm_message = proto::Message {
                sender_key_distribution_message: Some(proto::SenderKeyDistributionMessage {
                    group_id: Some(ctx.destination.to_string()),
                    axolotl_sender_key_distribution_message: Some(
                        group_ciphertext.distribution_message.clone(),
                    ),
                }),
                ..Default::default()
            };
            let (nodes, prekey_used) = self
                .build_participant_nodes(skdm_targets, &skdm_message, ctx.extra_attrs)
                .await?;
            include_device_identity |= prekey_used;
            log::debug!(
                "Distributing sender key for {} to {} devices",
                ctx.destination,
                skdm_targets.len()
            );
            children.push(NodeBuilder::new("participants").children(nodes).build());
            phash = Some(MessageUtils::participant_list_hash(devices));
        }

        let mut enc_attrs = Attrs::new();
        enc_attrs.insert("v".to_string(), "2".to_string());
        enc_attrs.insert("type".to_string(), "skmsg".to_string());
        for (k, v) in ctx.extra_attrs.iter() {
            enc_attrs.insert(k.clone(), v.clone());
        }
        children.push(
            NodeBuilder::new("enc")
                .attrs(enc_attrs)
                .bytes(group_ciphertext.ciphertext)
                .build(),
        );

        // Buffer the memory snapshot ahead of emission so the distribution
        // state is never behind a stanza already on the wire.
        let snapshot = {
            let memory = memory.lock().expect("sender-key memory lock poisoned");
            serde_json::to_vec(&*memory)?
        };
        self.key_store
            .set(single_patch(
                CATEGORY_SENDER_KEY_MEMORY,
                ctx.destination.to_string(),
                Some(snapshot),
            ))
            .await?;

        self.emit_message_stanza(ctx, children, include_device_identity, phash)
            .await
    }

    async fn relay_to_user(&self, ctx: &SendContext<'_>) -> Result<()> {
        let is_peer =
            ctx.options.additional_attributes.get("category").map(String::as_str) == Some("peer");
        let is_lid = ctx.destination.is_lid();
        let me = &ctx.identity.jid;

        let mut devices: Vec<Jid> = Vec::new();
        if let Some(participant) = &ctx.options.participant {
            devices.push(participant.clone());
        } else {
            let peer_user = ctx.destination.to_non_ad();
            devices.push(peer_user.clone());
            if peer_user.user != me.user {
                devices.push(me.to_non_ad());
            }
            if !is_peer {
                let companions = self
                    .resolve_devices(
                        &[me.to_non_ad(), peer_user],
                        ctx.options.use_user_devices_cache,
                        true,
                    )
                    .await?;
                devices.extend(companions);
            }
        }

        let mut me_jids: Vec<Jid> = Vec::new();
        let mut other_jids: Vec<Jid> = Vec::new();
        for device in &devices {
            let is_me = device.user == me.user
                || ctx
                    .identity
                    .lid
                    .as_ref()
                    .is_some_and(|lid| lid.user == device.user);
            let user = if is_me && is_lid {
                ctx.identity
                    .lid
                    .as_ref()
                    .ok_or_else(|| anyhow!("LID not set, cannot address LID destination"))?
                    .user
                    .clone()
            } else {
                device.user.clone()
            };
            let server = if is_lid {
                HIDDEN_USER_SERVER
            } else {
                DEFAULT_USER_SERVER
            };
            let jid = Jid::device(&user, server, device.device);
            if is_me {
                me_jids.push(jid);
            } else {
                other_jids.push(jid);
            }
        }

        let all_jids: Vec<Jid> = me_jids.iter().chain(other_jids.iter()).cloned().collect();
        self.assert_sessions(&all_jids, false).await?;

        // Own companions get the payload wrapped for device sync; the peer's
        // devices get the bare message.
        let me_message = proto::Message {
            device_sent_message: Some(Box::new(proto::DeviceSentMessage {
                destination_jid: Some(ctx.destination.to_string()),
                message: Some(Box::new(ctx.message.clone())),
                phash: Some(String::new()),
            })),
            ..Default::default()
        };

        let (me_result, other_result) = tokio::join!(
            self.build_participant_nodes(&me_jids, &me_message, ctx.extra_attrs),
            self.build_participant_nodes(&other_jids, ctx.message, ctx.extra_attrs),
        );
        let (me_nodes, me_prekey) = me_result?;
        let (other_nodes, other_prekey) = other_result?;
        let include_device_identity = me_prekey || other_prekey;

        let mut participant_nodes = me_nodes;
        participant_nodes.extend(other_nodes);

        let children = if is_peer {
            // Peer stanzas carry the single enc node directly.
            participant_nodes
                .into_iter()
                .next()
                .and_then(|to_node| match to_node.content {
                    Some(NodeContent::Nodes(mut inner)) => inner.pop(),
                    _ => None,
                })
                .map(|enc| vec![enc])
                .unwrap_or_default()
        } else {
            vec![
                NodeBuilder::new("participants")
                    .children(participant_nodes)
                    .build(),
            ]
        };

        self.emit_message_stanza(ctx, children, include_device_identity, None)
            .await
    }

    async fn emit_message_stanza(
        &self,
        ctx: &SendContext<'_>,
        mut children: Vec<Node>,
        include_device_identity: bool,
        phash: Option<String>,
    ) -> Result<()> {
        if include_device_identity {
            let account = ctx.identity.account.as_ref().ok_or_else(|| {
                anyhow!("prekey ciphertext produced but no signed device identity available")
            })?;
            children.push(
                NodeBuilder::new("device-identity")
                    .bytes(account.encode_to_vec())
                    .build(),
            );
        }

        for node in &ctx.options.additional_nodes {
            children.push(node.clone());
        }
        if has_poll_creation(ctx.message) {
            children.push(NodeBuilder::new("meta").attr("polltype", "creation").build());
        }

        let mut attrs = Attrs::new();
        attrs.insert("id".to_string(), ctx.msg_id.to_string());
        attrs.insert("type".to_string(), stanza_type(ctx.message).to_string());

        match &ctx.options.participant {
            Some(participant) if ctx.destination.is_group() => {
                attrs.insert("to".to_string(), ctx.destination.to_string());
                attrs.insert("participant".to_string(), participant.to_string());
            }
            Some(participant) if participant.is_same_user_as(&ctx.identity.jid) => {
                attrs.insert("to".to_string(), participant.to_string());
                attrs.insert("recipient".to_string(), ctx.destination.to_string());
            }
            Some(participant) => {
                attrs.insert("to".to_string(), participant.to_string());
            }
            None => {
                attrs.insert("to".to_string(), ctx.destination.to_string());
            }
        }

        for (k, v) in ctx.options.additional_attributes.iter() {
            attrs.insert(k.clone(), v.clone());
        }
        if let Some(phash) = phash {
            attrs.insert("phash".to_string(), phash);
        }

        let stanza = Node {
            tag: "message".to_string(),
            attrs,
            content: Some(NodeContent::Nodes(children)),
        };

        log::debug!("Relaying message {} to {}", ctx.msg_id, ctx.destination);
        self.transport.send_node(stanza).await?;
        Ok(())
    }
}

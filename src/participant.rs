//! Per-device encryption and `<to>` node assembly.

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::Jid;
use crate::binary::node::{Attrs, Node};
use crate::client::Client;
use crate::proto;
use crate::signal::JidSignalExt;
use crate::types::message::MessageUtils;
use anyhow::{Result, anyhow};
use futures_util::future;
use prost::Message as ProstMessage;

impl Client {
    /// Encrypts `message` once per recipient device and wraps each
    /// ciphertext in its stanza envelope:
    ///
    /// ```text
    /// <to jid="...">
    ///   <enc v="2" type="msg|pkmsg" [extra_attrs]>ciphertext</enc>
    /// </to>
    /// ```
    ///
    /// The second return value reports whether any recipient received a
    /// prekey message, in which case the caller must attach the signed
    /// device identity to the enclosing stanza.
    pub(crate) async fn build_participant_nodes(
        &self,
        jids: &[Jid],
        message: &proto::Message,
        extra_attrs: &Attrs,
    ) -> Result<(Vec<Node>, bool)> {
        if jids.is_empty() {
            return Ok((Vec::new(), false));
        }

        let patched = match &self.collaborators.patch_message {
            Some(patcher) => patcher.patch_message(message.clone(), jids).await?,
            None => message.clone(),
        };
        let plaintext = MessageUtils::pad_message_v2(patched.encode_to_vec());

        let tasks = jids.iter().map(|device_jid| {
            let plaintext = &plaintext;
            let extra_attrs = extra_attrs.clone();
            async move {
                let signal_address = device_jid.to_protocol_address();
                let encrypted = self
                    .signal
                    .encrypt_message(&signal_address, plaintext)
                    .await
                    .map_err(|e| anyhow!("encryption for {signal_address} failed: {e}"))?;

                let mut enc_attrs = Attrs::new();
                enc_attrs.insert("v".to_string(), "2".to_string());
                enc_attrs.insert("type".to_string(), encrypted.message_type.as_str().to_string());
                for (k, v) in extra_attrs.iter() {
                    enc_attrs.insert(k.clone(), v.clone());
                }

                let enc_node = NodeBuilder::new("enc")
                    .attrs(enc_attrs)
                    .bytes(encrypted.ciphertext)
                    .build();
                let participant_node = NodeBuilder::new("to")
                    .attr("jid", device_jid.to_string())
                    .children([enc_node])
                    .build();

                Ok::<(Node, bool), anyhow::Error>((
                    participant_node,
                    encrypted.message_type.is_prekey(),
                ))
            }
        });

        let results = future::join_all(tasks).await;
        let mut participant_nodes = Vec::with_capacity(results.len());
        let mut includes_prekey_message = false;
        for result in results {
            let (node, uses_prekey) = result?;
            participant_nodes.push(node);
            if uses_prekey {
                includes_prekey_message = true;
            }
        }

        Ok((participant_nodes, includes_prekey_message))
    }
}

//! Prekey bundle retrieval: `iq get encrypt <key><user jid=.../></key>`.

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::{Jid, SERVER_JID};
use crate::binary::node::{Node, NodeContent};
use crate::client::Client;
use crate::error::RelayError;
use crate::signal::PreKeyBundle;
use crate::transport::{InfoQuery, InfoQueryType};
use anyhow::Result;
use std::collections::HashMap;

pub fn build_fetch_prekeys_request(jids: &[Jid], reason: Option<&str>) -> Node {
    let user_nodes = jids.iter().map(|jid| {
        let mut user_builder = NodeBuilder::new("user").attr("jid", jid.to_string());
        if let Some(r) = reason {
            user_builder = user_builder.attr("reason", r);
        }
        user_builder.build()
    });

    NodeBuilder::new("key").children(user_nodes).build()
}

pub fn parse_prekeys_response(resp_node: &Node) -> Result<HashMap<Jid, PreKeyBundle>> {
    let list_node = resp_node.get_optional_child("list").ok_or_else(|| {
        RelayError::ProtocolViolation("<list> not found in pre-key response".into())
    })?;

    let mut bundles = HashMap::new();
    for user_node in list_node.children().unwrap_or_default() {
        if user_node.tag != "user" {
            continue;
        }
        let mut attrs = user_node.attrs();
        let jid = attrs.jid("jid");
        match node_to_pre_key_bundle(&jid, user_node) {
            Ok(bundle) => {
                bundles.insert(jid, bundle);
            }
            Err(e) => {
                log::warn!("Skipping unusable pre-key bundle for {jid}: {e}");
            }
        }
    }

    Ok(bundles)
}

fn extract_bytes(node: Option<&Node>) -> Result<Vec<u8>> {
    match node.and_then(|n| n.content.as_ref()) {
        Some(NodeContent::Bytes(b)) => Ok(b.clone()),
        _ => Err(anyhow::anyhow!("Expected bytes in node content")),
    }
}

fn node_to_pre_key_bundle(jid: &Jid, node: &Node) -> Result<PreKeyBundle> {
    if let Some(error_node) = node.get_optional_child("error") {
        return Err(anyhow::anyhow!("Error getting prekeys: {error_node}"));
    }

    let reg_id_bytes = extract_bytes(node.get_optional_child("registration"))?;
    if reg_id_bytes.len() != 4 {
        return Err(anyhow::anyhow!("Invalid registration ID length"));
    }
    let registration_id = u32::from_be_bytes(reg_id_bytes.try_into().unwrap());

    let keys_node = node.get_optional_child("keys").unwrap_or(node);

    let identity_key = extract_bytes(keys_node.get_optional_child("identity"))?;
    if identity_key.len() != 32 {
        return Err(anyhow::anyhow!(
            "Invalid identity key length: got {}, expected 32",
            identity_key.len()
        ));
    }

    let mut pre_key = None;
    if let Some(pre_key_node) = keys_node.get_optional_child("key") {
        let (id, key_bytes) = node_to_key_parts(pre_key_node)?;
        pre_key = Some((id, key_bytes));
    }

    let signed_pre_key_node = keys_node
        .get_optional_child("skey")
        .ok_or_else(|| anyhow::anyhow!("Missing signed prekey"))?;
    let (signed_pre_key_id, signed_pre_key_public) = node_to_key_parts(signed_pre_key_node)?;
    let signed_pre_key_signature =
        extract_bytes(signed_pre_key_node.get_optional_child("signature"))?;

    Ok(PreKeyBundle {
        registration_id,
        device_id: jid.device as u32,
        identity_key,
        pre_key,
        signed_pre_key_id,
        signed_pre_key_public,
        signed_pre_key_signature,
    })
}

/// Key ids arrive as 3-byte big-endian integers inside an `<id>` child;
/// the public key sits in a `<value>` child.
fn node_to_key_parts(node: &Node) -> Result<(u32, Vec<u8>)> {
    let id_bytes = match node.get_optional_child("id").and_then(|n| n.bytes_content()) {
        Some(b) if b.len() == 3 => b,
        Some(_) => return Err(anyhow::anyhow!("Invalid key id length")),
        None => return Err(anyhow::anyhow!("Missing key id")),
    };
    let id = u32::from_be_bytes([0, id_bytes[0], id_bytes[1], id_bytes[2]]);

    let value = extract_bytes(node.get_optional_child("value"))?;
    if value.len() != 32 {
        return Err(anyhow::anyhow!("Invalid public key length"));
    }
    Ok((id, value))
}

impl Client {
    /// Fetches pre-key bundles for a list of device JIDs in one query.
    pub async fn fetch_pre_keys(
        &self,
        jids: &[Jid],
        reason: Option<&str>,
    ) -> Result<HashMap<Jid, PreKeyBundle>> {
        let content = build_fetch_prekeys_request(jids, reason);

        let resp_node = self
            .send_iq(InfoQuery {
                namespace: "encrypt",
                query_type: InfoQueryType::Get,
                to: SERVER_JID.parse().unwrap(),
                content: Some(NodeContent::Nodes(vec![content])),
                id: None,
                timeout: None,
            })
            .await?;

        parse_prekeys_response(&resp_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_node(tag: &str, id: u32, value: Vec<u8>, signature: Option<Vec<u8>>) -> Node {
        let id_be = id.to_be_bytes();
        let mut children = vec![
            NodeBuilder::new("id").bytes(id_be[1..4].to_vec()).build(),
            NodeBuilder::new("value").bytes(value).build(),
        ];
        if let Some(sig) = signature {
            children.push(NodeBuilder::new("signature").bytes(sig).build());
        }
        NodeBuilder::new(tag).children(children).build()
    }

    fn bundle_response(jid: &str) -> Node {
        let user = NodeBuilder::new("user")
            .attr("jid", jid)
            .children([
                NodeBuilder::new("registration")
                    .bytes(55u32.to_be_bytes().to_vec())
                    .build(),
                NodeBuilder::new("identity").bytes(vec![1u8; 32]).build(),
                key_node("key", 42, vec![2u8; 32], None),
                key_node("skey", 7, vec![3u8; 32], Some(vec![4u8; 64])),
            ])
            .build();
        let list = NodeBuilder::new("list").children([user]).build();
        NodeBuilder::new("iq").children([list]).build()
    }

    #[test]
    fn parses_full_bundle() {
        let resp = bundle_response("999:2@s.whatsapp.net");
        let bundles = parse_prekeys_response(&resp).unwrap();
        let jid: Jid = "999:2@s.whatsapp.net".parse().unwrap();
        let bundle = &bundles[&jid];
        assert_eq!(bundle.registration_id, 55);
        assert_eq!(bundle.device_id, 2);
        assert_eq!(bundle.pre_key.as_ref().unwrap().0, 42);
        assert_eq!(bundle.signed_pre_key_id, 7);
    }

    #[test]
    fn user_with_error_child_is_skipped() {
        let bad_user = NodeBuilder::new("user")
            .attr("jid", "888@s.whatsapp.net")
            .children([NodeBuilder::new("error").attr("code", "404").build()])
            .build();
        let list = NodeBuilder::new("list").children([bad_user]).build();
        let resp = NodeBuilder::new("iq").children([list]).build();
        let bundles = parse_prekeys_response(&resp).unwrap();
        assert!(bundles.is_empty());
    }

    #[test]
    fn missing_list_is_protocol_violation() {
        let resp = NodeBuilder::new("iq").build();
        assert!(parse_prekeys_response(&resp).is_err());
    }
}

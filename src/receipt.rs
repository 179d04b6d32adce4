//! Receipt stanza construction and batching.

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::{Jid, SERVER_JID};
use crate::binary::node::{Node, NodeContent};
use crate::client::Client;
use crate::error::RelayError;
use crate::proto;
use crate::transport::{InfoQuery, InfoQueryType};
use anyhow::Result;
use futures_util::future;
use indexmap::IndexMap;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptType {
    /// Plain delivery acknowledgement; carries no `type` attribute.
    Delivery,
    Read,
    ReadSelf,
    /// Companion-device acknowledgement of a prekey message.
    Sender,
    Played,
}

impl ReceiptType {
    fn as_attr(&self) -> Option<&'static str> {
        match self {
            ReceiptType::Delivery => None,
            ReceiptType::Read => Some("read"),
            ReceiptType::ReadSelf => Some("read-self"),
            ReceiptType::Sender => Some("sender"),
            ReceiptType::Played => Some("played"),
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, ReceiptType::Read | ReceiptType::ReadSelf)
    }
}

/// Groups message keys by `(chat, participant)`, skipping self-originated
/// keys. Receipts are only owed for messages someone else sent.
pub fn aggregate_message_keys_not_from_me(
    keys: &[proto::MessageKey],
) -> Vec<(String, Option<String>, Vec<String>)> {
    let mut grouped: IndexMap<(String, Option<String>), Vec<String>> = IndexMap::new();
    for key in keys {
        if key.from_me.unwrap_or(false) {
            continue;
        }
        let (Some(jid), Some(id)) = (&key.remote_jid, &key.id) else {
            continue;
        };
        grouped
            .entry((jid.clone(), key.participant.clone()))
            .or_default()
            .push(id.clone());
    }
    grouped
        .into_iter()
        .map(|((jid, participant), ids)| (jid, participant, ids))
        .collect()
}

impl Client {
    /// Emits one `<receipt>` stanza for a batch of message ids sharing the
    /// same addressing. Empty id lists are ignored silently.
    pub async fn send_receipt(
        &self,
        jid: Jid,
        participant: Option<Jid>,
        ids: &[String],
        receipt_type: ReceiptType,
    ) -> Result<()> {
        let Some(first_id) = ids.first() else {
            return Ok(());
        };

        let mut builder = NodeBuilder::new("receipt").attr("id", first_id.clone());

        if receipt_type.is_read() {
            builder = builder.attr("t", chrono::Utc::now().timestamp().to_string());
        }

        if receipt_type == ReceiptType::Sender && jid.is_user() {
            let participant = participant.ok_or_else(|| {
                RelayError::ProtocolViolation("sender receipt requires a participant".into())
            })?;
            builder = builder
                .attr("recipient", jid.to_string())
                .attr("to", participant.to_string());
        } else {
            builder = builder.attr("to", jid.to_string());
            if let Some(participant) = participant {
                builder = builder.attr("participant", participant.to_string());
            }
        }

        if let Some(type_attr) = receipt_type.as_attr() {
            builder = builder.attr("type", type_attr);
        }

        let remaining = &ids[1..];
        if !remaining.is_empty() {
            let items: Vec<Node> = remaining
                .iter()
                .map(|id| NodeBuilder::new("item").attr("id", id.clone()).build())
                .collect();
            builder = builder.children([NodeBuilder::new("list").children(items).build()]);
        }

        self.transport.send_node(builder.build()).await?;
        Ok(())
    }

    /// Sends receipts for a set of message keys, one stanza per
    /// `(chat, participant)` group, dispatched in parallel.
    pub async fn send_receipts(&self, keys: &[proto::MessageKey], receipt_type: ReceiptType) -> Result<()> {
        let groups = aggregate_message_keys_not_from_me(keys);

        let sends = groups.into_iter().map(|(jid, participant, ids)| async move {
            let jid: Jid = jid
                .parse()
                .map_err(|e| anyhow::anyhow!("bad receipt jid: {e}"))?;
            let participant = match participant {
                Some(p) => Some(
                    p.parse::<Jid>()
                        .map_err(|e| anyhow::anyhow!("bad receipt participant: {e}"))?,
                ),
                None => None,
            };
            self.send_receipt(jid, participant, &ids, receipt_type).await
        });

        for result in future::join_all(sends).await {
            result?;
        }
        Ok(())
    }

    /// Marks messages read, honoring the account's read-receipts privacy
    /// setting: `read` when receipts are shared with everyone, `read-self`
    /// otherwise.
    pub async fn read_messages(&self, keys: &[proto::MessageKey]) -> Result<()> {
        let settings = self.fetch_privacy_settings().await?;
        let receipt_type = if settings.get("readreceipts").map(|s| s.as_str()) == Some("all") {
            ReceiptType::Read
        } else {
            ReceiptType::ReadSelf
        };
        self.send_receipts(keys, receipt_type).await
    }

    /// Privacy settings, fetched once and cached for the process lifetime.
    pub async fn fetch_privacy_settings(&self) -> Result<HashMap<String, String>> {
        {
            let cached = self.privacy_settings.read().await;
            if let Some(settings) = &*cached {
                return Ok(settings.clone());
            }
        }

        let resp = self
            .send_iq(InfoQuery {
                namespace: "privacy",
                query_type: InfoQueryType::Get,
                to: SERVER_JID.parse().unwrap(),
                content: Some(NodeContent::Nodes(vec![
                    NodeBuilder::new("privacy").build(),
                ])),
                id: None,
                timeout: None,
            })
            .await?;

        let privacy_node = resp.get_optional_child("privacy").ok_or_else(|| {
            RelayError::ProtocolViolation("<privacy> child missing from response".into())
        })?;

        let mut settings = HashMap::new();
        for category in privacy_node.get_children_by_tag("category") {
            let mut attrs = category.attrs();
            if let (Some(name), Some(value)) =
                (attrs.optional_string("name"), attrs.optional_string("value"))
            {
                settings.insert(name.to_string(), value.to_string());
            }
        }

        *self.privacy_settings.write().await = Some(settings.clone());
        Ok(settings)
    }

    /// Registers trusted-contact privacy tokens for the given users.
    pub async fn get_privacy_tokens(&self, jids: &[Jid]) -> Result<Node> {
        let t = chrono::Utc::now().timestamp().to_string();
        let token_nodes: Vec<Node> = jids
            .iter()
            .map(|jid| {
                NodeBuilder::new("token")
                    .attr("jid", jid.to_non_ad().to_string())
                    .attr("t", t.clone())
                    .attr("type", "trusted_contact")
                    .build()
            })
            .collect();

        let resp = self
            .send_iq(InfoQuery {
                namespace: "privacy",
                query_type: InfoQueryType::Set,
                to: SERVER_JID.parse().unwrap(),
                content: Some(NodeContent::Nodes(vec![
                    NodeBuilder::new("tokens").children(token_nodes).build(),
                ])),
                id: None,
                timeout: None,
            })
            .await?;
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(jid: &str, id: &str, participant: Option<&str>, from_me: bool) -> proto::MessageKey {
        proto::MessageKey {
            remote_jid: Some(jid.to_string()),
            from_me: Some(from_me),
            id: Some(id.to_string()),
            participant: participant.map(|p| p.to_string()),
        }
    }

    #[test]
    fn aggregation_skips_own_keys_and_groups_by_addressing() {
        let keys = vec![
            key("g@g.us", "A", Some("1@s.whatsapp.net"), false),
            key("g@g.us", "B", Some("1@s.whatsapp.net"), false),
            key("g@g.us", "C", Some("2@s.whatsapp.net"), false),
            key("g@g.us", "D", Some("1@s.whatsapp.net"), true),
        ];

        let groups = aggregate_message_keys_not_from_me(&keys);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].2, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(groups[1].2, vec!["C".to_string()]);
    }

    #[test]
    fn aggregation_of_empty_input_is_empty() {
        assert!(aggregate_message_keys_not_from_me(&[]).is_empty());
    }
}

//! Device discovery (USync).
//!
//! Resolves user identifiers to their set of `(user, device)` pairs with one
//! batched network query per cache-miss set. Cache writes happen in a single
//! batch per fetch, never partially.

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::{Jid, SERVER_JID};
use crate::binary::node::{Node, NodeContent};
use crate::client::Client;
use crate::error::RelayError;
use crate::transport::{InfoQuery, InfoQueryType};
use anyhow::Result;
use log::debug;
use std::collections::{HashMap, HashSet};

pub fn build_get_user_devices_query(jids: &[Jid], sid: &str) -> Node {
    let user_nodes = jids
        .iter()
        .map(|jid| {
            NodeBuilder::new("user")
                .attr("jid", jid.to_non_ad().to_string())
                .build()
        })
        .collect::<Vec<_>>();

    let query_node = NodeBuilder::new("query")
        .children([NodeBuilder::new("devices").attr("version", "2").build()])
        .build();

    let list_node = NodeBuilder::new("list").children(user_nodes).build();

    NodeBuilder::new("usync")
        .attrs([
            ("context", "message"),
            ("index", "0"),
            ("last", "true"),
            ("mode", "query"),
            ("sid", sid),
        ])
        .children([query_node, list_node])
        .build()
}

/// Parse a usync response into a flat device list grouped under each user.
pub fn parse_get_user_devices_response(resp_node: &Node) -> Result<HashMap<Jid, Vec<Jid>>> {
    let list_node = resp_node
        .get_optional_child_by_tag(&["usync", "list"])
        .ok_or_else(|| {
            RelayError::ProtocolViolation("<usync> or <list> not found in usync response".into())
        })?;

    let mut result = HashMap::new();

    for user_node in list_node.get_children_by_tag("user") {
        let user_jid = user_node.attrs().jid("jid").to_non_ad();
        let device_list_node = user_node
            .get_optional_child_by_tag(&["devices", "device-list"])
            .ok_or_else(|| {
                RelayError::ProtocolViolation(format!(
                    "<device-list> not found for user {user_jid}"
                ))
            })?;

        let mut devices = Vec::new();
        for device_node in device_list_node.get_children_by_tag("device") {
            let device_id = match device_node.attrs().optional_u16("id") {
                Some(id) => id,
                None => {
                    log::warn!(target: "usync", "device node missing or invalid 'id' attribute, skipping");
                    continue;
                }
            };

            let mut device_jid = user_jid.clone();
            device_jid.device = device_id;
            devices.push(device_jid);
        }

        result.insert(user_jid, devices);
    }

    Ok(result)
}

impl Client {
    /// Resolves the device sets for a list of users.
    ///
    /// With `use_cache`, fresh cache entries are used directly and only the
    /// misses go out in one batched query. `drop_zero_devices` suppresses
    /// primary devices from the result (callers that already placed the
    /// primaries in their recipient list). The exact local device is always
    /// suppressed; a message never addresses the endpoint that sends it.
    pub async fn resolve_devices(
        &self,
        user_jids: &[Jid],
        use_cache: bool,
        drop_zero_devices: bool,
    ) -> Result<Vec<Jid>> {
        if user_jids.is_empty() {
            return Ok(Vec::new());
        }
        let own_jid = self.own_identity()?.jid;

        let mut seen = HashSet::new();
        let mut jids_to_fetch: Vec<Jid> = Vec::new();
        let mut all_devices = Vec::new();

        for jid in user_jids.iter().map(|j| j.to_non_ad()) {
            if !seen.insert(jid.clone()) {
                continue;
            }
            if use_cache && let Some(cached_devices) = self.device_cache.get(&jid).await {
                debug!("resolve_devices: cache hit for {jid}");
                all_devices.extend(cached_devices);
                continue;
            }
            jids_to_fetch.push(jid);
        }

        if !jids_to_fetch.is_empty() {
            debug!(
                "resolve_devices: fetching from network for {} unique users",
                jids_to_fetch.len()
            );

            let sid = self.generate_request_id();
            let usync_node = build_get_user_devices_query(&jids_to_fetch, sid.as_str());

            let resp_node = self
                .send_iq(InfoQuery {
                    namespace: "usync",
                    query_type: InfoQueryType::Get,
                    to: SERVER_JID.parse().unwrap(),
                    content: Some(NodeContent::Nodes(vec![usync_node])),
                    id: None,
                    timeout: None,
                })
                .await?;
            let devices_by_user = parse_get_user_devices_response(&resp_node)?;

            // One batch of cache writes per fetch.
            for (user_jid, devices) in &devices_by_user {
                self.device_cache
                    .insert(user_jid.clone(), devices.clone())
                    .await;
            }
            all_devices.extend(devices_by_user.into_values().flatten());
        }

        Ok(all_devices
            .into_iter()
            .filter(|d| !(drop_zero_devices && d.device == 0))
            .filter(|d| !(d.user == own_jid.user && d.device == own_jid.device))
            .collect())
    }

    pub async fn invalidate_device_cache(&self, user: &Jid) {
        self.device_cache.invalidate(&user.to_non_ad()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::builder::NodeBuilder;

    /// Helper to build a usync response node for testing. The structure
    /// matches actual server responses:
    /// <iq>
    ///   <usync>
    ///     <list>
    ///       <user jid="...">
    ///         <devices><device-list><device id="0"/></device-list></devices>
    ///       </user>
    ///     </list>
    ///   </usync>
    /// </iq>
    fn build_usync_response(users: Vec<(&str, Vec<u16>)>) -> Node {
        let user_nodes: Vec<Node> = users
            .into_iter()
            .map(|(jid, device_ids)| {
                let device_nodes: Vec<Node> = device_ids
                    .into_iter()
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
                    .attr("jid", jid)
                    .children([devices_node])
                    .build()
            })
            .collect();

        let list_node = NodeBuilder::new("list").children(user_nodes).build();
        let usync_node = NodeBuilder::new("usync").children([list_node]).build();
        NodeBuilder::new("iq").children([usync_node]).build()
    }

    #[test]
    fn query_carries_message_context_and_device_protocol() {
        let jids = vec!["111@s.whatsapp.net".parse().unwrap()];
        let node = build_get_user_devices_query(&jids, "sid-1");
        assert_eq!(node.tag, "usync");
        assert_eq!(node.attrs.get("context").unwrap(), "message");
        assert_eq!(node.attrs.get("mode").unwrap(), "query");

        let query = node.get_optional_child("query").unwrap();
        assert!(query.get_optional_child("devices").is_some());
        let list = node.get_optional_child("list").unwrap();
        assert_eq!(list.get_children_by_tag("user").len(), 1);
    }

    #[test]
    fn parse_groups_devices_per_user() {
        let response = build_usync_response(vec![
            ("1111111111@s.whatsapp.net", vec![0, 1]),
            ("2222222222@s.whatsapp.net", vec![0]),
        ]);

        let result = parse_get_user_devices_response(&response).unwrap();
        assert_eq!(result.len(), 2);

        let user: Jid = "1111111111@s.whatsapp.net".parse().unwrap();
        let devices = &result[&user];
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].device, 1);
    }

    #[test]
    fn parse_skips_invalid_device_ids() {
        let bad_device = NodeBuilder::new("device").attr("id", "not-a-number").build();
        let good_device = NodeBuilder::new("device").attr("id", "2").build();
        let device_list = NodeBuilder::new("device-list")
            .children([bad_device, good_device])
            .build();
        let devices = NodeBuilder::new("devices").children([device_list]).build();
        let user = NodeBuilder::new("user")
            .attr("jid", "333@s.whatsapp.net")
            .children([devices])
            .build();
        let list = NodeBuilder::new("list").children([user]).build();
        let usync = NodeBuilder::new("usync").children([list]).build();
        let resp = NodeBuilder::new("iq").children([usync]).build();

        let result = parse_get_user_devices_response(&resp).unwrap();
        let devices = result.values().next().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device, 2);
    }

    #[test]
    fn parse_normalizes_user_jid_to_non_ad() {
        let response = build_usync_response(vec![("444:7@s.whatsapp.net", vec![0, 1])]);
        let result = parse_get_user_devices_response(&response).unwrap();
        let user = result.keys().next().unwrap();
        assert_eq!(user.device, 0);
        assert_eq!(user.user, "444");
    }

    #[test]
    fn missing_list_is_a_protocol_violation() {
        let resp = NodeBuilder::new("iq").build();
        let err = parse_get_user_devices_response(&resp).unwrap_err();
        assert!(err.downcast_ref::<RelayError>().is_some());
    }
}

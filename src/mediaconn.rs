//! Media-upload connection lease.
//!
//! The lease names upload hosts and carries short-lived auth. Refresh is
//! single-flight: concurrent callers share one in-flight fetch and observe
//! the same returned value.

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::SERVER_JID;
use crate::binary::node::{Node, NodeContent};
use crate::client::Client;
use crate::transport::{InfoQuery, InfoQueryType};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Refreshes are gated on this heuristic rather than the server TTL.
const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct MediaConnHost {
    pub hostname: String,
    pub max_content_length_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MediaConn {
    /// Authentication token for media operations.
    pub auth: String,
    /// Time-to-live in seconds, as reported by the server.
    pub ttl: u64,
    /// Available media hosts.
    pub hosts: Vec<MediaConnHost>,
    /// When this connection info was fetched.
    pub fetched_at: Instant,
}

impl MediaConn {
    /// Whether the server-reported TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > Duration::from_secs(self.ttl)
    }
}

/// Cloneable so the shared in-flight future can fan the failure out to every
/// coalesced caller.
#[derive(Debug, Clone, Error)]
pub enum MediaConnError {
    #[error("media_conn query failed: {0}")]
    Query(String),
    #[error("malformed media_conn response: {0}")]
    Malformed(String),
}

type SharedFetch = Shared<BoxFuture<'static, Result<MediaConn, MediaConnError>>>;

#[derive(Default)]
pub struct MediaConnState {
    current: Option<MediaConn>,
    inflight: Option<SharedFetch>,
    last_fetch: Option<Instant>,
}

impl Client {
    /// Returns the current lease, refreshing when forced, absent, or older
    /// than the refresh interval. Callers arriving while a fetch is in
    /// flight are handed the same future.
    pub async fn refresh_media_conn(
        self: &Arc<Self>,
        force: bool,
    ) -> Result<MediaConn, MediaConnError> {
        let fetch = {
            let mut state = self.media_conn.lock().await;
            if let Some(inflight) = &state.inflight {
                inflight.clone()
            } else {
                let stale = state
                    .last_fetch
                    .is_none_or(|at| at.elapsed() > REFRESH_INTERVAL);
                if !force
                    && !stale
                    && let Some(current) = &state.current
                {
                    return Ok(current.clone());
                }

                let client = Arc::clone(self);
                let fetch: SharedFetch =
                    async move { client.fetch_media_conn().await }.boxed().shared();
                state.inflight = Some(fetch.clone());
                fetch
            }
        };

        let result = fetch.await;

        let mut state = self.media_conn.lock().await;
        state.inflight = None;
        if let Ok(conn) = &result {
            state.current = Some(conn.clone());
            state.last_fetch = Some(Instant::now());
        }
        result
    }

    async fn fetch_media_conn(self: Arc<Self>) -> Result<MediaConn, MediaConnError> {
        let resp = self
            .send_iq(InfoQuery {
                namespace: "w:m",
                query_type: InfoQueryType::Set,
                to: SERVER_JID.parse().unwrap(),
                content: Some(NodeContent::Nodes(vec![
                    NodeBuilder::new("media_conn").build(),
                ])),
                id: None,
                timeout: None,
            })
            .await
            .map_err(|e| MediaConnError::Query(e.to_string()))?;

        parse_media_conn_response(&resp)
    }
}

fn parse_media_conn_response(resp: &Node) -> Result<MediaConn, MediaConnError> {
    let conn_node = resp
        .get_optional_child("media_conn")
        .ok_or_else(|| MediaConnError::Malformed("<media_conn> child missing".into()))?;

    let mut attrs = conn_node.attrs();
    let auth = attrs.string("auth");
    let ttl = attrs.optional_u64("ttl").unwrap_or(0);

    let hosts = conn_node
        .get_children_by_tag("host")
        .into_iter()
        .filter_map(|host| {
            let mut host_attrs = host.attrs();
            let hostname = host_attrs.optional_string("hostname")?.to_string();
            let max_content_length_bytes = host_attrs.optional_u64("maxContentLengthBytes");
            Some(MediaConnHost {
                hostname,
                max_content_length_bytes,
            })
        })
        .collect::<Vec<_>>();

    if hosts.is_empty() {
        return Err(MediaConnError::Malformed(
            "media_conn response carried no hosts".into(),
        ));
    }

    Ok(MediaConn {
        auth,
        ttl,
        hosts,
        fetched_at: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hosts_and_auth() {
        let resp = NodeBuilder::new("iq")
            .children([NodeBuilder::new("media_conn")
                .attr("auth", "token-1")
                .attr("ttl", "3600")
                .children([
                    NodeBuilder::new("host")
                        .attr("hostname", "media-a.example.net")
                        .attr("maxContentLengthBytes", "100000000")
                        .build(),
                    NodeBuilder::new("host")
                        .attr("hostname", "media-b.example.net")
                        .build(),
                ])
                .build()])
            .build();

        let conn = parse_media_conn_response(&resp).unwrap();
        assert_eq!(conn.auth, "token-1");
        assert_eq!(conn.ttl, 3600);
        assert_eq!(conn.hosts.len(), 2);
        assert_eq!(conn.hosts[0].max_content_length_bytes, Some(100000000));
        assert!(!conn.is_expired());
    }

    #[test]
    fn missing_media_conn_child_is_malformed() {
        let resp = NodeBuilder::new("iq").build();
        assert!(matches!(
            parse_media_conn_response(&resp),
            Err(MediaConnError::Malformed(_))
        ));
    }
}

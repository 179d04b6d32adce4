use crate::binary::node::{Attrs, Node, NodeContent};
use crate::binary::jid::Jid;
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// The wire boundary. Implementations own framing, socket lifecycle and
/// response correlation; the relay core only hands over finished stanzas.
#[async_trait]
pub trait StanzaTransport: Send + Sync {
    /// Fire-and-forget stanza emission.
    async fn send_node(&self, node: Node) -> Result<(), TransportError>;

    /// Emit a stanza carrying a request id and await the matching response.
    async fn request(&self, node: Node) -> Result<Node, TransportError>;
}

/// Represents the type of an IQ stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQueryType {
    Set,
    Get,
}

impl InfoQueryType {
    fn as_str(&self) -> &'static str {
        match self {
            InfoQueryType::Set => "set",
            InfoQueryType::Get => "get",
        }
    }
}

/// Defines an IQ request to be sent to the server.
#[derive(Debug, Clone)]
pub struct InfoQuery<'a> {
    pub namespace: &'a str,
    pub query_type: InfoQueryType,
    pub to: Jid,
    pub id: Option<String>,
    pub content: Option<NodeContent>,
    pub timeout: Option<Duration>,
}

/// Custom error types for IQ operations.
#[derive(Debug, Error)]
pub enum IqError {
    #[error("IQ request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("received a server error response: code={code}, text='{text}'")]
    ServerError { code: u16, text: String },
    #[error("malformed IQ response: {0}")]
    Malformed(String),
}

impl crate::client::Client {
    /// Generates a new unique request ID string.
    pub fn generate_request_id(&self) -> String {
        let count = self
            .id_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{}-{}", self.unique_id, count)
    }

    /// Sends an IQ (Info/Query) stanza and asynchronously waits for a response.
    pub async fn send_iq(&self, query: InfoQuery<'_>) -> Result<Node, IqError> {
        let req_id = query
            .id
            .clone()
            .unwrap_or_else(|| self.generate_request_id());

        let mut attrs = Attrs::new();
        attrs.insert("id".into(), req_id);
        attrs.insert("xmlns".into(), query.namespace.into());
        attrs.insert("type".into(), query.query_type.as_str().into());
        attrs.insert("to".into(), query.to.to_string());

        let node = Node {
            tag: "iq".to_string(),
            attrs,
            content: query.content,
        };

        let resp = match query.timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.request(node))
                .await
                .map_err(|_| IqError::Timeout)??,
            None => self.transport.request(node).await?,
        };

        if resp.attrs.get("type").map(|s| s.as_str()) == Some("error") {
            let (code, text) = resp
                .get_optional_child("error")
                .map(|err| {
                    let mut parser = err.attrs();
                    let code = parser.optional_u64("code").unwrap_or(500) as u16;
                    let text = parser.optional_string("text").unwrap_or("").to_string();
                    (code, text)
                })
                .unwrap_or((500, String::new()));
            return Err(IqError::ServerError { code, text });
        }

        Ok(resp)
    }
}

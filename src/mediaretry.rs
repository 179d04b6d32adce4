//! Media retry re-encryption flow.
//!
//! When a media download URL has lapsed, the sender asks the originating
//! device to re-upload: a receipt stanza carries an AES-GCM blob keyed off
//! the original `mediaKey`, the device answers with an encrypted
//! notification, and the stored message is patched with the fresh direct
//! path.

use crate::binary::builder::NodeBuilder;
use crate::binary::jid::Jid;
use crate::binary::node::Node;
use crate::client::Client;
use crate::crypto::{gcm, hkdf};
use crate::error::RelayError;
use crate::proto;
use crate::proto::media_retry_notification::ResultType;
use crate::types::events::{EncryptedMediaPayload, MediaRetryUpdate, MessageUpdate};
use crate::types::message::media_content_mut;
use anyhow::Result;
use prost::Message as ProstMessage;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const MEDIA_RETRY_KEY_INFO: &[u8] = b"WhatsApp Media Retry Notification";
const MEDIA_UPDATE_TIMEOUT: Duration = Duration::from_secs(60);

fn media_retry_key(media_key: &[u8]) -> Result<Vec<u8>> {
    hkdf::sha256(media_key, None, MEDIA_RETRY_KEY_INFO, 32)
        .map_err(|e| RelayError::Crypto(e.to_string()).into())
}

/// Builds the signed retry request stanza for an existing message key.
pub fn encrypt_media_retry_request(
    key: &proto::MessageKey,
    media_key: &[u8],
    me: &Jid,
) -> Result<Node> {
    let msg_id = key
        .id
        .as_deref()
        .ok_or_else(|| RelayError::ProtocolViolation("message key has no id".into()))?;

    let receipt = proto::ServerErrorReceipt {
        stanza_id: Some(msg_id.to_string()),
    };

    let mut iv = vec![0u8; 12];
    rand::rng().fill_bytes(&mut iv);
    let retry_key = media_retry_key(media_key)?;
    let ciphertext = gcm::encrypt(
        &retry_key,
        &iv,
        &receipt.encode_to_vec(),
        msg_id.as_bytes(),
    )
    .map_err(|e| RelayError::Crypto(e.to_string()))?;

    let encrypt_node = NodeBuilder::new("encrypt")
        .children([
            NodeBuilder::new("enc_p").bytes(ciphertext).build(),
            NodeBuilder::new("enc_iv").bytes(iv).build(),
        ])
        .build();

    let mut rmr_builder = NodeBuilder::new("rmr")
        .attr("jid", key.remote_jid.clone().unwrap_or_default())
        .attr("from_me", key.from_me.unwrap_or(false).to_string());
    if let Some(participant) = &key.participant {
        rmr_builder = rmr_builder.attr("participant", participant.clone());
    }

    Ok(NodeBuilder::new("receipt")
        .attr("id", msg_id)
        .attr("to", me.to_non_ad().to_string())
        .attr("type", "server-error")
        .children([encrypt_node, rmr_builder.build()])
        .build())
}

/// Decrypts the notification payload returned by the originating device.
pub fn decrypt_media_retry_data(
    payload: &EncryptedMediaPayload,
    media_key: &[u8],
    msg_id: &str,
) -> Result<proto::MediaRetryNotification> {
    let retry_key = media_retry_key(media_key)?;
    let plaintext = gcm::decrypt(
        &retry_key,
        &payload.iv,
        &payload.ciphertext,
        msg_id.as_bytes(),
    )
    .map_err(|e| RelayError::Crypto(e.to_string()))?;

    proto::MediaRetryNotification::decode(plaintext.as_slice())
        .map_err(|e| RelayError::ProtocolViolation(format!("bad retry notification: {e}")).into())
}

/// Regenerates a download URL from a direct path.
pub fn url_from_direct_path(host: &str, direct_path: &str) -> String {
    format!("https://{host}{direct_path}")
}

async fn wait_for_media_update(
    rx: &mut broadcast::Receiver<Arc<MediaRetryUpdate>>,
    msg_id: &str,
) -> Result<Arc<MediaRetryUpdate>> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if update.key.id.as_deref() == Some(msg_id) {
                        return Ok(update);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Media update listener lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow::anyhow!("media update channel closed"));
                }
            }
        }
    };

    tokio::time::timeout(MEDIA_UPDATE_TIMEOUT, wait)
        .await
        .map_err(|_| crate::error::TransportError::Timeout)?
}

impl Client {
    /// Requests a re-upload of the media in `message`, waits for the
    /// originating device's answer, and returns the patched message with a
    /// fresh `directPath`/`url`. A `message_update` event mirrors the patch.
    pub async fn update_media_message(
        self: &Arc<Self>,
        message: &proto::WebMessageInfo,
    ) -> Result<proto::WebMessageInfo> {
        let mut patched = message.clone();
        let key = patched
            .key
            .clone()
            .ok_or_else(|| RelayError::ProtocolViolation("message has no key".into()))?;
        let msg_id = key
            .id
            .clone()
            .ok_or_else(|| RelayError::ProtocolViolation("message key has no id".into()))?;

        let content_message = patched
            .message
            .as_mut()
            .ok_or_else(|| RelayError::ProtocolViolation("message has no content".into()))?;
        let media_key = media_content_mut(content_message)
            .and_then(|c| c.media_key().map(<[u8]>::to_vec))
            .ok_or_else(|| {
                RelayError::ProtocolViolation("expected media content with a media key".into())
            })?;

        let me = self.own_identity()?.jid;
        let request = encrypt_media_retry_request(&key, &media_key, &me)?;

        let mut rx = self.event_bus.media_update.subscribe();
        let (sent, update) = tokio::join!(
            self.transport.send_node(request),
            wait_for_media_update(&mut rx, &msg_id),
        );
        sent?;
        let update = update?;

        if let Some(code) = update.error_code {
            return Err(RelayError::MediaRetryFailed(code).into());
        }
        let payload = update.media.as_ref().ok_or_else(|| {
            RelayError::ProtocolViolation("media update carried no payload".into())
        })?;

        let notification = decrypt_media_retry_data(payload, &media_key, &msg_id)?;
        let result = notification.result();
        if result != ResultType::Success {
            return Err(RelayError::MediaRetryFailed(result.status_code()).into());
        }

        let direct_path = notification.direct_path.ok_or_else(|| {
            RelayError::ProtocolViolation("successful retry carried no direct path".into())
        })?;

        let mut content = media_content_mut(content_message)
            .expect("media content verified above");
        content.set_direct_path(direct_path.clone());
        content.set_url(url_from_direct_path(&self.config.media_host, &direct_path));

        if self.config.emit_own_events {
            let _ = self.event_bus.message_update.send(Arc::new(MessageUpdate {
                key,
                message: patched.message.clone(),
            }));
        }

        Ok(patched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_key(id: &str) -> proto::MessageKey {
        proto::MessageKey {
            remote_jid: Some("123@s.whatsapp.net".into()),
            from_me: Some(true),
            id: Some(id.into()),
            participant: None,
        }
    }

    #[test]
    fn retry_request_has_receipt_shape() {
        let me: Jid = "555:3@s.whatsapp.net".parse().unwrap();
        let node = encrypt_media_retry_request(&message_key("MSG1"), &[9u8; 32], &me).unwrap();

        assert_eq!(node.tag, "receipt");
        assert_eq!(node.attrs.get("type").unwrap(), "server-error");
        assert_eq!(node.attrs.get("id").unwrap(), "MSG1");
        // Addressed to the bare own user, not the device.
        assert_eq!(node.attrs.get("to").unwrap(), "555@s.whatsapp.net");

        let encrypt = node.get_optional_child("encrypt").unwrap();
        assert!(encrypt.get_optional_child("enc_p").is_some());
        assert!(encrypt.get_optional_child("enc_iv").is_some());

        let rmr = node.get_optional_child("rmr").unwrap();
        assert_eq!(rmr.attrs.get("from_me").unwrap(), "true");
    }

    #[test]
    fn retry_payload_round_trips_under_the_media_key() {
        let media_key = [3u8; 32];
        let notification = proto::MediaRetryNotification {
            stanza_id: Some("MSG2".into()),
            direct_path: Some("/v/t62.7118-24/abc".into()),
            result: Some(ResultType::Success as i32),
        };

        let retry_key = media_retry_key(&media_key).unwrap();
        let iv = [5u8; 12];
        let ciphertext = gcm::encrypt(
            &retry_key,
            &iv,
            &notification.encode_to_vec(),
            b"MSG2",
        )
        .unwrap();

        let payload = EncryptedMediaPayload {
            ciphertext,
            iv: iv.to_vec(),
        };
        let decoded = decrypt_media_retry_data(&payload, &media_key, "MSG2").unwrap();
        assert_eq!(decoded, notification);
        assert_eq!(decoded.result(), ResultType::Success);
    }

    #[test]
    fn wrong_message_id_fails_decryption() {
        let media_key = [3u8; 32];
        let retry_key = media_retry_key(&media_key).unwrap();
        let iv = [5u8; 12];
        let ciphertext = gcm::encrypt(&retry_key, &iv, b"data", b"MSG3").unwrap();
        let payload = EncryptedMediaPayload {
            ciphertext,
            iv: iv.to_vec(),
        };
        assert!(decrypt_media_retry_data(&payload, &media_key, "OTHER").is_err());
    }

    #[test]
    fn status_codes_match_result_types() {
        assert_eq!(ResultType::NotFound.status_code(), 404);
        assert_eq!(ResultType::DecryptionError.status_code(), 412);
        assert_eq!(ResultType::GeneralError.status_code(), 418);
    }

    #[test]
    fn url_regeneration_prefixes_the_media_host() {
        assert_eq!(
            url_from_direct_path("mmg.whatsapp.net", "/v/t62/123"),
            "https://mmg.whatsapp.net/v/t62/123"
        );
    }
}

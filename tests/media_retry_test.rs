//! Media retry flow: signed request, notification decrypt, message patch.

use std::sync::Arc;
use std::time::Duration;
use warelay::crypto::{gcm, hkdf};
use warelay::error::RelayError;
use warelay::proto;
use warelay::proto::media_retry_notification::ResultType;
use warelay::test_support::{TestHarness, test_client};
use warelay::types::events::{EncryptedMediaPayload, MediaRetryUpdate};

const MEDIA_KEY: [u8; 32] = [9u8; 32];

fn stored_image_message(id: &str) -> proto::WebMessageInfo {
    proto::WebMessageInfo {
        key: Some(proto::MessageKey {
            remote_jid: Some("20000000002@s.whatsapp.net".to_string()),
            from_me: Some(true),
            id: Some(id.to_string()),
            participant: None,
        }),
        message: Some(proto::Message {
            image_message: Some(proto::ImageMessage {
                url: Some("https://mmg.whatsapp.net/v/t62/stale".to_string()),
                direct_path: Some("/v/t62/stale".to_string()),
                media_key: Some(MEDIA_KEY.to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        message_timestamp: Some(1_700_000_000),
    }
}

fn encrypted_notification(msg_id: &str, result: ResultType, direct_path: Option<&str>) -> EncryptedMediaPayload {
    let notification = proto::MediaRetryNotification {
        stanza_id: Some(msg_id.to_string()),
        direct_path: direct_path.map(|p| p.to_string()),
        result: Some(result as i32),
    };

    let retry_key = hkdf::sha256(
        &MEDIA_KEY,
        None,
        b"WhatsApp Media Retry Notification",
        32,
    )
    .unwrap();
    let iv = [7u8; 12];
    let ciphertext = gcm::encrypt(
        &retry_key,
        &iv,
        &prost::Message::encode_to_vec(&notification),
        msg_id.as_bytes(),
    )
    .unwrap();

    EncryptedMediaPayload {
        ciphertext,
        iv: iv.to_vec(),
    }
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn successful_retry_patches_direct_path_and_url() {
    init_logs();
    let harness = test_client();
    let TestHarness {
        client, transport, ..
    } = &harness;

    let message = stored_image_message("RETRY-X");
    let mut updates_rx = client.event_bus.message_update.subscribe();

    // Deliver the device's answer shortly after the request goes out.
    let responder = {
        let client = Arc::clone(client);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = client.event_bus.media_update.send(Arc::new(MediaRetryUpdate {
                key: proto::MessageKey {
                    remote_jid: Some("20000000002@s.whatsapp.net".to_string()),
                    from_me: Some(true),
                    id: Some("RETRY-X".to_string()),
                    participant: None,
                },
                media: Some(encrypted_notification(
                    "RETRY-X",
                    ResultType::Success,
                    Some("/v/t62/fresh-path"),
                )),
                error_code: None,
            }));
        })
    };

    let patched = client.update_media_message(&message).await.unwrap();
    responder.await.unwrap();

    let image = patched.message.as_ref().unwrap().image_message.as_ref().unwrap();
    assert_eq!(image.direct_path.as_deref(), Some("/v/t62/fresh-path"));
    assert_eq!(
        image.url.as_deref(),
        Some("https://mmg.whatsapp.net/v/t62/fresh-path")
    );

    // The retry request went out as a signed server-error receipt.
    let receipts: Vec<_> = transport
        .sent()
        .into_iter()
        .filter(|n| n.tag == "receipt")
        .collect();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].attrs.get("type").unwrap(), "server-error");
    assert_eq!(receipts[0].attrs.get("id").unwrap(), "RETRY-X");
    assert!(receipts[0].get_optional_child("encrypt").is_some());
    assert!(receipts[0].get_optional_child("rmr").is_some());

    // Listeners saw the patch.
    let update = updates_rx.recv().await.unwrap();
    assert_eq!(update.key.id.as_deref(), Some("RETRY-X"));
    let updated_image = update
        .message
        .as_ref()
        .unwrap()
        .image_message
        .as_ref()
        .unwrap();
    assert_eq!(updated_image.direct_path.as_deref(), Some("/v/t62/fresh-path"));
}

#[tokio::test]
async fn device_rejection_maps_to_status_code() {
    let harness = test_client();
    let TestHarness { client, .. } = &harness;

    let message = stored_image_message("RETRY-404");

    let responder = {
        let client = Arc::clone(client);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = client.event_bus.media_update.send(Arc::new(MediaRetryUpdate {
                key: proto::MessageKey {
                    id: Some("RETRY-404".to_string()),
                    ..Default::default()
                },
                media: Some(encrypted_notification("RETRY-404", ResultType::NotFound, None)),
                error_code: None,
            }));
        })
    };

    let err = client.update_media_message(&message).await.unwrap_err();
    responder.await.unwrap();

    match err.downcast_ref::<RelayError>() {
        Some(RelayError::MediaRetryFailed(code)) => assert_eq!(*code, 404),
        other => panic!("expected MediaRetryFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn transport_reported_error_is_surfaced() {
    let harness = test_client();
    let TestHarness { client, .. } = &harness;

    let message = stored_image_message("RETRY-ERR");

    let responder = {
        let client = Arc::clone(client);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = client.event_bus.media_update.send(Arc::new(MediaRetryUpdate {
                key: proto::MessageKey {
                    id: Some("RETRY-ERR".to_string()),
                    ..Default::default()
                },
                media: None,
                error_code: Some(410),
            }));
        })
    };

    let err = client.update_media_message(&message).await.unwrap_err();
    responder.await.unwrap();

    match err.downcast_ref::<RelayError>() {
        Some(RelayError::MediaRetryFailed(code)) => assert_eq!(*code, 410),
        other => panic!("expected MediaRetryFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn non_media_message_is_rejected() {
    let harness = test_client();
    let TestHarness { client, .. } = &harness;

    let message = proto::WebMessageInfo {
        key: Some(proto::MessageKey {
            id: Some("TEXT-1".to_string()),
            ..Default::default()
        }),
        message: Some(proto::Message {
            conversation: Some("plain text".to_string()),
            ..Default::default()
        }),
        message_timestamp: None,
    };

    let err = client.update_media_message(&message).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RelayError>(),
        Some(RelayError::ProtocolViolation(_))
    ));
}

#[tokio::test]
async fn updates_for_other_messages_are_ignored_until_match() {
    let harness = test_client();
    let TestHarness { client, .. } = &harness;

    let message = stored_image_message("RETRY-MINE");

    let responder = {
        let client = Arc::clone(client);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            // An unrelated update first; must be skipped.
            let _ = client.event_bus.media_update.send(Arc::new(MediaRetryUpdate {
                key: proto::MessageKey {
                    id: Some("SOMEONE-ELSE".to_string()),
                    ..Default::default()
                },
                media: None,
                error_code: Some(404),
            }));
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = client.event_bus.media_update.send(Arc::new(MediaRetryUpdate {
                key: proto::MessageKey {
                    id: Some("RETRY-MINE".to_string()),
                    ..Default::default()
                },
                media: Some(encrypted_notification(
                    "RETRY-MINE",
                    ResultType::Success,
                    Some("/v/t62/mine"),
                )),
                error_code: None,
            }));
        })
    };

    let patched = client.update_media_message(&message).await.unwrap();
    responder.await.unwrap();

    let image = patched.message.unwrap().image_message.unwrap();
    assert_eq!(image.direct_path.as_deref(), Some("/v/t62/mine"));
}

use crate::proto;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Encrypted blob carried by a media re-upload notification.
#[derive(Debug, Clone)]
pub struct EncryptedMediaPayload {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

/// One entry of a `messages.media-update` notification: either the encrypted
/// retry payload or an error status reported by the remote device.
#[derive(Debug, Clone)]
pub struct MediaRetryUpdate {
    pub key: proto::MessageKey,
    pub media: Option<EncryptedMediaPayload>,
    pub error_code: Option<u16>,
}

/// Outbound patch applied to a stored message, mirrored to listeners.
#[derive(Debug, Clone)]
pub struct MessageUpdate {
    pub key: proto::MessageKey,
    pub message: Option<proto::Message>,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Fed by the inbound pipeline when the remote device answers a retry.
    (media_update, Arc<MediaRetryUpdate>),
    // Emitted by the relay when it patches a stored message.
    (message_update, Arc<MessageUpdate>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

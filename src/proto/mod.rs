//! Hand-maintained prost structs for the subset of the message protobuf the
//! relay touches. Field tags follow the published multi-device schema.

/// Addressing key of a stored message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageKey {
    #[prost(string, optional, tag = "1")]
    pub remote_jid: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub from_me: Option<bool>,
    #[prost(string, optional, tag = "3")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub participant: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImageMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub caption: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "5")]
    pub file_length: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub media_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(string, optional, tag = "11")]
    pub direct_path: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VideoMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "4")]
    pub file_length: Option<u64>,
    #[prost(uint32, optional, tag = "5")]
    pub seconds: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub media_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "7")]
    pub caption: Option<String>,
    #[prost(bool, optional, tag = "8")]
    pub gif_playback: Option<bool>,
    #[prost(bytes = "vec", optional, tag = "11")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(string, optional, tag = "13")]
    pub direct_path: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AudioMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "4")]
    pub file_length: Option<u64>,
    #[prost(uint32, optional, tag = "5")]
    pub seconds: Option<u32>,
    #[prost(bool, optional, tag = "6")]
    pub ptt: Option<bool>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub media_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(string, optional, tag = "9")]
    pub direct_path: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DocumentMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub title: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "5")]
    pub file_length: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub media_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "8")]
    pub file_name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(string, optional, tag = "10")]
    pub direct_path: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StickerMessage {
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub media_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub mimetype: Option<String>,
    #[prost(string, optional, tag = "8")]
    pub direct_path: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactMessage {
    #[prost(string, optional, tag = "1")]
    pub display_name: Option<String>,
    #[prost(string, optional, tag = "16")]
    pub vcard: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactsArrayMessage {
    #[prost(string, optional, tag = "1")]
    pub display_name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub contacts: Vec<ContactMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LiveLocationMessage {
    #[prost(double, optional, tag = "1")]
    pub degrees_latitude: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub degrees_longitude: Option<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExtendedTextMessage {
    #[prost(string, optional, tag = "1")]
    pub text: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupInviteMessage {
    #[prost(string, optional, tag = "1")]
    pub group_jid: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub invite_code: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListMessage {
    #[prost(string, optional, tag = "1")]
    pub title: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub description: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListResponseMessage {
    #[prost(string, optional, tag = "1")]
    pub title: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ButtonsResponseMessage {
    #[prost(string, optional, tag = "1")]
    pub selected_button_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderMessage {
    #[prost(string, optional, tag = "1")]
    pub order_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProductMessage {
    #[prost(string, optional, tag = "5")]
    pub business_owner_jid: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InteractiveResponseMessage {
    #[prost(string, optional, tag = "1")]
    pub native_flow_response_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollCreationMessage {
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(uint32, optional, tag = "4")]
    pub selectable_options_count: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PinInChatMessage {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(int32, optional, tag = "2")]
    pub r#type: Option<i32>,
    #[prost(int64, optional, tag = "3")]
    pub sender_timestamp_ms: Option<i64>,
}

/// Wrapper a sender attaches when fanning a message out to its own devices.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceSentMessage {
    #[prost(string, optional, tag = "1")]
    pub destination_jid: Option<String>,
    #[prost(message, optional, boxed, tag = "2")]
    pub message: Option<Box<Message>>,
    #[prost(string, optional, tag = "3")]
    pub phash: Option<String>,
}

/// Carries the serialized axolotl sender-key distribution payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SenderKeyDistributionMessage {
    #[prost(string, optional, tag = "1")]
    pub group_id: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub axolotl_sender_key_distribution_message: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, optional, tag = "1")]
    pub conversation: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub sender_key_distribution_message: Option<SenderKeyDistributionMessage>,
    #[prost(message, optional, tag = "3")]
    pub image_message: Option<ImageMessage>,
    #[prost(message, optional, tag = "4")]
    pub contact_message: Option<ContactMessage>,
    #[prost(message, optional, tag = "6")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[prost(message, optional, tag = "7")]
    pub document_message: Option<DocumentMessage>,
    #[prost(message, optional, tag = "8")]
    pub audio_message: Option<AudioMessage>,
    #[prost(message, optional, tag = "9")]
    pub video_message: Option<VideoMessage>,
    #[prost(message, optional, tag = "13")]
    pub contacts_array_message: Option<ContactsArrayMessage>,
    #[prost(message, optional, tag = "18")]
    pub live_location_message: Option<LiveLocationMessage>,
    #[prost(message, optional, tag = "26")]
    pub sticker_message: Option<StickerMessage>,
    #[prost(message, optional, tag = "28")]
    pub group_invite_message: Option<GroupInviteMessage>,
    #[prost(message, optional, tag = "30")]
    pub product_message: Option<ProductMessage>,
    #[prost(message, optional, boxed, tag = "31")]
    pub device_sent_message: Option<Box<DeviceSentMessage>>,
    #[prost(message, optional, tag = "36")]
    pub list_message: Option<ListMessage>,
    #[prost(message, optional, tag = "38")]
    pub order_message: Option<OrderMessage>,
    #[prost(message, optional, tag = "39")]
    pub list_response_message: Option<ListResponseMessage>,
    #[prost(message, optional, tag = "43")]
    pub buttons_response_message: Option<ButtonsResponseMessage>,
    #[prost(message, optional, tag = "48")]
    pub interactive_response_message: Option<InteractiveResponseMessage>,
    #[prost(message, optional, tag = "49")]
    pub poll_creation_message: Option<PollCreationMessage>,
    #[prost(message, optional, tag = "59")]
    pub poll_creation_message_v2: Option<PollCreationMessage>,
    #[prost(message, optional, tag = "63")]
    pub pin_in_chat_message: Option<PinInChatMessage>,
    #[prost(message, optional, tag = "64")]
    pub poll_creation_message_v3: Option<PollCreationMessage>,
}

/// A message as it sits in the caller's store: key plus content.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WebMessageInfo {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(message, optional, tag = "2")]
    pub message: Option<Message>,
    #[prost(uint64, optional, tag = "3")]
    pub message_timestamp: Option<u64>,
}

/// Signed long-term identity of the account, attached as `<device-identity>`
/// whenever a prekey-initiated ciphertext is part of a stanza.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdvSignedDeviceIdentity {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub details: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub account_signature_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub account_signature: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub device_signature: Option<Vec<u8>>,
}

/// Plaintext body of the encrypted blob inside a media retry request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerErrorReceipt {
    #[prost(string, optional, tag = "1")]
    pub stanza_id: Option<String>,
}

/// Decrypted payload of a media re-upload notification.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MediaRetryNotification {
    #[prost(string, optional, tag = "1")]
    pub stanza_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub direct_path: Option<String>,
    #[prost(enumeration = "media_retry_notification::ResultType", optional, tag = "3")]
    pub result: Option<i32>,
}

pub mod media_retry_notification {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ResultType {
        GeneralError = 0,
        Success = 1,
        NotFound = 2,
        DecryptionError = 3,
    }

    impl ResultType {
        /// HTTP-like status the caller sees when re-upload fails.
        pub fn status_code(self) -> u16 {
            match self {
                ResultType::Success => 200,
                ResultType::NotFound => 404,
                ResultType::DecryptionError => 412,
                ResultType::GeneralError => 418,
            }
        }
    }
}

use crate::binary::jid::Jid;
use crate::proto;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Wire encoding of the `edit` stanza attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EditAttribute {
    #[default]
    Empty,
    MessageEdit,
    PinInChat,
    SenderRevoke,
    AdminRevoke,
    Unknown(String),
}

impl From<String> for EditAttribute {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" => Self::Empty,
            "1" => Self::MessageEdit,
            "2" => Self::PinInChat,
            "7" => Self::SenderRevoke,
            "8" => Self::AdminRevoke,
            _ => Self::Unknown(s),
        }
    }
}

impl EditAttribute {
    pub fn to_string_val(&self) -> &str {
        match self {
            EditAttribute::Empty => "",
            EditAttribute::MessageEdit => "1",
            EditAttribute::PinInChat => "2",
            EditAttribute::SenderRevoke => "7",
            EditAttribute::AdminRevoke => "8",
            EditAttribute::Unknown(s) => s,
        }
    }
}

pub struct MessageUtils;

impl MessageUtils {
    /// Random-pads a serialized message before encryption. The pad value
    /// doubles as the pad length, 1..=15 bytes.
    pub fn pad_message_v2(mut plaintext: Vec<u8>) -> Vec<u8> {
        use rand::Rng;
        let mut rng = rand::rng();

        let mut pad_val = rng.random::<u8>() & 0x0F;
        if pad_val == 0 {
            pad_val = 0x0F;
        }

        let padding = vec![pad_val; pad_val as usize];
        plaintext.extend_from_slice(&padding);
        plaintext
    }

    /// Participant-list hash stamped on stanzas that distributed a sender
    /// key: `2:` plus base64url of the first 6 sha256 bytes over the sorted
    /// device-addressed JID strings. Primary devices hash with their `:0`
    /// suffix, same as every other device.
    pub fn participant_list_hash(devices: &[Jid]) -> String {
        let mut jids: Vec<String> = devices.iter().map(|j| j.to_ad_string()).collect();
        jids.sort();

        let full_hash = Sha256::digest(jids.join("").as_bytes());
        let truncated_hash = &full_hash[..6];

        format!(
            "2:{}",
            base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(truncated_hash)
        )
    }
}

/// Media type mapping for the `mediatype` stanza attribute. First match
/// wins, in table order; messages with no media arm get no attribute.
pub fn media_type(message: &proto::Message) -> Option<&'static str> {
    if message.image_message.is_some() {
        Some("image")
    } else if let Some(video) = &message.video_message {
        if video.gif_playback() {
            Some("gif")
        } else {
            Some("video")
        }
    } else if let Some(audio) = &message.audio_message {
        if audio.ptt() { Some("ptt") } else { Some("audio") }
    } else if message.document_message.is_some() {
        Some("document")
    } else if message.sticker_message.is_some() {
        Some("sticker")
    } else if message.contact_message.is_some() {
        Some("vcard")
    } else if message.contacts_array_message.is_some() {
        Some("contact_array")
    } else if message.live_location_message.is_some() {
        Some("livelocation")
    } else if message.list_message.is_some() {
        Some("list")
    } else if message.list_response_message.is_some() {
        Some("list_response")
    } else if message.buttons_response_message.is_some() {
        Some("buttons_response")
    } else if message.order_message.is_some() {
        Some("order")
    } else if message.product_message.is_some() {
        Some("product")
    } else if message.interactive_response_message.is_some() {
        Some("native_flow_response")
    } else if message.group_invite_message.is_some() {
        Some("url")
    } else {
        None
    }
}

pub fn has_poll_creation(message: &proto::Message) -> bool {
    message.poll_creation_message.is_some()
        || message.poll_creation_message_v2.is_some()
        || message.poll_creation_message_v3.is_some()
}

/// `type` attribute on the outgoing `<message>` stanza.
pub fn stanza_type(message: &proto::Message) -> &'static str {
    if has_poll_creation(message) {
        "poll"
    } else {
        "text"
    }
}

/// Mutable view over whichever media arm a message carries.
pub enum MediaContent<'a> {
    Image(&'a mut proto::ImageMessage),
    Video(&'a mut proto::VideoMessage),
    Audio(&'a mut proto::AudioMessage),
    Document(&'a mut proto::DocumentMessage),
    Sticker(&'a mut proto::StickerMessage),
}

impl MediaContent<'_> {
    pub fn media_key(&self) -> Option<&[u8]> {
        match self {
            MediaContent::Image(m) => m.media_key.as_deref(),
            MediaContent::Video(m) => m.media_key.as_deref(),
            MediaContent::Audio(m) => m.media_key.as_deref(),
            MediaContent::Document(m) => m.media_key.as_deref(),
            MediaContent::Sticker(m) => m.media_key.as_deref(),
        }
    }

    pub fn set_direct_path(&mut self, direct_path: String) {
        match self {
            MediaContent::Image(m) => m.direct_path = Some(direct_path),
            MediaContent::Video(m) => m.direct_path = Some(direct_path),
            MediaContent::Audio(m) => m.direct_path = Some(direct_path),
            MediaContent::Document(m) => m.direct_path = Some(direct_path),
            MediaContent::Sticker(m) => m.direct_path = Some(direct_path),
        }
    }

    pub fn set_url(&mut self, url: String) {
        match self {
            MediaContent::Image(m) => m.url = Some(url),
            MediaContent::Video(m) => m.url = Some(url),
            MediaContent::Audio(m) => m.url = Some(url),
            MediaContent::Document(m) => m.url = Some(url),
            MediaContent::Sticker(m) => m.url = Some(url),
        }
    }
}

pub fn media_content_mut(message: &mut proto::Message) -> Option<MediaContent<'_>> {
    if let Some(m) = message.image_message.as_mut() {
        Some(MediaContent::Image(m))
    } else if let Some(m) = message.video_message.as_mut() {
        Some(MediaContent::Video(m))
    } else if let Some(m) = message.audio_message.as_mut() {
        Some(MediaContent::Audio(m))
    } else if let Some(m) = message.document_message.as_mut() {
        Some(MediaContent::Document(m))
    } else if let Some(m) = message.sticker_message.as_mut() {
        Some(MediaContent::Sticker(m))
    } else {
        None
    }
}

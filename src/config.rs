use crate::binary::jid::Jid;
use crate::proto;
use crate::types::group::GroupMetadata;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Authoritative group metadata retrieval. Lives with the caller; the relay
/// only consumes the participant list and addressing mode.
#[async_trait]
pub trait GroupMetadataSource: Send + Sync {
    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, anyhow::Error>;
}

/// Optional cached variant consulted first when the relay options permit it.
/// Returning `None` falls back to the authoritative source.
#[async_trait]
pub trait CachedGroupMetadata: Send + Sync {
    async fn cached_group_metadata(
        &self,
        jid: &Jid,
    ) -> Result<Option<GroupMetadata>, anyhow::Error>;
}

/// Hook letting higher layers inject per-recipient fields into a message
/// right before it is serialized for encryption.
#[async_trait]
pub trait MessagePatcher: Send + Sync {
    async fn patch_message(
        &self,
        message: proto::Message,
        recipient_jids: &[Jid],
    ) -> Result<proto::Message, anyhow::Error>;
}

/// Callback-shaped collaborators injected into the engine.
#[derive(Clone)]
pub struct RelayCollaborators {
    pub group_metadata: Arc<dyn GroupMetadataSource>,
    pub cached_group_metadata: Option<Arc<dyn CachedGroupMetadata>>,
    pub patch_message: Option<Arc<dyn MessagePatcher>>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Group sends above this many participants are split into fixed-size
    /// blocks dispatched in parallel.
    pub participant_block_size: usize,
    /// Freshness window of the per-user device cache.
    pub user_devices_cache_ttl: Duration,
    pub user_devices_cache_capacity: u64,
    /// Whether locally-originated updates are echoed on the event bus.
    pub emit_own_events: bool,
    pub generate_high_quality_link_preview: bool,
    pub link_preview_image_thumbnail_width: u32,
    /// Host used when regenerating a media URL from a direct path.
    pub media_host: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            participant_block_size: 200,
            user_devices_cache_ttl: Duration::from_secs(300),
            user_devices_cache_capacity: 1000,
            emit_own_events: true,
            generate_high_quality_link_preview: false,
            link_preview_image_thumbnail_width: 192,
            media_host: "mmg.whatsapp.net".to_string(),
        }
    }
}

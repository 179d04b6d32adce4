pub mod address;
pub mod sender_key;

pub use address::{JidSignalExt, ProtocolAddress, SenderKeyName};

use async_trait::async_trait;

/// Ciphertext class produced by a pairwise encryption.
///
/// `Pkmsg` means the session was just initiated from a prekey bundle; the
/// stanza carrying it must attach the signed device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptedMessageType {
    Msg,
    Pkmsg,
}

impl EncryptedMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptedMessageType::Msg => "msg",
            EncryptedMessageType::Pkmsg => "pkmsg",
        }
    }

    pub fn is_prekey(&self) -> bool {
        matches!(self, EncryptedMessageType::Pkmsg)
    }
}

#[derive(Debug, Clone)]
pub struct EncryptedMessage {
    pub message_type: EncryptedMessageType,
    pub ciphertext: Vec<u8>,
}

/// Result of encrypting a payload under a group's sender key.
///
/// `distribution_message` is the serialized axolotl SKDM for the current key,
/// ready to be fanned out to devices that have not seen it yet.
#[derive(Debug, Clone)]
pub struct EncryptedGroupMessage {
    pub ciphertext: Vec<u8>,
    pub distribution_message: Vec<u8>,
}

/// A prekey bundle as fetched from the server, still in wire shape.
/// The repository consumes it to run X3DH and install a session.
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub identity_key: Vec<u8>,
    pub pre_key: Option<(u32, Vec<u8>)>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: Vec<u8>,
    pub signed_pre_key_signature: Vec<u8>,
}

/// Opaque capability over the Signal protocol primitives (X3DH, double
/// ratchet, group ratchet). The relay core never touches curve math; it only
/// asks for ciphertexts and session installs, and owns the persistence
/// formats the repository reads through the shared key store.
#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Encrypt a padded plaintext for one device over the pairwise session.
    async fn encrypt_message(
        &self,
        address: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, anyhow::Error>;

    /// Encrypt a padded plaintext under the group's current sender key,
    /// creating one if this endpoint has none yet.
    async fn encrypt_group_message(
        &self,
        sender_key_name: &SenderKeyName,
        plaintext: &[u8],
    ) -> Result<EncryptedGroupMessage, anyhow::Error>;

    /// Run X3DH against a fetched bundle and persist the new session.
    async fn inject_prekey_bundle(
        &self,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), anyhow::Error>;
}

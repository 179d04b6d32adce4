use crate::binary::jid::Jid;
use std::fmt;

/// Signal protocol address: bare user identifier plus device id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolAddress {
    pub name: String,
    pub device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Names one sender's key stream within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKeyName {
    pub group_id: String,
    pub sender: ProtocolAddress,
}

impl SenderKeyName {
    pub fn new(group_id: impl Into<String>, sender: ProtocolAddress) -> Self {
        Self {
            group_id: group_id.into(),
            sender,
        }
    }

    /// Composite key under which the serialized record is stored.
    pub fn store_key(&self) -> String {
        format!(
            "{}::{}::{}",
            self.group_id, self.sender.name, self.sender.device_id
        )
    }
}

pub trait JidSignalExt {
    fn to_protocol_address(&self) -> ProtocolAddress;
}

impl JidSignalExt for Jid {
    fn to_protocol_address(&self) -> ProtocolAddress {
        ProtocolAddress::new(self.user.clone(), self.device as u32)
    }
}

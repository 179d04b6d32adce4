use crate::binary::jid::Jid;
use serde::Serialize;

/// Whether a group addresses its members by phone-number or linked identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressingMode {
    Pn,
    Lid,
}

/// The slice of group metadata the relay consumes: who is in the group and
/// how members are addressed. Retrieval itself lives with the caller.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMetadata {
    pub id: Jid,
    pub participants: Vec<Jid>,
    pub addressing_mode: AddressingMode,
}

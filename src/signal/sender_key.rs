//! Sender-key ring for group messaging.
//!
//! Each group holds up to [`MAX_STATES`] sender-key states per sender, newest
//! at the tail. The ring tolerates out-of-order rotation notifications from
//! other participants without losing the ability to decrypt recently
//! superseded keys. Every read validates the state it returns, so storage
//! corruption surfaces as absence rather than a cryptographic fault.

use serde::{Deserialize, Serialize};

/// Upper bound on retained states; adding past it evicts the oldest.
pub const MAX_STATES: usize = 5;

/// Serde codec for binary fields: `{"type":"Buffer","data":[...]}` on the
/// wire, matching what the stored records contain.
mod buffer_json {
    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    struct BufferRepr {
        r#type: String,
        data: Vec<u8>,
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "Buffer")?;
        map.serialize_entry("data", bytes)?;
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let repr = BufferRepr::deserialize(deserializer)?;
        if repr.r#type != "Buffer" {
            return Err(D::Error::custom(format!(
                "expected Buffer object, got type '{}'",
                repr.r#type
            )));
        }
        Ok(repr.data)
    }
}

mod buffer_json_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    struct Wrapper(#[serde(with = "super::buffer_json")] Vec<u8>);

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => super::buffer_json::serialize(b, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderChainKey {
    pub iteration: u32,
    #[serde(with = "buffer_json")]
    pub seed: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSigningKey {
    #[serde(with = "buffer_json")]
    pub public: Vec<u8>,
    #[serde(
        with = "buffer_json_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub private: Option<Vec<u8>>,
}

/// Bounded lookahead entry kept for out-of-order decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderMessageKey {
    pub iteration: u32,
    #[serde(with = "buffer_json")]
    pub seed: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderKeyState {
    pub sender_key_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_chain_key: Option<SenderChainKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_signing_key: Option<SenderSigningKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sender_message_keys: Vec<SenderMessageKey>,
}

impl SenderKeyState {
    /// A state is usable iff it has a positive key id, a chain key, and a
    /// non-empty public signing key.
    pub fn is_valid(&self) -> bool {
        self.sender_key_id > 0
            && self.sender_chain_key.is_some()
            && self
                .sender_signing_key
                .as_ref()
                .is_some_and(|k| !k.public.is_empty())
    }
}

/// Ordered ring of sender-key states, newest at the tail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderKeyRecord {
    states: Vec<SenderKeyState>,
}

impl SenderKeyRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[SenderKeyState] {
        &self.states
    }

    /// Returns the newest valid state. Scans tailward past invalid entries;
    /// if no valid state exists the record is emptied.
    pub fn state(&mut self) -> Option<&SenderKeyState> {
        let idx = self.states.iter().rposition(|s| s.is_valid());
        match idx {
            Some(i) => Some(&self.states[i]),
            None => {
                if !self.states.is_empty() {
                    log::warn!("No valid sender key states, clearing record");
                    self.states.clear();
                }
                None
            }
        }
    }

    /// Returns the state with the given key id, if present and valid.
    pub fn state_by_id(&self, key_id: u32) -> Option<&SenderKeyState> {
        self.states
            .iter()
            .find(|s| s.sender_key_id == key_id)
            .filter(|s| s.is_valid())
    }

    pub fn state_by_id_mut(&mut self, key_id: u32) -> Option<&mut SenderKeyState> {
        self.states
            .iter_mut()
            .filter(|s| s.is_valid())
            .find(|s| s.sender_key_id == key_id)
    }

    /// Mutable access to the newest valid state (the sending chain).
    pub fn state_mut(&mut self) -> Option<&mut SenderKeyState> {
        let idx = self.states.iter().rposition(|s| s.is_valid());
        match idx {
            Some(i) => Some(&mut self.states[i]),
            None => {
                self.states.clear();
                None
            }
        }
    }

    /// Appends a state learned from another participant's distribution
    /// message, evicting the oldest when the ring is full.
    pub fn add_state(
        &mut self,
        key_id: u32,
        iteration: u32,
        chain_seed: Vec<u8>,
        public_signing_key: Vec<u8>,
    ) {
        self.states.push(SenderKeyState {
            sender_key_id: key_id,
            sender_chain_key: Some(SenderChainKey {
                iteration,
                seed: chain_seed,
            }),
            sender_signing_key: Some(SenderSigningKey {
                public: public_signing_key,
                private: None,
            }),
            sender_message_keys: Vec::new(),
        });
        if self.states.len() > MAX_STATES {
            self.states.remove(0);
        }
    }

    /// Destructive reset: installs a single full state including the private
    /// signing key. Used when this endpoint is the sender.
    pub fn set_state(
        &mut self,
        key_id: u32,
        iteration: u32,
        chain_seed: Vec<u8>,
        public_signing_key: Vec<u8>,
        private_signing_key: Vec<u8>,
    ) {
        self.states.clear();
        self.states.push(SenderKeyState {
            sender_key_id: key_id,
            sender_chain_key: Some(SenderChainKey {
                iteration,
                seed: chain_seed,
            }),
            sender_signing_key: Some(SenderSigningKey {
                public: public_signing_key,
                private: Some(private_signing_key),
            }),
            sender_message_keys: Vec::new(),
        });
    }

    /// Serializes to the stored JSON-array form.
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(&self.states).expect("sender key record is always serializable")
    }

    /// Accepts the UTF-8 JSON text of a stored record.
    pub fn deserialize(data: &[u8]) -> Result<Self, serde_json::Error> {
        let states: Vec<SenderKeyState> = serde_json::from_slice(data)?;
        Ok(Self { states })
    }

    /// Accepts a pre-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let states: Vec<SenderKeyState> = serde_json::from_value(value)?;
        Ok(Self { states })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_state(key_id: u32) -> SenderKeyState {
        SenderKeyState {
            sender_key_id: key_id,
            sender_chain_key: Some(SenderChainKey {
                iteration: 0,
                seed: vec![1, 2, 3],
            }),
            sender_signing_key: Some(SenderSigningKey {
                public: vec![5; 32],
                private: None,
            }),
            sender_message_keys: Vec::new(),
        }
    }

    #[test]
    fn ring_is_capped_at_five_states() {
        let mut record = SenderKeyRecord::new();
        for id in 1..=7u32 {
            record.add_state(id, 0, vec![0; 32], vec![1; 32]);
        }
        assert_eq!(record.states().len(), MAX_STATES);
        // Oldest two evicted.
        assert_eq!(record.states()[0].sender_key_id, 3);
        assert_eq!(record.states()[4].sender_key_id, 7);
    }

    #[test]
    fn newest_valid_state_wins() {
        let mut record = SenderKeyRecord::new();
        record.add_state(1, 0, vec![0; 32], vec![1; 32]);
        record.add_state(2, 0, vec![0; 32], vec![1; 32]);
        // Tail state has an empty signing key, so it is skipped.
        record.add_state(3, 0, vec![0; 32], Vec::new());

        let state = record.state().unwrap();
        assert_eq!(state.sender_key_id, 2);
    }

    #[test]
    fn record_empties_when_no_valid_state_remains() {
        let mut record = SenderKeyRecord::new();
        record.add_state(0, 0, vec![0; 32], Vec::new());
        assert!(record.state().is_none());
        assert!(record.is_empty());
    }

    #[test]
    fn set_state_replaces_the_ring() {
        let mut record = SenderKeyRecord::new();
        for id in 1..=4u32 {
            record.add_state(id, 0, vec![0; 32], vec![1; 32]);
        }
        record.set_state(99, 7, vec![9; 32], vec![2; 32], vec![3; 32]);
        assert_eq!(record.states().len(), 1);
        let state = record.state().unwrap();
        assert_eq!(state.sender_key_id, 99);
        assert!(state.sender_signing_key.as_ref().unwrap().private.is_some());
    }

    #[test]
    fn lookup_by_id_validates() {
        let mut record = SenderKeyRecord::new();
        record.add_state(7, 2, vec![4; 32], vec![6; 32]);
        assert!(record.state_by_id(7).is_some());
        assert!(record.state_by_id(8).is_none());
    }

    #[test]
    fn serde_round_trip_is_identity() {
        let mut record = SenderKeyRecord::new();
        record.set_state(11, 3, vec![0xAB; 32], vec![0xCD; 32], vec![0xEF; 32]);
        record.add_state(12, 0, vec![0x01; 32], vec![0x02; 32]);

        let bytes = record.serialize();
        let restored = SenderKeyRecord::deserialize(&bytes).unwrap();
        assert_eq!(record, restored);
    }

    #[test]
    fn serialized_form_uses_buffer_objects() {
        let state = full_state(1);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["senderChainKey"]["seed"]["type"], "Buffer");
        assert_eq!(
            json["senderChainKey"]["seed"]["data"],
            serde_json::json!([1, 2, 3])
        );
        assert_eq!(json["senderKeyId"], 1);
    }

    #[test]
    fn deserialize_accepts_pre_parsed_value() {
        let record = {
            let mut r = SenderKeyRecord::new();
            r.add_state(4, 1, vec![7; 32], vec![8; 32]);
            r
        };
        let value: serde_json::Value = serde_json::from_slice(&record.serialize()).unwrap();
        assert_eq!(SenderKeyRecord::from_value(value).unwrap(), record);
    }
}

//! Outbound end-to-end-encrypted message relay core.
//!
//! The crate takes a logical message addressed to a user or group and
//! produces the per-device ciphertexts, signaling stanzas, sender-key
//! distribution messages and device identity attestations that go over the
//! wire, while keeping the ratchet-adjacent state in the key store correct.
//! Transport, pairing, and the Signal math itself arrive as capabilities
//! ([`transport::StanzaTransport`], [`signal::SignalRepository`]).

pub mod binary;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod janitor;
pub mod mediaconn;
pub mod mediaretry;
pub mod participant;
pub mod prekeys;
pub mod proto;
pub mod receipt;
pub mod relay;
pub mod session;
pub mod signal;
pub mod store;
pub mod test_support;
pub mod transport;
pub mod types;
pub mod usync;

pub use binary::jid::Jid;
pub use client::{AccountIdentity, Client};
pub use receipt::ReceiptType;
pub use relay::RelayOptions;

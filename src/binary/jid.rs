use std::fmt;
use std::str::FromStr;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const SERVER_JID: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const HIDDEN_USER_SERVER: &str = "lid";
pub const STATUS_BROADCAST_USER: &str = "status";

pub type MessageId = String;

#[derive(Debug)]
pub enum JidError {
    InvalidFormat(String),
    Parse(std::num::ParseIntError),
}

impl fmt::Display for JidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JidError::InvalidFormat(s) => write!(f, "Invalid JID format: {s}"),
            JidError::Parse(e) => write!(f, "Failed to parse component: {e}"),
        }
    }
}

impl std::error::Error for JidError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JidError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::num::ParseIntError> for JidError {
    fn from(err: std::num::ParseIntError) -> Self {
        JidError::Parse(err)
    }
}

/// A structured addressable identity `user@server[:device]`.
///
/// Device 0 is the primary; additional devices are multi-device companions.
/// User-level equality (ignoring the device) goes through [`Jid::is_same_user_as`];
/// `PartialEq` compares the full JID including the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub device: u16,
}

impl Jid {
    pub fn new(user: &str, server: &str) -> Self {
        Self {
            user: user.to_string(),
            server: server.to_string(),
            device: 0,
        }
    }

    pub fn device(user: &str, server: &str, device: u16) -> Self {
        Self {
            user: user.to_string(),
            server: server.to_string(),
            device,
        }
    }

    /// Strips the device component, leaving the bare user identity.
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            device: 0,
        }
    }

    /// Canonical device-addressed string, carrying the `:device` suffix even
    /// for the primary. Used where the wire format hashes over device JIDs.
    pub fn to_ad_string(&self) -> String {
        if self.user.is_empty() {
            self.server.clone()
        } else {
            format!("{}:{}@{}", self.user, self.device, self.server)
        }
    }

    pub fn is_ad(&self) -> bool {
        self.device > 0
            && (self.server == DEFAULT_USER_SERVER || self.server == HIDDEN_USER_SERVER)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_user(&self) -> bool {
        self.server == DEFAULT_USER_SERVER || self.server == HIDDEN_USER_SERVER
    }

    pub fn is_lid(&self) -> bool {
        self.server == HIDDEN_USER_SERVER
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER && self.user == STATUS_BROADCAST_USER
    }

    pub fn is_broadcast_list(&self) -> bool {
        self.server == BROADCAST_SERVER && self.user != STATUS_BROADCAST_USER
    }

    pub fn is_same_user_as(&self, other: &Jid) -> bool {
        self.user == other.user
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.split_once('@') {
            Some((u, srv)) => (u, srv),
            None => ("", s),
        };

        if user_part.is_empty() {
            let known_servers = [
                DEFAULT_USER_SERVER,
                GROUP_SERVER,
                BROADCAST_SERVER,
                HIDDEN_USER_SERVER,
            ];
            if !known_servers.contains(&server) {
                return Err(JidError::InvalidFormat(format!(
                    "unknown server '{server}'"
                )));
            }
        }

        let (user, device) = match user_part.rsplit_once(':') {
            Some((u, d_str)) => (u, d_str.parse()?),
            None => (user_part, 0),
        };

        Ok(Jid {
            user: user.to_string(),
            server: server.to_string(),
            device,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_user_jid() {
        let jid: Jid = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, DEFAULT_USER_SERVER);
        assert_eq!(jid.device, 0);
        assert!(!jid.is_ad());
    }

    #[test]
    fn parses_device_jid() {
        let jid: Jid = "1234567890:45@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.device, 45);
        assert!(jid.is_ad());
        assert_eq!(jid.to_string(), "1234567890:45@s.whatsapp.net");
    }

    #[test]
    fn to_non_ad_strips_device() {
        let jid: Jid = "1234567890:3@s.whatsapp.net".parse().unwrap();
        let base = jid.to_non_ad();
        assert_eq!(base.device, 0);
        assert!(jid.is_same_user_as(&base));
        assert_ne!(jid, base);
    }

    #[test]
    fn ad_string_keeps_the_primary_device_suffix() {
        let jid: Jid = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.to_string(), "1234567890@s.whatsapp.net");
        assert_eq!(jid.to_ad_string(), "1234567890:0@s.whatsapp.net");

        let companion: Jid = "1234567890:3@s.whatsapp.net".parse().unwrap();
        assert_eq!(companion.to_ad_string(), "1234567890:3@s.whatsapp.net");
    }

    #[test]
    fn classifies_servers() {
        let group: Jid = "12036304@g.us".parse().unwrap();
        assert!(group.is_group());

        let status: Jid = "status@broadcast".parse().unwrap();
        assert!(status.is_status_broadcast());
        assert!(!status.is_broadcast_list());

        let lid: Jid = "236395184570386@lid".parse().unwrap();
        assert!(lid.is_lid());
    }

    #[test]
    fn rejects_unknown_server_only_jid() {
        assert!("bogus.example".parse::<Jid>().is_err());
    }
}

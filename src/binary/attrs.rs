use crate::binary::error::{BinaryError, Result};
use crate::binary::jid::Jid;
use crate::binary::node::Node;

/// Attribute reader that accumulates parse errors instead of failing on the
/// first one; callers check `finish()` once all attributes are consumed.
pub struct AttrParser<'a> {
    node: &'a Node,
    pub errors: Vec<BinaryError>,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            errors: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&self) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(BinaryError::AttrList(self.errors.clone()))
        }
    }

    fn get_raw(&mut self, key: &str, require: bool) -> Option<&'a str> {
        let val = self.node.attrs.get(key).map(|s| s.as_str());
        if require && val.is_none() {
            self.errors.push(BinaryError::MissingAttr(key.to_string()));
        }
        val
    }

    pub fn optional_string(&mut self, key: &str) -> Option<&'a str> {
        self.get_raw(key, false)
    }

    /// Required string attribute, defaulting to empty with a recorded error.
    pub fn string(&mut self, key: &str) -> String {
        self.get_raw(key, true).unwrap_or_default().to_string()
    }

    pub fn optional_jid(&mut self, key: &str) -> Option<Jid> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<Jid>() {
            Ok(jid) => Some(jid),
            Err(e) => {
                self.errors
                    .push(BinaryError::AttrParse(format!("invalid JID '{raw}': {e}")));
                None
            }
        }
    }

    pub fn jid(&mut self, key: &str) -> Jid {
        self.get_raw(key, true);
        self.optional_jid(key).unwrap_or_default()
    }

    pub fn optional_u64(&mut self, key: &str) -> Option<u64> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<u64>() {
            Ok(val) => Some(val),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "failed to parse u64 from '{raw}' for key '{key}': {e}"
                )));
                None
            }
        }
    }

    pub fn optional_u16(&mut self, key: &str) -> Option<u16> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<u16>() {
            Ok(val) => Some(val),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "failed to parse u16 from '{raw}' for key '{key}': {e}"
                )));
                None
            }
        }
    }
}

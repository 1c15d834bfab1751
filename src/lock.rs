//! Advisory LOCK tokens.
//!
//! Tokens are generated per request and never stored. The server does not
//! check them on later writes, so a LOCK grants no mutual exclusion at all;
//! it only keeps clients that insist on locking before writing working.

use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

use crate::config::LOCK_TIMEOUT_SECS;
use crate::error::DavError;
use crate::etag::unix_millis;
use crate::props::{dav_element, dav_root, text_element, to_xml_string, with_children};

/// Opaque token in the `opaquelocktoken:` URI scheme. Unique in practice
/// (time plus a random UUID), not guaranteed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(format!(
            "opaquelocktoken:{}-{}",
            unix_millis(SystemTime::now()),
            Uuid::new_v4()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Lock-Token` response header.
    pub fn header_value(&self) -> String {
        format!("<{}>", self.0)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock depth echoed back in `lockdiscovery`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

impl LockDepth {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("infinity") => LockDepth::Infinity,
            _ => LockDepth::Zero,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LockDepth::Zero => "0",
            LockDepth::Infinity => "infinity",
        }
    }
}

/// Renders the `<D:prop><D:lockdiscovery>` body answering a LOCK.
pub fn render_lock_discovery(token: &LockToken, depth: LockDepth) -> Result<String, DavError> {
    let lock_type = with_children("locktype", vec![dav_element("write")]);
    let lock_scope = with_children("lockscope", vec![dav_element("exclusive")]);
    let lock_token = with_children(
        "locktoken",
        vec![text_element("href", token.as_str())],
    );
    let active = with_children(
        "activelock",
        vec![
            lock_type,
            lock_scope,
            text_element("depth", depth.as_str()),
            text_element("timeout", format!("Second-{LOCK_TIMEOUT_SECS}")),
            lock_token,
        ],
    );

    let mut root = dav_root("prop");
    root.children.push(xmltree::XMLNode::Element(with_children(
        "lockdiscovery",
        vec![active],
    )));
    to_xml_string(&root)
}

//! Core record types used throughout the storage layer.

use crate::error::{Error, Result};
use crate::kv::{AttributeValue, Item};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// User-agent id: opaque identifier of one push subscriber connection.
pub type Uaid = String;

/// Channel id within a user.
pub type Chid = String;

/// Set of channel ids registered for a user.
pub type ChannelSet = BTreeSet<Chid>;

/// Opaque message metadata.
pub type Headers = BTreeMap<String, String>;

/// Ordering key of the per-user channel registry row.
///
/// A single space sorts before every `chid:message_id` key, so a range scan
/// from here visits the registry first and then every message.
pub const CHANNEL_REGISTRY_KEY: &str = " ";

/// Composite ordering key `"{chid}:{message_id}"`.
pub fn ordering_key(chid: &str, message_id: &str) -> String {
    format!("{}:{}", chid, message_id)
}

/// Current time in whole seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Fresh random 32-character hex id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Fresh opaque token identifying one version of a message.
pub fn new_update_id() -> String {
    new_id()
}

/// A user's routing record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// User-agent id.
    pub uaid: Uaid,
    /// Node currently holding the user's live connection.
    pub node_id: Option<String>,
    /// When the current connection was established.
    pub connected_at: Option<u64>,
    /// Delivery protocol variant.
    pub router_type: Option<String>,
    /// Message partition currently used for this user.
    pub current_month: Option<String>,
}

impl UserRecord {
    pub(crate) const UAID: &'static str = "uaid";
    pub(crate) const NODE_ID: &'static str = "node_id";
    pub(crate) const CONNECTED_AT: &'static str = "connected_at";
    pub(crate) const ROUTER_TYPE: &'static str = "router_type";
    pub(crate) const CURRENT_MONTH: &'static str = "current_month";

    /// Create a record holding only the uaid.
    pub fn new(uaid: impl Into<Uaid>) -> Self {
        Self {
            uaid: uaid.into(),
            ..Default::default()
        }
    }

    /// Claim the user for `node_id` as of `connected_at`.
    pub fn with_node(mut self, node_id: impl Into<String>, connected_at: u64) -> Self {
        self.node_id = Some(node_id.into());
        self.connected_at = Some(connected_at);
        self
    }

    pub fn with_router_type(mut self, router_type: impl Into<String>) -> Self {
        self.router_type = Some(router_type.into());
        self
    }

    pub fn with_current_month(mut self, month: impl Into<String>) -> Self {
        self.current_month = Some(month.into());
        self
    }

    /// Decode a stored router row.
    pub fn from_item(item: &Item) -> Result<Self> {
        let uaid = item
            .get_str(Self::UAID)
            .ok_or_else(|| Error::InvalidRecord("router row without uaid".to_string()))?;
        Ok(Self {
            uaid: uaid.to_string(),
            node_id: item.get_str(Self::NODE_ID).map(str::to_string),
            connected_at: item.get_u64(Self::CONNECTED_AT),
            router_type: item.get_str(Self::ROUTER_TYPE).map(str::to_string),
            current_month: item.get_str(Self::CURRENT_MONTH).map(str::to_string),
        })
    }

    /// Non-key attributes that are set, in a stable order.
    pub(crate) fn attributes(&self) -> Vec<(&'static str, AttributeValue)> {
        let mut attrs = Vec::new();
        if let Some(node_id) = &self.node_id {
            attrs.push((Self::NODE_ID, AttributeValue::from(node_id.clone())));
        }
        if let Some(connected_at) = self.connected_at {
            attrs.push((Self::CONNECTED_AT, AttributeValue::from(connected_at)));
        }
        if let Some(router_type) = &self.router_type {
            attrs.push((Self::ROUTER_TYPE, AttributeValue::from(router_type.clone())));
        }
        if let Some(month) = &self.current_month {
            attrs.push((Self::CURRENT_MONTH, AttributeValue::from(month.clone())));
        }
        attrs
    }
}

/// Result of a node claim through `RouterStore::register_user`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The claim was written. Holds the row as it was before the write
    /// (empty for a brand new user).
    Registered(Item),
    /// A newer claim or a different router type is already stored.
    Rejected,
}

impl RegisterOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegisterOutcome::Registered(_))
    }

    /// Attributes stored before a successful claim.
    pub fn previous(&self) -> Option<&Item> {
        match self {
            RegisterOutcome::Registered(item) => Some(item),
            RegisterOutcome::Rejected => None,
        }
    }
}

/// One pending notification in the legacy single-version store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyNotification {
    pub uaid: Uaid,
    pub chid: Chid,
    pub version: u64,
}

impl LegacyNotification {
    pub(crate) const UAID: &'static str = "uaid";
    pub(crate) const CHID: &'static str = "chid";
    pub(crate) const VERSION: &'static str = "version";

    /// Decode a stored notification row.
    pub fn from_item(item: &Item) -> Result<Self> {
        let field = |name: &str| {
            item.get_str(name)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidRecord(format!("notification row without {}", name)))
        };
        Ok(Self {
            uaid: field(Self::UAID)?,
            chid: field(Self::CHID)?,
            version: item.get_u64(Self::VERSION).ok_or_else(|| {
                Error::InvalidRecord("notification row without version".to_string())
            })?,
        })
    }
}

/// Parameters of a message write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWrite {
    pub chid: Chid,
    pub message_id: String,
    /// Time to live, in seconds.
    pub ttl: u64,
    pub data: Option<String>,
    pub headers: Option<Headers>,
    /// Epoch seconds; the write time when `None`.
    pub timestamp: Option<u64>,
}

impl MessageWrite {
    /// A payload-less message.
    pub fn new(chid: impl Into<Chid>, message_id: impl Into<String>, ttl: u64) -> Self {
        Self {
            chid: chid.into(),
            message_id: message_id.into(),
            ttl,
            data: None,
            headers: None,
            timestamp: None,
        }
    }

    /// Attach a payload and its headers.
    pub fn with_data(mut self, data: impl Into<String>, headers: Headers) -> Self {
        self.data = Some(data.into());
        self.headers = Some(headers);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Ordering key of the row this write targets.
    pub fn ordering_key(&self) -> String {
        ordering_key(&self.chid, &self.message_id)
    }
}

/// A stored pending message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub uaid: Uaid,
    pub chid: Chid,
    pub message_id: String,
    pub data: Option<String>,
    pub headers: Option<Headers>,
    pub ttl: u64,
    pub timestamp: u64,
    /// Token regenerated on every mutation.
    pub updateid: String,
}

impl Message {
    pub(crate) const UAID: &'static str = "uaid";
    pub(crate) const ORDERING_KEY: &'static str = "chidmessageid";
    pub(crate) const DATA: &'static str = "data";
    pub(crate) const HEADERS: &'static str = "headers";
    pub(crate) const TTL: &'static str = "ttl";
    pub(crate) const TIMESTAMP: &'static str = "timestamp";
    pub(crate) const UPDATE_ID: &'static str = "updateid";

    /// Decode a stored message row.
    pub fn from_item(item: &Item) -> Result<Self> {
        let invalid = |what: &str| Error::InvalidRecord(format!("message row without {}", what));

        let uaid = item.get_str(Self::UAID).ok_or_else(|| invalid(Self::UAID))?;
        let key = item
            .get_str(Self::ORDERING_KEY)
            .ok_or_else(|| invalid(Self::ORDERING_KEY))?;
        let (chid, message_id) = key
            .split_once(':')
            .ok_or_else(|| Error::InvalidRecord(format!("malformed ordering key {:?}", key)))?;

        Ok(Self {
            uaid: uaid.to_string(),
            chid: chid.to_string(),
            message_id: message_id.to_string(),
            data: item.get_str(Self::DATA).map(str::to_string),
            headers: item.get_map(Self::HEADERS).cloned(),
            ttl: item.get_u64(Self::TTL).ok_or_else(|| invalid(Self::TTL))?,
            timestamp: item
                .get_u64(Self::TIMESTAMP)
                .ok_or_else(|| invalid(Self::TIMESTAMP))?,
            updateid: item
                .get_str(Self::UPDATE_ID)
                .ok_or_else(|| invalid(Self::UPDATE_ID))?
                .to_string(),
        })
    }

    /// Composite ordering key of this message.
    pub fn ordering_key(&self) -> String {
        ordering_key(&self.chid, &self.message_id)
    }
}

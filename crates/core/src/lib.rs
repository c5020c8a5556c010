//! hubsync core types: resource identity, watch events, and the backend wire model.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dispatch key for one tracked resource kind: API group+version plus Kind.
///
/// `group_version` is the full `apiVersion` string as it appears on objects
/// ("v1" for the core group, "cluster.open-cluster-management.io/v1"
/// otherwise). The key selects the partition an event is routed to; it is
/// not part of object identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KindKey {
    pub group_version: String,
    pub kind: String,
}

impl KindKey {
    pub fn new(group_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group_version: group_version.into(), kind: kind.into() }
    }

    /// Parse a key like "v1/Secret" or "hive.openshift.io/v1/ClusterDeployment".
    /// The Kind is everything after the last slash.
    pub fn parse(key: &str) -> Option<Self> {
        let (gv, kind) = key.rsplit_once('/')?;
        if gv.is_empty() || kind.is_empty() {
            return None;
        }
        Some(Self::new(gv, kind))
    }
}

impl fmt::Display for KindKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_version, self.kind)
    }
}

/// Identity of a resource within one kind partition.
///
/// Two records are the same entity iff namespace and name match.
/// Cluster-scoped resources carry no namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceIdentity {
    /// Cache key: "<namespace>/<name>", "/<name>" when cluster-scoped.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace.as_deref().unwrap_or(""), self.name)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Opaque Kubernetes object payload as delivered by the backend.
///
/// Records are value types: every update replaces the stored record
/// wholesale, nothing is patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRecord(pub serde_json::Value);

impl ResourceRecord {
    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(|v| v.as_str())
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(|v| v.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.meta().and_then(|m| m.get("name")).and_then(|v| v.as_str())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta().and_then(|m| m.get("namespace")).and_then(|v| v.as_str())
    }

    /// Partition key, if the record names its apiVersion and kind.
    pub fn kind_key(&self) -> Option<KindKey> {
        Some(KindKey::new(self.api_version()?, self.kind()?))
    }

    /// Identity within the partition. A record without `metadata.name`
    /// has no identity and cannot be reconciled.
    pub fn identity(&self) -> Option<ResourceIdentity> {
        Some(ResourceIdentity {
            namespace: self.namespace().map(|s| s.to_string()),
            name: self.name()?.to_string(),
        })
    }

    fn meta(&self) -> Option<&serde_json::Value> {
        self.0.get("metadata")
    }
}

/// What a watch event does to its object's partition.
/// Added and Modified are handled identically (upsert).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    Added,
    Modified,
    Deleted,
}

/// One resource event from the backend stream.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub action: EventAction,
    pub object: ResourceRecord,
}

impl WatchEvent {
    pub fn new(action: EventAction, object: ResourceRecord) -> Self {
        Self { action, object }
    }
}

/// Server-pushed console settings. Loosely typed; last write wins.
pub type Settings = serde_json::Value;

/// Decoded message from the backend event stream.
///
/// ADDED/MODIFIED/DELETED carry a resource payload; the rest are control
/// signals. Unknown `type` values fail to decode and are dropped by the
/// stream client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamMessage {
    #[serde(rename = "ADDED")]
    Added { object: ResourceRecord },
    #[serde(rename = "MODIFIED")]
    Modified { object: ResourceRecord },
    #[serde(rename = "DELETED")]
    Deleted { object: ResourceRecord },
    /// A new full resync is beginning; prior pending events are stale.
    #[serde(rename = "START")]
    Start,
    /// The initial snapshot has been fully delivered.
    #[serde(rename = "LOADED")]
    Loaded,
    /// End of packet: flush marker within an established stream.
    #[serde(rename = "EOP")]
    Eop,
    #[serde(rename = "SETTINGS")]
    Settings { settings: Settings },
}

impl StreamMessage {
    /// Split resource events from control signals.
    pub fn into_event(self) -> Result<WatchEvent, StreamMessage> {
        match self {
            StreamMessage::Added { object } => Ok(WatchEvent::new(EventAction::Added, object)),
            StreamMessage::Modified { object } => Ok(WatchEvent::new(EventAction::Modified, object)),
            StreamMessage::Deleted { object } => Ok(WatchEvent::new(EventAction::Deleted, object)),
            other => Err(other),
        }
    }
}

//! # Node Identity
//!
//! Every running instance is a node with a stable identifier, generated once at
//! startup unless configured. Bus subjects are addressed by node id and a
//! provisioned worker is owned by exactly one node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Identity of the running node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub started_at: DateTime<Utc>,
}

static PROCESS_NODE: OnceLock<NodeIdentity> = OnceLock::new();

impl NodeIdentity {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            started_at: Utc::now(),
        }
    }

    pub fn generate() -> Self {
        Self::new(NodeId::new())
    }

    /// Process-wide identity, fixed by the first call
    ///
    /// `configured` is only consulted on the first call.
    pub fn process(configured: Option<NodeId>) -> &'static NodeIdentity {
        PROCESS_NODE.get_or_init(|| match configured {
            Some(id) => Self::new(id),
            None => Self::generate(),
        })
    }
}

/// Subsystems a node runs, reported by the ping subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeSubsystems {
    pub worker_manager: bool,
    pub task_orchestrator: bool,
    pub step_dispatcher: bool,
}

/// Reply payload of `node.<id>.ping`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub started_at: DateTime<Utc>,
    pub subsystems: NodeSubsystems,
    #[serde(default)]
    pub backends: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parses_and_displays() {
        let id = NodeId::new();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_serializes_as_plain_uuid() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&NodeId::from_uuid(uuid)).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }

    #[test]
    fn test_process_identity_is_stable() {
        let first = NodeIdentity::process(None).clone();
        let second = NodeIdentity::process(Some(NodeId::new()));
        assert_eq!(&first, second);
    }
}

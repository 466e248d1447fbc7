use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{DecodeErr, Result},
    fields::Fields,
};

/// The role a peer declares when it first registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    Dashboard,
    Library,
}

impl NodeRole {
    /// Parses a role name, ignoring its case.
    ///
    /// # Args
    /// * `name` - The role as sent on the wire.
    ///
    /// # Returns
    /// The matching role, or `None` if it names no known role.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "DASHBOARD" => Some(Self::Dashboard),
            "LIBRARY" => Some(Self::Library),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Dashboard => "DASHBOARD",
            NodeRole::Library => "LIBRARY",
        }
    }
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First message sent by a peer, carrying what kind of node it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub node_role: NodeRole,
}

impl Registration {
    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let fields = Fields::new(map);
        let node_type = fields.string("node_type")?;

        let node_role = NodeRole::parse(&node_type).ok_or_else(|| {
            DecodeErr::malformed(
                "node_type",
                format!("{node_type:?} is neither DASHBOARD nor LIBRARY"),
            )
        })?;

        Ok(Self { node_role })
    }
}

//! Coordinator side of a federated training session: turns inbound protocol
//! messages into session state, and session state into per-round model
//! artifacts.

pub mod configs;
pub mod converter;
pub mod error;
pub mod marshal;
pub mod model;
mod node;
mod pipeline;
mod session;
pub mod store;

pub use configs::NodeConfig;
pub use converter::{Conversion, Converter, ShardConverter};
pub use error::{CoordinatorErr, Result};
pub use marshal::{ShapeEntry, Tensor};
pub use node::{Node, Outcome};
pub use pipeline::Pipeline;
pub use session::{Criteria, RoundPhase, Session};
pub use store::{ArtifactStore, RoundMetadata};

impl Node<ShardConverter> {
    /// Builds a node storing its artifacts where `config` says, converting
    /// with the built-in `ShardConverter`.
    pub fn from_config(config: &NodeConfig) -> Self {
        let store = ArtifactStore::new(config.artifacts_dir.clone());
        Node::new(Pipeline::new(store, ShardConverter::new()))
    }
}

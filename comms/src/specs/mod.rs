//! Typed payloads of the three inbound message kinds.

mod node;
mod session;
mod weights;

pub use node::{NodeRole, Registration};
pub use session::SessionStart;
pub use weights::WeightsUpdate;

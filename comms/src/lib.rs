mod error;
mod fields;
pub mod msg;
pub mod specs;

pub use error::{DecodeErr, Result};
pub use msg::{Message, MessageKind};
pub use specs::{NodeRole, Registration, SessionStart, WeightsUpdate};

use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used across the protocol decoding module.
pub type Result<T> = std::result::Result<T, DecodeErr>;

/// Failures while turning a raw inbound mapping into a typed `Message`.
///
/// Every variant rejects a single message, they never affect any session.
#[derive(Debug)]
pub enum DecodeErr {
    /// The bytes on the wire are not JSON at all.
    InvalidJson(serde_json::Error),
    /// The `type` discriminator matches none of the known message kinds.
    UnknownMessageType(String),
    /// A required key is absent.
    MissingField(String),
    /// A key is present but holds a value of the wrong shape.
    MalformedField { field: String, reason: String },
}

impl DecodeErr {
    pub(crate) fn malformed<F, R>(field: F, reason: R) -> Self
    where
        F: Into<String>,
        R: Into<String>,
    {
        Self::MalformedField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl Display for DecodeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErr::InvalidJson(e) => write!(f, "message is not valid json: {e}"),
            DecodeErr::UnknownMessageType(tag) => write!(f, "unknown message type {tag:?}"),
            DecodeErr::MissingField(field) => write!(f, "missing required field `{field}`"),
            DecodeErr::MalformedField { field, reason } => {
                write!(f, "malformed field `{field}`: {reason}")
            }
        }
    }
}

impl Error for DecodeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DecodeErr::InvalidJson(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DecodeErr {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidJson(value)
    }
}

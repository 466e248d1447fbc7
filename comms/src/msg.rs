use std::fmt::{self, Display};

use serde_json::{Value, json};

use crate::{
    error::{DecodeErr, Result},
    fields::Fields,
    specs::{Registration, SessionStart, WeightsUpdate},
};

/// The closed set of message kinds the coordinator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Register,
    NewSession,
    NewWeights,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [Self::Register, Self::NewSession, Self::NewWeights];

    /// The wire-level value of the `type` discriminator.
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Register => "REGISTER",
            MessageKind::NewSession => "NEW_SESSION",
            MessageKind::NewWeights => "NEW_WEIGHTS",
        }
    }

    /// Selects the kind whose tag matches exactly, case included.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// An inbound protocol message, fully validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Registration(Registration),
    SessionStart(SessionStart),
    WeightsUpdate(WeightsUpdate),
}

impl Message {
    /// Decodes a raw inbound mapping into a typed message.
    ///
    /// # Args
    /// * `raw` - The JSON object as received from a peer.
    ///
    /// # Returns
    /// The decoded message.
    ///
    /// # Errors
    /// `MissingField` or `MalformedField` when a required key is absent or
    /// mistyped, `UnknownMessageType` when `type` names no known kind.
    pub fn decode(raw: &Value) -> Result<Self> {
        let Value::Object(map) = raw else {
            return Err(DecodeErr::malformed("type", "message is not a JSON object"));
        };

        let tag = Fields::new(map).string("type")?;
        let Some(kind) = MessageKind::from_tag(&tag) else {
            return Err(DecodeErr::UnknownMessageType(tag));
        };

        let msg = match kind {
            MessageKind::Register => Self::Registration(Registration::from_map(map)?),
            MessageKind::NewSession => Self::SessionStart(SessionStart::from_map(map)?),
            MessageKind::NewWeights => Self::WeightsUpdate(WeightsUpdate::from_map(map)?),
        };

        Ok(msg)
    }

    /// Parses JSON bytes and decodes them.
    ///
    /// # Args
    /// * `buf` - A serialized JSON message.
    ///
    /// # Returns
    /// The decoded message or `InvalidJson` if `buf` isn't JSON.
    pub fn from_slice(buf: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(buf)?;
        Self::decode(&raw)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Registration(_) => MessageKind::Register,
            Message::SessionStart(_) => MessageKind::NewSession,
            Message::WeightsUpdate(_) => MessageKind::NewWeights,
        }
    }
}

/// Single-line JSON rendering safe for logs: the model blob and the weight
/// vector are replaced by their sizes.
impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = match self {
            Message::Registration(reg) => json!({
                "type": self.kind().tag(),
                "node_type": reg.node_role.as_str(),
            }),
            Message::SessionStart(start) => json!({
                "type": self.kind().tag(),
                "repo_id": start.repo_id,
                "h5_model": format!("<{} bytes>", start.model_blob.len()),
                "hyperparams": start.hyperparams,
                "selection_criteria": start.selection_criteria,
                "continuation_criteria": start.continuation_criteria,
                "termination_criteria": start.termination_criteria,
            }),
            Message::WeightsUpdate(update) => json!({
                "type": self.kind().tag(),
                "session_id": update.session_id,
                "round": update.round,
                "action": update.action,
                "weights": "omitted",
                "omega": update.omega,
            }),
        };

        write!(f, "{redacted}")
    }
}

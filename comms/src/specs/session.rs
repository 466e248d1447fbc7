use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Map, Value};

use crate::{
    error::{DecodeErr, Result},
    fields::Fields,
};

/// Sent by the orchestrating service to open a new training session.
///
/// `model_blob` holds the raw model binary, already decoded from the base64
/// text it travels as.
#[derive(Clone, PartialEq)]
pub struct SessionStart {
    pub repo_id: String,
    pub model_blob: Vec<u8>,
    pub hyperparams: Map<String, Value>,
    pub selection_criteria: Map<String, Value>,
    pub continuation_criteria: Map<String, Value>,
    pub termination_criteria: Map<String, Value>,
}

impl SessionStart {
    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let fields = Fields::new(map);

        let repo_id = fields.string("repo_id")?;
        let encoded = fields.string("h5_model")?;
        // Line-wrapped encodings are accepted.
        let compact: Vec<u8> = encoded
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let model_blob = STANDARD
            .decode(&compact)
            .map_err(|e| DecodeErr::malformed("h5_model", format!("invalid base64: {e}")))?;

        Ok(Self {
            repo_id,
            model_blob,
            hyperparams: fields.object("hyperparams")?,
            selection_criteria: fields.object("selection_criteria")?,
            continuation_criteria: fields.object("continuation_criteria")?,
            termination_criteria: fields.object("termination_criteria")?,
        })
    }
}

impl fmt::Debug for SessionStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStart")
            .field("repo_id", &self.repo_id)
            .field(
                "model_blob",
                &format_args!("<{} bytes>", self.model_blob.len()),
            )
            .field("hyperparams", &self.hyperparams)
            .field("selection_criteria", &self.selection_criteria)
            .field("continuation_criteria", &self.continuation_criteria)
            .field("termination_criteria", &self.termination_criteria)
            .finish()
    }
}

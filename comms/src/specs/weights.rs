use std::fmt;

use serde_json::{Map, Value};

use crate::{error::Result, fields::Fields};

/// A library node's contribution for one round.
///
/// `omega` is the node's contribution weight, the coordinator carries it
/// along but does not aggregate with it.
#[derive(Clone, PartialEq)]
pub struct WeightsUpdate {
    pub session_id: String,
    pub round: u64,
    pub action: String,
    pub weights: Vec<f64>,
    pub omega: f64,
}

impl WeightsUpdate {
    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let fields = Fields::new(map);
        let results = fields.nested("results")?;

        Ok(Self {
            session_id: fields.string("session_id")?,
            round: fields.unsigned("round")?,
            action: fields.string("action")?,
            weights: results.numbers("weights")?,
            omega: results.number("omega")?,
        })
    }
}

impl fmt::Debug for WeightsUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightsUpdate")
            .field("session_id", &self.session_id)
            .field("round", &self.round)
            .field("action", &self.action)
            .field("weights", &format_args!("<{} values>", self.weights.len()))
            .field("omega", &self.omega)
            .finish()
    }
}

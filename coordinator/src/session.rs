use std::fmt::{self, Display};

use comms::{SessionStart, WeightsUpdate};
use log::debug;
use serde_json::{Map, Value};

use crate::{
    error::{Result, ShapeMismatchErr, StateErr},
    marshal::{self, ShapeEntry},
};

/// Where a session stands within its current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// The current round's model is published, waiting for updates.
    Serving,
    /// At least one update was accepted for the current round.
    Aggregating,
    /// The next round's model is being built and converted.
    Converting,
    /// The session won't advance anymore.
    Terminated,
}

impl Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundPhase::Serving => "serving",
            RoundPhase::Aggregating => "aggregating",
            RoundPhase::Converting => "converting",
            RoundPhase::Terminated => "terminated",
        };

        f.write_str(s)
    }
}

/// The training criteria the orchestrating service opened the session with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub hyperparams: Map<String, Value>,
    pub selection: Map<String, Value>,
    pub continuation: Map<String, Value>,
    pub termination: Map<String, Value>,
}

impl From<&SessionStart> for Criteria {
    fn from(start: &SessionStart) -> Self {
        Self {
            hyperparams: start.hyperparams.clone(),
            selection: start.selection_criteria.clone(),
            continuation: start.continuation_criteria.clone(),
            termination: start.termination_criteria.clone(),
        }
    }
}

/// The state of one in-progress training session.
///
/// A `Session` only exists once its initial model has been converted, so
/// every value always describes a servable round.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    repo_id: String,
    criteria: Criteria,
    current_round: u64,
    weights_shape: Vec<ShapeEntry>,
    current_weights: Vec<f64>,
    last_omega: Option<f64>,
    phase: RoundPhase,
}

impl Session {
    /// Creates the session for a freshly converted initial model.
    ///
    /// # Args
    /// * `id` - The session's identity.
    /// * `start` - The message that opened the session.
    /// * `weights_shape` - The manifest reported by the initial conversion.
    /// * `current_weights` - The initial model's weights, flattened.
    ///
    /// # Returns
    /// A session serving round 0, or a `ShapeMismatch` if the weights don't
    /// fit the manifest.
    pub(crate) fn new(
        id: String,
        start: &SessionStart,
        weights_shape: Vec<ShapeEntry>,
        current_weights: Vec<f64>,
    ) -> Result<Self> {
        check_len(&weights_shape, current_weights.len())?;

        Ok(Self {
            id,
            repo_id: start.repo_id.clone(),
            criteria: Criteria::from(start),
            current_round: 0,
            weights_shape,
            current_weights,
            last_omega: None,
            phase: RoundPhase::Serving,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn current_round(&self) -> u64 {
        self.current_round
    }

    pub fn weights_shape(&self) -> &[ShapeEntry] {
        &self.weights_shape
    }

    pub fn current_weights(&self) -> &[f64] {
        &self.current_weights
    }

    /// Contribution weight of the last accepted update in this round.
    pub fn last_omega(&self) -> Option<f64> {
        self.last_omega
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Records a library node's update for the current round.
    ///
    /// # Args
    /// * `update` - The decoded `NEW_WEIGHTS` message.
    ///
    /// # Errors
    /// A `StateErr` if the update targets another session or round, or the
    /// session is terminated; a `ShapeMismatch` if the vector doesn't fit
    /// the manifest. Nothing is modified on error.
    pub fn accept_update(&mut self, update: &WeightsUpdate) -> Result<()> {
        self.ensure_active()?;

        if update.session_id != self.id {
            return Err(StateErr::SessionMismatch {
                expected: self.id.clone(),
                got: update.session_id.clone(),
            }
            .into());
        }

        if update.round != self.current_round {
            return Err(StateErr::RoundMismatch {
                expected: self.current_round,
                got: update.round,
            }
            .into());
        }

        check_len(&self.weights_shape, update.weights.len())?;

        self.current_weights.clone_from(&update.weights);
        self.last_omega = Some(update.omega);
        self.phase = RoundPhase::Aggregating;

        debug!(
            round = self.current_round,
            omega = update.omega;
            "accepted update for session {}", self.id
        );
        Ok(())
    }

    /// Replaces the working weights with an externally aggregated vector.
    ///
    /// # Args
    /// * `weights` - The round's aggregate, flat.
    ///
    /// # Errors
    /// Same as `accept_update`, minus the session and round checks.
    pub fn replace_weights(&mut self, weights: Vec<f64>) -> Result<()> {
        self.ensure_active()?;
        check_len(&self.weights_shape, weights.len())?;

        self.current_weights = weights;
        self.phase = RoundPhase::Aggregating;
        Ok(())
    }

    /// Stops the session, no further rounds will be produced.
    pub fn terminate(&mut self) {
        self.phase = RoundPhase::Terminated;
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.phase == RoundPhase::Terminated {
            return Err(StateErr::Terminated {
                session_id: self.id.clone(),
            }
            .into());
        }

        Ok(())
    }

    pub(crate) fn begin_conversion(&mut self) -> RoundPhase {
        std::mem::replace(&mut self.phase, RoundPhase::Converting)
    }

    pub(crate) fn abort_conversion(&mut self, previous: RoundPhase) {
        self.phase = previous;
    }

    /// Moves to the next round once its artifact is published.
    pub(crate) fn complete_round(&mut self, weights_shape: Vec<ShapeEntry>) {
        self.weights_shape = weights_shape;
        self.current_round += 1;
        self.last_omega = None;
        self.phase = RoundPhase::Serving;
    }
}

/// Checks a flat vector of `got` values fits `manifest` exactly.
pub(crate) fn check_len(manifest: &[ShapeEntry], got: usize) -> std::result::Result<(), ShapeMismatchErr> {
    let expected = marshal::total_len(manifest)?;
    if got != expected {
        return Err(ShapeMismatchErr::Length { got, expected });
    }

    Ok(())
}

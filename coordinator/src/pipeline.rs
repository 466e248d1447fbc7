use std::path::{Path, PathBuf};

use comms::SessionStart;
use log::{info, warn};
use uuid::Uuid;

use crate::{
    converter::Converter,
    error::Result,
    marshal::{self, ShapeEntry},
    model::ModelFile,
    session::{Session, check_len},
    store::{ArtifactStore, RoundMetadata, Staging},
};

/// Produces every round's model and serving artifact for a session.
///
/// Each step either completes or leaves the session and the store exactly as
/// they were: files written by a failed step are removed and the session's
/// round only moves once the new artifact is published.
#[derive(Debug)]
pub struct Pipeline<C: Converter> {
    store: ArtifactStore,
    converter: C,
}

impl<C: Converter> Pipeline<C> {
    pub fn new(store: ArtifactStore, converter: C) -> Self {
        Self { store, converter }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Ingests a session's initial model and publishes it as round 0.
    ///
    /// # Args
    /// * `start` - The decoded `NEW_SESSION` message.
    ///
    /// # Returns
    /// The new session, serving round 0.
    ///
    /// # Errors
    /// A `Conversion` error if the converter rejects the model, or any I/O or
    /// model error on the way. No session directory is left behind.
    pub fn start_session(&self, start: &SessionStart) -> Result<Session> {
        let session_id = Uuid::new_v4().to_string();
        self.store.create_session(&session_id)?;

        self.ingest(session_id.clone(), start).inspect_err(|e| {
            warn!("discarding session {session_id}: {e}");
            if let Err(e) = self.store.remove_session(&session_id) {
                warn!("failed to clean up session {session_id}: {e}");
            }
        })
    }

    /// Builds, persists and publishes the next round from the session's
    /// current weights.
    ///
    /// # Args
    /// * `session` - The session to advance, its `current_round` moves by
    ///   one on success.
    ///
    /// # Returns
    /// The published serving directory of the new round.
    ///
    /// # Errors
    /// A `ShapeMismatch` if the weights don't fit the recorded manifest, a
    /// `Conversion` error if the converter fails, a `State` error if the
    /// session is terminated. The session and the prior artifacts are left
    /// untouched.
    pub fn advance_round(&self, session: &mut Session) -> Result<PathBuf> {
        session.ensure_active()?;
        let phase = session.begin_conversion();

        match self.build_round(session) {
            Ok((serving_dir, manifest)) => {
                session.complete_round(manifest);
                info!(
                    round = session.current_round();
                    "published {} for session {}", serving_dir.display(), session.id()
                );
                Ok(serving_dir)
            }
            Err(e) => {
                session.abort_conversion(phase);
                warn!(
                    round = session.current_round() + 1;
                    "aborted round for session {}: {e}", session.id()
                );
                Err(e)
            }
        }
    }

    fn ingest(&self, session_id: String, start: &SessionStart) -> Result<Session> {
        let model_path = self.store.write_model(&session_id, 0, &start.model_blob)?;
        let (staging, manifest) = self.convert(&session_id, &model_path)?;

        let weights = ModelFile::open(&model_path)?.flat_weights(&manifest)?;
        let serving_dir = self.publish(staging, &session_id, 0)?;
        let session = Session::new(session_id, start, manifest, weights)?;

        info!(
            tensors = session.weights_shape().len(),
            weights = session.current_weights().len();
            "session {} for repo {} serving {}",
            session.id(), session.repo_id(), serving_dir.display()
        );
        Ok(session)
    }

    fn build_round(&self, session: &Session) -> Result<(PathBuf, Vec<ShapeEntry>)> {
        let session_id = session.id();
        let round = session.current_round() + 1;

        let tensors = marshal::reshape(session.current_weights(), session.weights_shape())?;
        let previous = ModelFile::open(&self.store.model_path(session_id, round - 1))?;
        let bytes = previous.inject(session.weights_shape(), &tensors)?;

        let model_path = self.store.write_model(session_id, round, &bytes)?;
        self.convert_round(session, round, &model_path)
            .inspect_err(|_| {
                if let Err(e) = self.store.remove_model(session_id, round) {
                    warn!("failed to remove {}: {e}", model_path.display());
                }
            })
    }

    /// Converts and publishes a round's model. The manifest it reports must
    /// still fit the session's weights, or the round is never published.
    fn convert_round(
        &self,
        session: &Session,
        round: u64,
        model_path: &Path,
    ) -> Result<(PathBuf, Vec<ShapeEntry>)> {
        let (staging, manifest) = self.convert(session.id(), model_path)?;
        check_len(&manifest, session.current_weights().len())?;

        let serving_dir = self.publish(staging, session.id(), round)?;
        Ok((serving_dir, manifest))
    }

    /// Converts a model into a fresh staging directory. The staging directory
    /// is released on every path unless it gets published.
    fn convert(&self, session_id: &str, model_path: &Path) -> Result<(Staging, Vec<ShapeEntry>)> {
        let staging = self.store.stage(session_id)?;
        let conversion = self.converter.convert(model_path, staging.path())?;
        marshal::total_len(&conversion.manifest)?;

        Ok((staging, conversion.manifest))
    }

    fn publish(&self, staging: Staging, session_id: &str, round: u64) -> Result<PathBuf> {
        let metadata = RoundMetadata {
            current_round: round,
            session_id: session_id.to_string(),
        };

        Ok(self.store.publish(staging, &metadata)?)
    }
}
